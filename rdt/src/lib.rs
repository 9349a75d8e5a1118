//! `rdt` — a reliable, connection-oriented, stop-and-wait transport over an
//! unreliable datagram service.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   DATA seq=b  ┌──────────┐
//!  │  Sender  │──────────────▶│ Receiver │
//!  └────┬─────┘               └─────┬────┘
//!       │        ACK(b)             │
//!       │◀──────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │  (state machine + RTT estimator)  │
//!  └────┬──────────────────────────────┘
//!       │ whole datagrams
//!  ┌────▼──────┐
//!  │ Transport │  (UDP socket, in-memory link, or lossy simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]    — wire format (encode / decode)
//! - [`rtt`]        — adaptive retransmission timeout
//! - [`state`]      — finite-state-machine types
//! - [`sender`]     — stop-and-wait outbound segment state
//! - [`receiver`]   — stop-and-wait inbound duplicate filtering
//! - [`connection`] — per-connection lifecycle and public API
//! - [`transport`]  — the datagram service abstraction
//! - [`socket`]     — UDP transport
//! - [`simulator`]  — in-memory links and loss injection for testing
//! - [`proxy`]      — lossy UDP relay for testing over a real network

pub mod connection;
pub mod proxy;
pub mod receiver;
pub mod rtt;
pub mod segment;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod transport;

pub use connection::{ConnError, Connection};
pub use rtt::TimerConfig;
pub use socket::Socket;
pub use state::ConnectionState;
