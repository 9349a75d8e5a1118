//! The unreliable datagram service the state machine runs on.
//!
//! [`Transport`] is deliberately narrow: bind or connect one endpoint, move
//! whole datagrams, and wait for the next one under a mutable timeout.  The
//! receive call reports the two conditions the protocol distinguishes as
//! ordinary values of [`RecvOutcome`] rather than errors:
//!
//! - [`RecvOutcome::Timeout`] — nothing arrived in time; drives retransmission.
//! - [`RecvOutcome::Closed`] — the peer is gone; fatal for a transfer.
//!
//! Implementations: [`crate::socket::Socket`] (UDP),
//! [`crate::simulator::MemoryTransport`] (in-process) and
//! [`crate::simulator::Simulator`] (fault injection around either).

use std::future::Future;
use std::io;
use std::time::Duration;

/// Result of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A datagram of this many bytes was written to the buffer.
    Data(usize),
    /// The timeout expired with nothing received.
    Timeout,
    /// The peer closed the channel.
    Closed,
}

/// A best-effort, unordered, unreliable datagram endpoint.
pub trait Transport: Send {
    /// Listen for datagrams on local `port`.
    fn bind(&mut self, port: u16) -> impl Future<Output = io::Result<()>> + Send;

    /// Fix the remote endpoint all subsequent sends go to.
    fn connect(&mut self, host: &str, port: u16) -> impl Future<Output = io::Result<()>> + Send;

    /// Send one datagram.  Delivery is not guaranteed.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram, at most for the current timeout.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<RecvOutcome>> + Send;

    /// Set the receive timeout.  `None` waits indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()>;
}

/// Await `fut`, giving up after `limit` if one is set.
///
/// Returns `None` when the limit expired first.
pub(crate) async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
