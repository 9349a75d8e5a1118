//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one side of a point-to-point
//! RDT session.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Coordinating [`crate::sender`] and [`crate::receiver`].
//! - Feeding round-trip samples to [`crate::rtt`] and pushing the resulting
//!   timeout to the transport.
//! - Exposing `initiate` / `accept` / `send` / `recv` / `close` to
//!   application code.
//!
//! Timeouts, undecodable datagrams and unexpected segments are absorbed here
//! and only ever cause a resend or a wait.  A caller sees a [`ConnError`] only
//! when the connection cannot proceed: the peer vanished, the transport
//! failed, or an operation was called in the wrong state.
//!
//! # Handshake
//!
//! ```text
//!  client                         server
//!    │ ── CONN ─────────────────▶  │   (resent until ACK(2))
//!    │ ◀──────────────── ACK(2) ── │   (resent on timeout or duplicate CONN)
//!    │ ── ACK(3) ───────────────▶  │   (sent once)
//! ```

use thiserror::Error;
use tokio::time::Instant;

use crate::receiver::{Receiver, Verdict};
use crate::rtt::{RttEstimator, TimerConfig};
use crate::segment::{sentinel, Header, Segment, SegmentBuf, SegmentError, SegmentKind, MAX_PAYLOAD};
use crate::sender::Sender;
use crate::state::ConnectionState;
use crate::transport::{RecvOutcome, Transport};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Conditions that end a connection operation.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The operation is not valid in the current state.  Nothing was sent.
    #[error("cannot {op} while {state}")]
    BadState {
        op: &'static str,
        state: ConnectionState,
    },
    /// Application data does not fit into one segment.
    #[error("payload of {0} bytes exceeds the 1395-byte segment payload")]
    PayloadTooLarge(usize),
    /// The peer closed the channel while a reply was outstanding.
    #[error("connection closed by peer while {state}")]
    PeerClosed { state: ConnectionState },
    /// A segment could not be built.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),
    /// Underlying I/O error from the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// What one receive attempt produced.
enum Incoming {
    /// A decodable segment; its payload is still in the receive buffer.
    Segment(Header),
    Timeout,
    Closed,
}

/// How a retransmit loop treats a received segment.
enum Reaction {
    /// This is the reply we were waiting for.
    Answered,
    /// Resend the in-flight segment right away.
    Resend,
    /// Noise; keep waiting for the rest of this attempt.
    Ignore,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One side of a reliable, stop-and-wait session over `T`.
///
/// A connection starts in [`ConnectionState::Init`] and ends in
/// [`ConnectionState::Closed`]; a closed connection cannot be reused.
pub struct Connection<T: Transport> {
    state: ConnectionState,
    transport: T,
    sender: Sender,
    receiver: Receiver,
    rtt: RttEstimator,
    config: TimerConfig,
    buf: SegmentBuf,
    retransmissions: u64,
}

impl<T: Transport> Connection<T> {
    /// Wrap `transport` with the default timing parameters.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, TimerConfig::default())
    }

    pub fn with_config(transport: T, config: TimerConfig) -> Self {
        Self {
            state: ConnectionState::Init,
            transport,
            sender: Sender::new(),
            receiver: Receiver::new(),
            rtt: RttEstimator::new(&config),
            config,
            buf: SegmentBuf::new(),
            retransmissions: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Smoothed round-trip time in milliseconds.
    pub fn estimated_rtt(&self) -> f64 {
        self.rtt.estimated_ms()
    }

    /// Round-trip deviation in milliseconds.
    pub fn deviation_rtt(&self) -> f64 {
        self.rtt.deviation_ms()
    }

    /// Segments resent because of a timeout or a peer's repeat.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive-side counters (segments delivered, duplicates discarded).
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: handshake with the listener at `host:port`.
    ///
    /// Returns once ACK(3) has been sent; the connection is then ready to
    /// [`send`](Self::send).
    pub async fn initiate(&mut self, host: &str, port: u16) -> Result<(), ConnError> {
        self.require(ConnectionState::Init, "initiate")?;

        self.transport.connect(host, port).await?;
        log::info!("[rdt] starting handshake with {host}:{port}");

        let conn = Segment::control(SegmentKind::Conn, 0, 0).encode()?;
        self.state = ConnectionState::WaitHs2;
        self.send_until_answered(conn, false, |h| {
            if h.acknowledges(sentinel::CONN_ACK) {
                Reaction::Answered
            } else {
                Reaction::Resend
            }
        })
        .await?;

        self.state = ConnectionState::WaitHs3;
        self.send_ack(sentinel::HANDSHAKE_DONE).await?;

        self.state = ConnectionState::WaitSend;
        log::info!("[rdt] connection established");
        Ok(())
    }

    /// Passive open: wait on local `port` for a peer to initiate.
    ///
    /// Returns once the handshake is confirmed; the connection is then ready
    /// to [`recv`](Self::recv).
    pub async fn accept(&mut self, port: u16) -> Result<(), ConnError> {
        self.require(ConnectionState::Init, "accept")?;

        self.transport.bind(port).await?;
        log::info!("[rdt] waiting for a connection on port {port}");

        loop {
            match self.await_segment(None).await? {
                Incoming::Segment(h) if h.kind == SegmentKind::Conn => break,
                Incoming::Segment(h) => log::warn!("[rdt] expected CONN, got {h}"),
                Incoming::Timeout => {}
                Incoming::Closed => return Err(self.peer_closed()),
            }
        }

        // Any further CONN is taken as a repeat from the same peer whose
        // ACK(2) was lost.
        let conn_ack = Segment::ack(sentinel::CONN_ACK).encode()?;
        self.state = ConnectionState::WaitHs3;
        let answer = self
            .send_until_answered(conn_ack, false, |h| match h.kind {
                SegmentKind::Ack if h.ack == sentinel::HANDSHAKE_DONE => Reaction::Answered,
                // The client only sends DATA or CLOSE after ACK(2) arrived, so
                // its ACK(3) was lost.  The segment stays unacknowledged and
                // will be retransmitted.
                SegmentKind::Data | SegmentKind::Close => Reaction::Answered,
                SegmentKind::Conn => Reaction::Resend,
                _ => Reaction::Ignore,
            })
            .await?;

        if answer.kind != SegmentKind::Ack {
            log::info!("[rdt] {answer} arrived before ACK(3); handshake implicitly confirmed");
        }

        self.state = ConnectionState::WaitData0;
        log::info!("[rdt] connection established");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Reliably deliver one segment's worth of `data` to the peer.
    ///
    /// Blocks until the peer acknowledges it, retransmitting on every
    /// timeout.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.require(ConnectionState::WaitSend, "send")?;
        if data.len() > MAX_PAYLOAD {
            return Err(ConnError::PayloadTooLarge(data.len()));
        }

        let bit = self.sender.next_bit;
        let segment = Segment::data(bit, data).encode()?;
        self.state = ConnectionState::wait_ack(bit);
        log::debug!("[rdt] → DATA seq={bit} len={}", data.len());

        self.send_until_answered(segment, true, move |h| {
            if h.acknowledges(bit) {
                Reaction::Answered
            } else {
                Reaction::Ignore
            }
        })
        .await?;

        self.sender.advance();
        self.state = ConnectionState::WaitSend;
        Ok(())
    }

    /// Wait for the next in-order payload from the peer.
    ///
    /// Returns `Ok(None)` once the peer has closed its sending side; the
    /// connection is then [`ConnectionState::Closing`] and should be
    /// [`close`](Self::close)d.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        if self.state.expected_bit().is_none() {
            return Err(ConnError::BadState {
                op: "receive",
                state: self.state,
            });
        }
        debug_assert_eq!(self.state.expected_bit(), Some(self.receiver.expected_bit()));

        self.transport.set_timeout(None);
        loop {
            let header = match self.await_segment(None).await? {
                Incoming::Segment(h) => h,
                Incoming::Timeout => continue,
                Incoming::Closed => return Err(self.peer_closed()),
            };

            match header.kind {
                SegmentKind::Data => match self.receiver.on_data(header.seq) {
                    Verdict::Deliver { ack } => {
                        let payload = self.buf.segment()?.payload.to_vec();
                        self.state = ConnectionState::wait_data(self.receiver.expected_bit());
                        self.send_ack(ack).await?;
                        return Ok(Some(payload));
                    }
                    Verdict::Duplicate { ack } => {
                        log::debug!("[rdt] duplicate {header}; re-acknowledging");
                        self.send_ack(ack).await?;
                    }
                },
                SegmentKind::Close => {
                    self.send_ack(sentinel::CLOSE).await?;
                    self.state = ConnectionState::Closing;
                    log::info!("[rdt] peer closed its stream");
                    return Ok(None);
                }
                _ => log::warn!("[rdt] ignoring {header} while {}", self.state),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Graceful close, then release the transport.
    ///
    /// - Sending side: CLOSE is retransmitted until ACK(4) arrives.
    /// - Receiving side (after [`recv`](Self::recv) returned `None`): linger,
    ///   re-acknowledging any repeated CLOSE, until the peer goes quiet.
    /// - Already closed: nothing happens.
    /// - Anywhere else: the session is abandoned without notifying the peer.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::WaitSend => {
                log::debug!("[rdt] sender closing");
                let close = Segment::control(SegmentKind::Close, sentinel::CLOSE, 0).encode()?;
                let acked = self
                    .send_until_answered(close, false, |h| {
                        if h.acknowledges(sentinel::CLOSE) {
                            Reaction::Answered
                        } else {
                            Reaction::Ignore
                        }
                    })
                    .await;
                if let Err(e) = acked {
                    // The session is over either way.
                    self.state = ConnectionState::Closed;
                    if let Err(release) = self.transport.close() {
                        log::warn!("[rdt] releasing transport failed: {release}");
                    }
                    return Err(e);
                }
            }
            ConnectionState::Closing => {
                log::debug!("[rdt] receiver closing");
                self.linger().await?;
            }
            ConnectionState::Closed => return Ok(()),
            other => log::warn!("[rdt] abandoning connection in {other}"),
        }

        self.state = ConnectionState::Closed;
        self.transport.close()?;
        log::info!("[rdt] connection closed");
        Ok(())
    }

    /// Answer repeated CLOSEs until nothing arrives for a whole linger period.
    async fn linger(&mut self) -> Result<(), ConnError> {
        let linger = self.config.linger;
        loop {
            match self.await_segment(Some(Instant::now() + linger)).await? {
                Incoming::Segment(h) if h.kind == SegmentKind::Close => {
                    // Our ACK(4) was lost.
                    self.send_ack(sentinel::CLOSE).await?;
                }
                Incoming::Segment(h) => log::debug!("[rdt] ignoring {h} while lingering"),
                Incoming::Timeout | Incoming::Closed => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require(&self, expected: ConnectionState, op: &'static str) -> Result<(), ConnError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConnError::BadState {
                op,
                state: self.state,
            })
        }
    }

    fn peer_closed(&self) -> ConnError {
        log::warn!("[rdt] connection shut down by peer while {}", self.state);
        ConnError::PeerClosed { state: self.state }
    }

    async fn send_ack(&mut self, ack: u8) -> Result<(), ConnError> {
        let bytes = Segment::ack(ack).encode()?;
        log::debug!("[rdt] → ACK({ack})");
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Transmit `bytes` and keep retransmitting them until `react` accepts a
    /// reply.  Returns the header of that reply.
    ///
    /// Each attempt waits one adaptive timeout.  With `sample_rtt`, an answer
    /// to the first transmission updates the RTT estimate.
    async fn send_until_answered<F>(
        &mut self,
        bytes: Vec<u8>,
        sample_rtt: bool,
        mut react: F,
    ) -> Result<Header, ConnError>
    where
        F: FnMut(Header) -> Reaction + Send,
    {
        self.sender.begin(bytes);
        loop {
            if let Some(bytes) = self.sender.on_transmit() {
                self.transport.send(bytes).await?;
            }
            let deadline = Instant::now() + self.rtt.timeout();

            loop {
                match self.await_segment(Some(deadline)).await? {
                    Incoming::Segment(h) => match react(h) {
                        Reaction::Answered => {
                            self.on_answered(sample_rtt);
                            return Ok(h);
                        }
                        Reaction::Resend => {
                            log::debug!("[rdt] got {h} while {}; resending", self.state);
                            break;
                        }
                        Reaction::Ignore => {
                            log::debug!("[rdt] ignoring {h} while {}", self.state);
                        }
                    },
                    Incoming::Timeout => {
                        log::debug!(
                            "[rdt] attempt {} timed out while {}; resending",
                            self.sender.transmit_count(),
                            self.state
                        );
                        break;
                    }
                    Incoming::Closed => {
                        self.sender.on_answer();
                        return Err(self.peer_closed());
                    }
                }
            }
            self.retransmissions += 1;
        }
    }

    fn on_answered(&mut self, sample_rtt: bool) {
        let Some(entry) = self.sender.on_answer() else {
            return;
        };
        if !sample_rtt {
            return;
        }
        if let Some(sample) = entry.rtt_sample() {
            let timeout = self.rtt.record_sample(sample);
            self.transport.set_timeout(Some(timeout));
            log::debug!(
                "[rdt] rtt sample {:?}: estimated={:.3}ms deviation={:.3}ms timeout={:?}",
                sample,
                self.rtt.estimated_ms(),
                self.rtt.deviation_ms(),
                timeout
            );
        }
    }

    /// Receive until a decodable segment arrives, `deadline` passes, or the
    /// peer closes.  `None` waits indefinitely.
    async fn await_segment(&mut self, deadline: Option<Instant>) -> Result<Incoming, ConnError> {
        loop {
            let limit = match deadline {
                Some(at) => {
                    let left = at.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(Incoming::Timeout);
                    }
                    Some(left)
                }
                None => None,
            };
            self.transport.set_timeout(limit);

            match self.transport.recv(self.buf.spare()).await? {
                RecvOutcome::Data(n) => {
                    self.buf.set_filled(n);
                    match self.buf.segment() {
                        Ok(seg) => {
                            log::debug!("[rdt] ← {seg}");
                            return Ok(Incoming::Segment(seg.header()));
                        }
                        Err(e) => log::warn!("[rdt] discarding {n}-byte datagram: {e}"),
                    }
                }
                RecvOutcome::Timeout => return Ok(Incoming::Timeout),
                RecvOutcome::Closed => return Ok(Incoming::Closed),
            }
        }
    }
}
