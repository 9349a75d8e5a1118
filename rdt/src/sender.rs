//! Outbound segment state for stop-and-wait reliability.
//!
//! [`Sender`] tracks the alternating sequence bit and the single in-flight
//! segment.  It does **not** touch the transport;
//! [`crate::connection::Connection`] calls these methods and owns the actual
//! send/receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** segment is in flight at any moment (`unacked`).
//! - The in-flight bytes are encoded once and resent unchanged.
//! - On answer: clear `unacked`; for DATA the caller then flips the bit.
//! - On timeout: the next [`Sender::on_transmit`] bumps `tx_count`.

use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// RetransmitEntry
// ---------------------------------------------------------------------------

/// A segment that has been sent but not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// The encoded segment, exactly as put on the wire.
    pub bytes: Vec<u8>,
    /// How many times this segment has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

impl RetransmitEntry {
    /// Round-trip sample for this answer, if it is unambiguous.
    ///
    /// A retransmitted segment's answer could belong to any of its copies,
    /// so only first transmissions yield a sample.
    pub fn rtt_sample(&self) -> Option<Duration> {
        (self.tx_count == 1).then(|| self.sent_at.elapsed())
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit of the **next** DATA segment (0 or 1).
    pub next_bit: u8,

    /// The in-flight segment, or `None` when the sender is idle.
    pub unacked: Option<RetransmitEntry>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place freshly encoded `bytes` into the in-flight slot.
    ///
    /// Nothing is counted as transmitted until [`Sender::on_transmit`].
    pub fn begin(&mut self, bytes: Vec<u8>) {
        debug_assert!(
            !self.has_unacked(),
            "begin called while a segment is already in flight"
        );
        self.unacked = Some(RetransmitEntry {
            bytes,
            tx_count: 0,
            sent_at: Instant::now(),
        });
    }

    /// Record one (re)transmission and return the bytes to put on the wire.
    pub fn on_transmit(&mut self) -> Option<&[u8]> {
        let entry = self.unacked.as_mut()?;
        entry.tx_count += 1;
        entry.sent_at = Instant::now();
        Some(&entry.bytes)
    }

    /// The in-flight segment was answered; clear the slot.
    pub fn on_answer(&mut self) -> Option<RetransmitEntry> {
        self.unacked.take()
    }

    /// Flip to the other sequence bit after a DATA segment is acknowledged.
    pub fn advance(&mut self) {
        self.next_bit ^= 1;
    }

    /// Returns the number of times the in-flight segment has been sent,
    /// or `0` if the sender is idle.
    pub fn transmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    /// `true` when a segment is waiting for an answer.
    pub fn has_unacked(&self) -> bool {
        self.unacked.is_some()
    }
}
