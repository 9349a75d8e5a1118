//! Inbound sequencing for stop-and-wait reliability.
//!
//! The [`Receiver`] decides what to do with each DATA segment:
//! - Deliver it when its sequence bit is the one expected, then expect the
//!   other bit.
//! - Otherwise it is a copy of the segment delivered last (the peer missed
//!   our ACK); re-acknowledge it but never deliver it again.
//!
//! Only bit 0 of the sequence byte is significant.  The [`Receiver`] does
//! **not** send ACKs itself; it tells [`crate::connection::Connection`] which
//! ACK number to send.

/// What the connection should do with a DATA segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New data: acknowledge with `ack` and hand the payload to the caller.
    Deliver { ack: u8 },
    /// Already delivered: acknowledge with `ack` again, drop the payload.
    Duplicate { ack: u8 },
}

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    expected_bit: u8,
    delivered: u64,
    duplicates: u64,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a DATA segment carrying sequence number `seq`.
    pub fn on_data(&mut self, seq: u8) -> Verdict {
        let bit = seq & 1;
        if bit == self.expected_bit {
            self.expected_bit ^= 1;
            self.delivered += 1;
            Verdict::Deliver { ack: bit }
        } else {
            self.duplicates += 1;
            Verdict::Duplicate { ack: bit }
        }
    }

    /// Sequence bit of the next segment to deliver.
    pub fn expected_bit(&self) -> u8 {
        self.expected_bit
    }

    /// Segments handed to the application so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Duplicate segments re-acknowledged and discarded.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_segments_alternate() {
        let mut r = Receiver::new();
        assert_eq!(r.on_data(0), Verdict::Deliver { ack: 0 });
        assert_eq!(r.on_data(1), Verdict::Deliver { ack: 1 });
        assert_eq!(r.on_data(0), Verdict::Deliver { ack: 0 });
        assert_eq!(r.delivered(), 3);
    }

    #[test]
    fn repeated_segment_is_reacknowledged_not_delivered() {
        let mut r = Receiver::new();
        assert_eq!(r.on_data(0), Verdict::Deliver { ack: 0 });
        assert_eq!(r.on_data(0), Verdict::Duplicate { ack: 0 });
        assert_eq!(r.on_data(0), Verdict::Duplicate { ack: 0 });
        assert_eq!(r.expected_bit(), 1);
        assert_eq!((r.delivered(), r.duplicates()), (1, 2));
    }

    #[test]
    fn only_the_low_bit_counts() {
        let mut r = Receiver::new();
        assert_eq!(r.on_data(2), Verdict::Deliver { ack: 0 });
        assert_eq!(r.on_data(3), Verdict::Deliver { ack: 1 });
    }
}
