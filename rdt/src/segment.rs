//! Wire-format definitions for RDT segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Parsing a received byte slice back into a [`Segment`] that *borrows* its
//!   payload from the receive buffer, returning errors for malformed or
//!   truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3               4
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Sequence No  |   Ack Number  |      Type     |          Payload Size         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                  Payload ...                                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 5 bytes.
//! seq(1) + ack(1) + type(1) + payload_size(2)

use std::fmt;

use thiserror::Error;

/// Fixed sequence/ack values used outside of the alternating data stream.
pub mod sentinel {
    /// Server's acknowledgement of a CONN request.
    pub const CONN_ACK: u8 = 2;
    /// Client's confirmation that completes the handshake.
    pub const HANDSHAKE_DONE: u8 = 3;
    /// Sequence number of a CLOSE segment, and the ack number answering it.
    pub const CLOSE: u8 = 4;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 5;

/// Largest datagram (header + payload) either peer will ever send.
pub const MAX_SEG_SIZE: usize = 1400;

/// Largest payload one DATA segment can carry.
pub const MAX_PAYLOAD: usize = MAX_SEG_SIZE - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 1;
const OFF_TYPE: usize = 2;
const OFF_PAYLOAD_SIZE: usize = 3;

/// Segment type carried in the third header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    Data = 0,
    Ack = 1,
    Conn = 2,
    Close = 3,
}

impl TryFrom<u8> for SegmentKind {
    type Error = SegmentError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Data),
            1 => Ok(Self::Ack),
            2 => Ok(Self::Conn),
            3 => Ok(Self::Close),
            other => Err(SegmentError::UnknownType(other)),
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Conn => "CONN",
            Self::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// A protocol segment whose payload borrows from some byte buffer.
///
/// Outbound segments borrow the application's data; inbound segments borrow
/// the receive buffer they were decoded from, so no payload copy is made
/// until the application asks for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub seq: u8,
    pub ack: u8,
    pub kind: SegmentKind,
    pub payload: &'a [u8],
}

impl<'a> Segment<'a> {
    /// A segment with no payload (CONN, ACK, CLOSE).
    pub fn control(kind: SegmentKind, seq: u8, ack: u8) -> Self {
        Self {
            seq,
            ack,
            kind,
            payload: &[],
        }
    }

    /// An ACK carrying `ack` and a zero sequence number.
    pub fn ack(ack: u8) -> Self {
        Self::control(SegmentKind::Ack, 0, ack)
    }

    /// A DATA segment carrying `payload` under sequence bit `seq`.
    pub fn data(seq: u8, payload: &'a [u8]) -> Self {
        Self {
            seq,
            ack: 0,
            kind: SegmentKind::Data,
            payload,
        }
    }

    /// Header plus payload length on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The `payload_size` field is always computed from the actual payload.
    pub fn encode(&self) -> Result<Vec<u8>, SegmentError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(SegmentError::PayloadTooLarge(self.payload.len()));
        }

        let mut buf = vec![0u8; self.wire_len()];
        buf[OFF_SEQ] = self.seq;
        buf[OFF_ACK] = self.ack;
        buf[OFF_TYPE] = self.kind as u8;
        buf[OFF_PAYLOAD_SIZE..OFF_PAYLOAD_SIZE + 2]
            .copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(self.payload);

        Ok(buf)
    }

    /// Parse a [`Segment`] out of the bytes actually received.
    ///
    /// The returned payload view is `payload_size` bytes long and never
    /// extends past `buf`; trailing bytes beyond it are ignored.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the type byte is not a known [`SegmentKind`], or
    /// - `payload_size` announces more bytes than `buf` holds.
    pub fn decode(buf: &'a [u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort(buf.len()));
        }

        let seq = buf[OFF_SEQ];
        let ack = buf[OFF_ACK];
        let kind = SegmentKind::try_from(buf[OFF_TYPE])?;
        let payload_size =
            u16::from_be_bytes([buf[OFF_PAYLOAD_SIZE], buf[OFF_PAYLOAD_SIZE + 1]]) as usize;

        let available = buf.len() - HEADER_LEN;
        if payload_size > available {
            return Err(SegmentError::Truncated {
                announced: payload_size,
                available,
            });
        }

        Ok(Self {
            seq,
            ack,
            kind,
            payload: &buf[HEADER_LEN..HEADER_LEN + payload_size],
        })
    }

    /// The fixed-size part of this segment, detached from the payload.
    pub fn header(&self) -> Header {
        Header {
            seq: self.seq,
            ack: self.ack,
            kind: self.kind,
        }
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}: seq={}, ack={}, payload={} bytes}}",
            self.kind,
            self.seq,
            self.ack,
            self.payload.len()
        )
    }
}

/// Header fields of a received segment, owned so the receive buffer can be
/// reused while the state machine reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u8,
    pub ack: u8,
    pub kind: SegmentKind,
}

impl Header {
    /// `true` for an ACK carrying `ack`.
    pub fn acknowledges(&self, ack: u8) -> bool {
        self.kind == SegmentKind::Ack && self.ack == ack
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: seq={}, ack={}}}", self.kind, self.seq, self.ack)
    }
}

/// Errors that can arise when building or parsing a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    /// `payload_size` claims more bytes than were received.
    #[error("payload_size announces {announced} bytes but only {available} arrived")]
    Truncated { announced: usize, available: usize },
    /// The type byte does not name a segment kind.
    #[error("unknown segment type {0}")]
    UnknownType(u8),
    /// Payload does not fit into one segment.
    #[error("payload of {0} bytes exceeds the 1395-byte maximum")]
    PayloadTooLarge(usize),
}

// ---------------------------------------------------------------------------
// SegmentBuf
// ---------------------------------------------------------------------------

/// Fixed-capacity receive buffer sized to the largest segment.
///
/// The transport writes into [`SegmentBuf::spare`] and reports how many bytes
/// arrived; only that filled prefix is ever decoded.
pub struct SegmentBuf {
    bytes: [u8; MAX_SEG_SIZE],
    len: usize,
}

impl Default for SegmentBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentBuf {
    pub fn new() -> Self {
        Self {
            bytes: [0u8; MAX_SEG_SIZE],
            len: 0,
        }
    }

    /// The whole backing storage, for a transport to receive into.
    ///
    /// Resets the filled length; call [`SegmentBuf::set_filled`] afterwards.
    pub fn spare(&mut self) -> &mut [u8] {
        self.len = 0;
        &mut self.bytes
    }

    /// Record that the first `n` bytes hold a received datagram.
    ///
    /// `n` is clamped to the capacity.
    pub fn set_filled(&mut self, n: usize) {
        self.len = n.min(MAX_SEG_SIZE);
    }

    /// The bytes received by the last read.
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Decode the filled prefix.
    pub fn segment(&self) -> Result<Segment<'_>, SegmentError> {
        Segment::decode(self.filled())
    }
}
