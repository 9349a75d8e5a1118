//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy.  Transitions live in [`crate::connection`]; the diagram below is
//! the complete set of legal ones.
//!
//! ```text
//!  INIT ──initiate──▶ WAIT_HS2 ──ACK(2)──▶ WAIT_HS3 ──ACK(3) sent──▶ WAIT_SEND
//!  INIT ──accept───▶ WAIT_HS3 ──ACK(3) received──▶ WAIT_DATA0
//!
//!  WAIT_SEND ──send──▶ WAIT_ACK{0,1} ──matching ACK──▶ WAIT_SEND
//!  WAIT_SEND ──close (CLOSE acked)──▶ CLOSED
//!
//!  WAIT_DATA0 ◀──data──▶ WAIT_DATA1
//!  WAIT_DATA{0,1} ──CLOSE received──▶ CLOSING ──linger expires──▶ CLOSED
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Fresh connection; no handshake attempted.
    #[default]
    Init,
    /// CONN sent; waiting for ACK(2).
    WaitHs2,
    /// Handshake reply exchanged; ACK(3) pending (client sends, server awaits).
    WaitHs3,
    /// Client ready to send the next DATA segment.
    WaitSend,
    /// Server expecting DATA with sequence bit 0.
    WaitData0,
    /// Server expecting DATA with sequence bit 1.
    WaitData1,
    /// DATA 0 in flight; waiting for ACK(0).
    WaitAck0,
    /// DATA 1 in flight; waiting for ACK(1).
    WaitAck1,
    /// CLOSE received and acknowledged; lingering for duplicates.
    Closing,
    /// Terminal.  The transport has been released.
    Closed,
}

impl ConnectionState {
    /// The "waiting for data" state that expects sequence bit `bit`.
    pub fn wait_data(bit: u8) -> Self {
        if bit & 1 == 0 {
            Self::WaitData0
        } else {
            Self::WaitData1
        }
    }

    /// The "waiting for ack" state for a DATA segment carrying `bit`.
    pub fn wait_ack(bit: u8) -> Self {
        if bit & 1 == 0 {
            Self::WaitAck0
        } else {
            Self::WaitAck1
        }
    }

    /// Sequence bit expected by a receiving connection, if it is receiving.
    pub fn expected_bit(self) -> Option<u8> {
        match self {
            Self::WaitData0 => Some(0),
            Self::WaitData1 => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::WaitHs2 => "WAIT_HS2",
            Self::WaitHs3 => "WAIT_HS3",
            Self::WaitSend => "WAIT_SEND",
            Self::WaitData0 => "WAIT_DATA0",
            Self::WaitData1 => "WAIT_DATA1",
            Self::WaitAck0 => "WAIT_ACK0",
            Self::WaitAck1 => "WAIT_ACK1",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
