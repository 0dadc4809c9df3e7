//! Block-Ack control-plane messages.
//!
//! Inbound, the control plane reports negotiated Block-Ack agreements as
//! [`BlockAckIndication`]s. Only receive-direction agreements matter to the
//! reorder engine; [`BlockAckIndication::action`] turns one into the engine
//! operation it stands for.
//!
//! Outbound, the engine asks the control plane to tear a session down with a
//! [`TeardownRequest`] when it sees a frame it cannot place.
//!
//! # Parameter set layout
//!
//! ```text
//!  15            6 5     2   1        0
//! +---------------+-------+--------+-------+
//! |  buffer size  |  TID  | policy | AMSDU |
//! +---------------+-------+--------+-------+
//! ```

use crate::peer::{InvalidTid, PeerAddress, Tid};
use crate::sequence::SeqNum;
use std::fmt;

const TID_SHIFT: u16 = 2;
const TID_MASK: u16 = 0xF;
const BUFFER_SIZE_SHIFT: u16 = 6;
const BUFFER_SIZE_MASK: u16 = 0x3FF;

/// Block-Ack parameter set field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAckParameterSet(u16);

impl BlockAckParameterSet {
    /// Wrap a raw parameter set.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Build a parameter set from its TID and buffer size fields.
    pub const fn from_parts(tid: u8, buffer_size: u16) -> Self {
        Self(
            ((tid as u16 & TID_MASK) << TID_SHIFT)
                | ((buffer_size & BUFFER_SIZE_MASK) << BUFFER_SIZE_SHIFT),
        )
    }

    /// Raw field value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Raw 4-bit TID field, not range checked.
    pub const fn tid(self) -> u8 {
        ((self.0 >> TID_SHIFT) & TID_MASK) as u8
    }

    /// Buffer size field.
    pub const fn buffer_size(self) -> u16 {
        (self.0 >> BUFFER_SIZE_SHIFT) & BUFFER_SIZE_MASK
    }
}

/// Why the indication was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAckReason {
    /// Agreement established.
    Start,
    /// Agreement deleted.
    End,
    /// Transmitter moved its window (Block-Ack request).
    WindowUpdate,
}

/// Which side of the agreement we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAckDirection {
    /// We transmit; aggregation is handled by firmware.
    Transmit,
    /// We receive and must reorder.
    Receive,
}

/// Block-Ack indication from the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAckIndication {
    /// Peer the agreement is with.
    pub peer: PeerAddress,
    /// Negotiated parameters.
    pub parameter_set: BlockAckParameterSet,
    /// Starting sequence number, or the new window start for updates.
    pub sequence_number: SeqNum,
    /// Why the indication was sent.
    pub reason: BlockAckReason,
    /// Direction of the agreement.
    pub direction: BlockAckDirection,
}

/// Engine operation an indication maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAckAction {
    /// Nothing to do.
    Ignore,
    /// Start (or restart) a session.
    Start {
        tid: Tid,
        buffer_size: u16,
        start_sn: SeqNum,
    },
    /// Stop the session.
    Stop { tid: Tid },
    /// Move the window start.
    UpdateWindow { tid: Tid, sequence_number: SeqNum },
}

impl BlockAckIndication {
    /// Decide what the engine has to do with this indication.
    pub fn action(&self) -> Result<BlockAckAction, InvalidTid> {
        let tid = Tid::new(self.parameter_set.tid())?;
        if self.direction == BlockAckDirection::Transmit {
            return Ok(BlockAckAction::Ignore);
        }
        Ok(match self.reason {
            BlockAckReason::Start => BlockAckAction::Start {
                tid,
                buffer_size: self.parameter_set.buffer_size(),
                start_sn: self.sequence_number,
            },
            BlockAckReason::End => BlockAckAction::Stop { tid },
            BlockAckReason::WindowUpdate => BlockAckAction::UpdateWindow {
                tid,
                sequence_number: self.sequence_number,
            },
        })
    }
}

/// Why teardown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// A frame arrived too far behind the window to be explained by
    /// reordering.
    OutOfRangeSequenceNumber,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRangeSequenceNumber => write!(f, "out-of-range sequence number"),
        }
    }
}

/// Request to tear down a receive Block-Ack session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownRequest {
    /// Transmitter of the session.
    pub peer: PeerAddress,
    /// Session TID.
    pub tid: Tid,
    /// Sequence number of the offending frame.
    pub sequence_number: SeqNum,
    /// Why.
    pub reason: TeardownReason,
}

impl fmt::Display for TeardownRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "teardown {} tid {} at sn {} ({})",
            self.peer, self.tid, self.sequence_number, self.reason
        )
    }
}
