//! Peer and traffic identifier types.

use std::fmt;

/// Highest traffic identifier that can carry a Block-Ack session (QoS UP7).
pub const MAX_TID: u8 = 7;

/// Number of traffic identifiers tracked per peer.
pub const NUM_TIDS: usize = MAX_TID as usize + 1;

/// Peer MAC address.
///
/// Identifies the transmitter of a Block-Ack session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Create a peer address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// How a peer is linked to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerKind {
    /// Associated through an access point (or is the access point).
    #[default]
    Infrastructure,
    /// Direct link set up with TDLS.
    ///
    /// Old frames from a TDLS peer are always delivered; some peers resume
    /// with stale sequence numbers right after link setup.
    Tdls,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Tdls => write!(f, "TDLS"),
        }
    }
}

/// Traffic identifier in `0..=MAX_TID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(u8);

impl Tid {
    /// Validate a raw traffic identifier.
    pub const fn new(raw: u8) -> Result<Self, InvalidTid> {
        if raw > MAX_TID {
            return Err(InvalidTid(raw));
        }
        Ok(Self(raw))
    }

    /// Raw value.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Position in a per-peer session table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Tid {
    type Error = InvalidTid;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traffic identifier above [`MAX_TID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTid(pub u8);

impl fmt::Display for InvalidTid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid TID {} (must be 0..={})", self.0, MAX_TID)
    }
}

impl std::error::Error for InvalidTid {}
