//! 12-bit sequence number space.
//!
//! 802.11 sequence numbers live in `[0, 4096)` and wrap. Ordering between two
//! numbers is only meaningful relative to each other, so every comparison goes
//! through the half-space rule: `a` is behind `b` when the forward distance
//! from `b` to `a` is more than half the space.
//!
//! ```text
//!        behind b                 ahead of b
//!   <------------------ b ------------------>
//!   (b - 2048, b)       |       [b, b + 2048]
//! ```
//!
//! # Example
//!
//! ```
//! use ba_reorder::SeqNum;
//!
//! let last = SeqNum::new(4095);
//! let first = SeqNum::new(0);
//!
//! assert_eq!(first.distance_forward(last), 1);
//! assert!(last.is_older(first));
//! assert!(!first.is_older(last));
//! ```

use std::fmt;

/// Size of the sequence number space.
pub const SEQ_MODULUS: u16 = 4096;

/// Mask applied after every arithmetic step.
const SEQ_MASK: u16 = SEQ_MODULUS - 1;

/// Half of the sequence space; splits "ahead" from "behind".
pub const WINDOW_BOUNDARY: u16 = 2048;

/// A 12-bit wrapping sequence number.
///
/// There is intentionally no `PartialOrd`: use [`SeqNum::is_older`] or
/// [`SeqNum::distance_forward`] instead of native comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u16);

impl SeqNum {
    /// Create a sequence number, discarding bits above the 12-bit range.
    pub const fn new(raw: u16) -> Self {
        Self(raw & SEQ_MASK)
    }

    /// Raw value in `[0, 4096)`.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// How far ahead `self` is of `other`, modulo 4096.
    #[inline]
    pub const fn distance_forward(self, other: SeqNum) -> u16 {
        self.0.wrapping_sub(other.0) & SEQ_MASK
    }

    /// True when `self` lies in the half of the space behind `other`.
    #[inline]
    pub const fn is_older(self, other: SeqNum) -> bool {
        self.distance_forward(other) > WINDOW_BOUNDARY
    }

    /// The sequence number `n` positions ahead.
    #[inline]
    pub const fn add(self, n: u16) -> Self {
        Self::new(self.0.wrapping_add(n))
    }

    /// The sequence number `n` positions behind.
    #[inline]
    pub const fn sub(self, n: u16) -> Self {
        Self::new(self.0.wrapping_sub(n))
    }

    /// The next sequence number.
    #[inline]
    pub const fn next(self) -> Self {
        self.add(1)
    }
}

impl From<u16> for SeqNum {
    fn from(raw: u16) -> Self {
        Self::new(raw)
    }
}

impl From<SeqNum> for u16 {
    fn from(sn: SeqNum) -> Self {
        sn.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
