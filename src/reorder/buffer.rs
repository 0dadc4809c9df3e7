//! Fixed-capacity circular reorder buffer for one Block-Ack session.
//!
//! Slots are addressed by [`SlotIndex`], which can only be produced by
//! [`ReorderBuffer::index_for`]; that is the single place sequence numbers are
//! mapped onto slots:
//!
//! ```text
//! index = distance_forward(sn, base) % capacity
//! ```
//!
//! Each occupied slot remembers the sequence number it was stored for, and
//! every sequence-addressed take checks it. When the capacity does not divide
//! 4096 two sequence numbers one lap apart can share a slot; the check keeps
//! such a frame from being released at the wrong position. The mapping base is
//! moved to the window start whenever the buffer is empty, which keeps those
//! collisions out of any window that does not span a full lap of the space.

use crate::sequence::SeqNum;
use std::fmt;

/// Largest negotiable Block-Ack window.
pub const MAX_BA_BUFFER_SIZE: u16 = 64;

/// Position of a slot inside a [`ReorderBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Raw slot position, always below the owning buffer's capacity.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A buffered frame together with the sequence number it arrived with.
#[derive(Debug)]
struct FrameSlot<F> {
    sequence_number: SeqNum,
    payload: F,
}

/// Buffer size outside `1..=MAX_BA_BUFFER_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidBufferSize(pub u16);

impl fmt::Display for InvalidBufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid buffer size {} (must be 1..={})",
            self.0, MAX_BA_BUFFER_SIZE
        )
    }
}

impl std::error::Error for InvalidBufferSize {}

/// A frame the buffer refused to store. The frame is handed back so the
/// caller decides how to dispose of it.
pub enum Rejected<F> {
    /// The target slot already holds a frame.
    SlotOccupied {
        /// Slot that was targeted.
        index: SlotIndex,
        /// Sequence number already held by the slot.
        resident: SeqNum,
        /// The refused frame.
        frame: F,
    },
}

impl<F> Rejected<F> {
    /// Take back the refused frame.
    pub fn into_frame(self) -> F {
        match self {
            Self::SlotOccupied { frame, .. } => frame,
        }
    }
}

impl<F> fmt::Debug for Rejected<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotOccupied {
                index, resident, ..
            } => f
                .debug_struct("SlotOccupied")
                .field("index", index)
                .field("resident", resident)
                .finish_non_exhaustive(),
        }
    }
}

impl<F> fmt::Display for Rejected<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotOccupied {
                index, resident, ..
            } => write!(f, "slot {} already holds sn={}", index, resident),
        }
    }
}

impl<F> std::error::Error for Rejected<F> {}

/// Circular array of frame slots.
pub struct ReorderBuffer<F> {
    slots: Box<[Option<FrameSlot<F>>]>,
    /// Sequence number mapped to slot 0.
    base: SeqNum,
    occupied: usize,
}

impl<F> ReorderBuffer<F> {
    /// Create an empty buffer with `capacity` slots whose index mapping
    /// starts at `base`, rejecting capacities outside `1..=MAX_BA_BUFFER_SIZE`.
    pub fn try_new(capacity: u16, base: SeqNum) -> Result<Self, InvalidBufferSize> {
        if capacity == 0 || capacity > MAX_BA_BUFFER_SIZE {
            return Err(InvalidBufferSize(capacity));
        }
        let slots = (0..capacity).map(|_| None).collect();
        Ok(Self {
            slots,
            base,
            occupied: 0,
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> u16 {
        // Bounded by MAX_BA_BUFFER_SIZE at construction
        self.slots.len() as u16
    }

    /// Number of slots currently holding a frame.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// True when no slot holds a frame.
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Sequence number currently mapped to slot 0.
    #[cfg(test)]
    fn base(&self) -> SeqNum {
        self.base
    }

    /// Map a sequence number to its slot.
    #[inline]
    pub fn index_for(&self, sn: SeqNum) -> SlotIndex {
        SlotIndex(usize::from(sn.distance_forward(self.base)) % self.slots.len())
    }

    /// True when the slot holds a frame.
    #[cfg(test)]
    fn is_active(&self, index: SlotIndex) -> bool {
        self.slots
            .get(index.0)
            .is_some_and(|slot| slot.is_some())
    }

    /// True when the slot for `sn` holds the frame stored for exactly `sn`.
    pub fn holds(&self, sn: SeqNum) -> bool {
        matches!(
            self.slots.get(self.index_for(sn).0),
            Some(Some(slot)) if slot.sequence_number == sn
        )
    }

    /// Move the index mapping so `base` lands on slot 0.
    ///
    /// Only done while the buffer is empty; returns whether it happened.
    pub fn rebase_if_empty(&mut self, base: SeqNum) -> bool {
        if self.occupied != 0 {
            return false;
        }
        self.base = base;
        true
    }

    /// Store the frame for `sn` in its slot and return that slot.
    ///
    /// Fails with [`Rejected::SlotOccupied`] (returning the frame) if the slot
    /// already holds one.
    pub fn store(&mut self, sn: SeqNum, frame: F) -> Result<SlotIndex, Rejected<F>> {
        let index = self.index_for(sn);
        // index_for reduces modulo the slot count
        let slot = &mut self.slots[index.0];
        if let Some(resident) = slot {
            return Err(Rejected::SlotOccupied {
                index,
                resident: resident.sequence_number,
                frame,
            });
        }
        *slot = Some(FrameSlot {
            sequence_number: sn,
            payload: frame,
        });
        self.occupied += 1;
        Ok(index)
    }

    /// Clear a slot and return its contents, if it held a frame.
    pub fn take_if_active(&mut self, index: SlotIndex) -> Option<(SeqNum, F)> {
        let slot = self.slots.get_mut(index.0)?.take()?;
        self.occupied -= 1;
        Some((slot.sequence_number, slot.payload))
    }

    /// Take the frame stored for exactly `sn`, leaving the slot alone if it
    /// is empty or holds a different sequence number.
    pub fn take_sequence(&mut self, sn: SeqNum) -> Option<F> {
        if !self.holds(sn) {
            return None;
        }
        self.take_if_active(self.index_for(sn))
            .map(|(_, frame)| frame)
    }

    /// Release the run of frames contiguous with `start`.
    ///
    /// Takes the frame for `start`, calls `advance` (which moves the caller's
    /// window forward one position and returns the new start) and repeats
    /// until the next position is empty. Frames are returned in order.
    pub fn drain_contiguous_from(
        &mut self,
        start: SeqNum,
        mut advance: impl FnMut() -> SeqNum,
    ) -> Vec<(SeqNum, F)> {
        let mut drained = Vec::new();
        let mut sn = start;
        while let Some(frame) = self.take_sequence(sn) {
            drained.push((sn, frame));
            sn = advance();
        }
        drained
    }

    /// Empty every slot, walking once around the ring starting at the slot
    /// for `start`.
    pub fn drain_all_from(&mut self, start: SeqNum) -> Vec<(SeqNum, F)> {
        let capacity = self.slots.len();
        let first = self.index_for(start).0;
        let mut drained = Vec::with_capacity(self.occupied);
        for offset in 0..capacity {
            let index = SlotIndex((first + offset) % capacity);
            if let Some(entry) = self.take_if_active(index) {
                drained.push(entry);
            }
        }
        drained
    }
}

impl<F> fmt::Debug for ReorderBuffer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderBuffer")
            .field("capacity", &self.slots.len())
            .field("base", &self.base)
            .field("occupied", &self.occupied)
            .finish()
    }
}
