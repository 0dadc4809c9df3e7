//! Aging reclaim: forced window progress when a hole never fills.
//!
//! A session with buffered frames keeps one deadline timer armed. When it
//! fires, the window start jumps to the next buffered frame, the positions in
//! between are given up as lost, and the contiguous run starting there is
//! released. Exactly one hole is resolved per expiry; if frames remain
//! buffered the timer is armed again for another full timeout.
//!
//! # Timer policy
//!
//! Evaluated after every admission and window update:
//!
//! | armed | occupied | window progressed | action    |
//! |-------|----------|------------------|-----------|
//! | no    | > 0      | any              | `Arm`     |
//! | no    | 0        | any              | `Keep`    |
//! | yes   | 0        | any              | `Disarm`  |
//! | yes   | > 0      | yes              | `Restart` |
//! | yes   | > 0      | no               | `Keep`    |
//!
//! "Progressed" means the frame at the window start arrived, or the window
//! was scrolled forward.

use super::buffer::ReorderBuffer;
use crate::sequence::SeqNum;

/// What to do with a session's aging timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the timer action must be applied to the session's deadline"]
pub enum TimerAction {
    /// Leave the timer as it is (armed or not).
    Keep,
    /// Start the timer; it was not running.
    Arm,
    /// Push the running timer's deadline out by a full timeout.
    Restart,
    /// Stop the running timer.
    Disarm,
}

impl TimerAction {
    /// Whether the timer is running after applying this action to a timer
    /// whose previous state was `armed`.
    pub fn armed_after(self, armed: bool) -> bool {
        match self {
            Self::Keep => armed,
            Self::Arm | Self::Restart => true,
            Self::Disarm => false,
        }
    }
}

/// Decide the timer action after a window change.
pub fn timer_decision(armed: bool, occupied: usize, progressed: bool) -> TimerAction {
    match (armed, occupied > 0) {
        (false, true) => TimerAction::Arm,
        (false, false) => TimerAction::Keep,
        (true, false) => TimerAction::Disarm,
        (true, true) if progressed => TimerAction::Restart,
        (true, true) => TimerAction::Keep,
    }
}

/// Frames released by one reclaim pass.
#[derive(Debug)]
pub(crate) struct Reclaimed<F> {
    /// Released frames in sequence order.
    pub released: Vec<(SeqNum, F)>,
    /// Positions given up as lost.
    pub skipped: u16,
}

impl<F> Default for Reclaimed<F> {
    fn default() -> Self {
        Self {
            released: Vec::new(),
            skipped: 0,
        }
    }
}

/// Skip the hole at `expected` and release the run that follows it.
///
/// Scans forward from `expected + 1` for at most `window` positions. On the
/// first buffered frame, `expected` jumps there and the contiguous run
/// starting at that frame is drained, leaving `expected` just past it.
pub(crate) fn reclaim_next_hole<F>(
    reorder: &mut ReorderBuffer<F>,
    expected: &mut SeqNum,
    window: u16,
) -> Reclaimed<F> {
    let mut candidate = expected.next();

    for gap in 1..=window {
        if reorder.holds(candidate) {
            *expected = candidate;
            let released = reorder.drain_contiguous_from(candidate, || {
                *expected = expected.next();
                *expected
            });
            return Reclaimed {
                released,
                skipped: gap,
            };
        }
        candidate = candidate.next();
    }

    Reclaimed::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_reorder_macros::ba_test;

    fn sn(raw: u16) -> SeqNum {
        SeqNum::new(raw)
    }

    fn buffer_with(capacity: u16, base: u16, held: &[u16]) -> ReorderBuffer<u16> {
        let mut buffer = ReorderBuffer::try_new(capacity, sn(base)).unwrap();
        for &raw in held {
            buffer.store(sn(raw), raw).unwrap();
        }
        buffer
    }

    #[ba_test]
    fn test_timer_decision_table() {
        assert_eq!(timer_decision(false, 1, false), TimerAction::Arm);
        assert_eq!(timer_decision(false, 1, true), TimerAction::Arm);
        assert_eq!(timer_decision(false, 0, true), TimerAction::Keep);
        assert_eq!(timer_decision(true, 0, false), TimerAction::Disarm);
        assert_eq!(timer_decision(true, 0, true), TimerAction::Disarm);
        assert_eq!(timer_decision(true, 2, true), TimerAction::Restart);
        assert_eq!(timer_decision(true, 2, false), TimerAction::Keep);
    }

    #[ba_test]
    fn test_armed_after() {
        assert!(TimerAction::Keep.armed_after(true));
        assert!(!TimerAction::Keep.armed_after(false));
        assert!(TimerAction::Arm.armed_after(false));
        assert!(TimerAction::Restart.armed_after(true));
        assert!(!TimerAction::Disarm.armed_after(true));
    }

    #[ba_test]
    fn test_reclaim_skips_single_hole() {
        let mut buffer = buffer_with(4, 0, &[1, 2]);
        let mut expected = sn(0);

        let reclaimed = reclaim_next_hole(&mut buffer, &mut expected, 4);

        let order: Vec<u16> = reclaimed.released.iter().map(|(_, f)| *f).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(reclaimed.skipped, 1);
        assert_eq!(expected, sn(3));
        assert!(buffer.is_empty());
    }

    #[ba_test]
    fn test_reclaim_resolves_one_hole_per_pass() {
        let mut buffer = buffer_with(8, 0, &[2, 5, 6]);
        let mut expected = sn(0);

        let first = reclaim_next_hole(&mut buffer, &mut expected, 8);
        assert_eq!(first.released.len(), 1);
        assert_eq!(first.skipped, 2);
        assert_eq!(expected, sn(3));
        assert_eq!(buffer.occupied(), 2);

        let second = reclaim_next_hole(&mut buffer, &mut expected, 8);
        let order: Vec<u16> = second.released.iter().map(|(_, f)| *f).collect();
        assert_eq!(order, vec![5, 6]);
        assert_eq!(second.skipped, 2);
        assert_eq!(expected, sn(7));
        assert!(buffer.is_empty());
    }

    #[ba_test]
    fn test_reclaim_across_wrap() {
        let mut buffer = buffer_with(4, 4094, &[0]);
        let mut expected = sn(4094);

        let reclaimed = reclaim_next_hole(&mut buffer, &mut expected, 4);
        assert_eq!(reclaimed.released, vec![(sn(0), 0)]);
        assert_eq!(reclaimed.skipped, 2);
        assert_eq!(expected, sn(1));
    }

    #[ba_test]
    fn test_reclaim_empty_buffer_is_noop() {
        let mut buffer = buffer_with(4, 0, &[]);
        let mut expected = sn(7);

        let reclaimed = reclaim_next_hole(&mut buffer, &mut expected, 4);
        assert!(reclaimed.released.is_empty());
        assert_eq!(expected, sn(7));
    }
}
