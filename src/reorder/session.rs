//! Block-Ack session state and per-frame admission.
//!
//! A [`BaSession`] owns the receive window of one (peer, TID) pair. Every
//! operation returns the frames it released, in delivery order, plus what the
//! caller has to do with the session's aging timer. The session itself never
//! talks to the outside world; the engine forwards released frames to the
//! delivery sink and teardown requests to the control plane.
//!
//! # Admission
//!
//! ```text
//!              behind window          window (buffer_size)         beyond
//!   ... -------------------------|[expected ... expected+bs-1]|---------- ...
//!        pass through (old)        deliver or buffer            scroll, then buffer
//! ```
//!
//! Frames behind the window are delivered immediately and never reordered.
//! Whether they count as harmless or as a sign of lost sync depends on the
//! session having seen any in-window frame yet, the peer being a TDLS link,
//! and how far the frame trails the highest sequence number seen.

use super::aging::{reclaim_next_hole, timer_decision, Reclaimed, TimerAction};
use super::buffer::{InvalidBufferSize, ReorderBuffer};
use crate::peer::Tid;
use crate::sequence::{SeqNum, WINDOW_BOUNDARY};
use log::{debug, warn};
use std::fmt;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stopped; frames are no longer processed.
    Inactive,
    /// Accepting frames.
    Active {
        /// At least one frame landed inside the window.
        triggered: bool,
        /// Teardown has been requested; frames keep flowing until stopped.
        closing: bool,
    },
}

/// Why an old frame was delivered without reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
    /// No frame has landed inside the window yet.
    NotTriggered,
    /// The peer is a TDLS link.
    Tdls,
    /// Still within one window of the highest sequence number seen.
    Late,
    /// Too far behind to be explained by reordering.
    OutOfRange,
}

impl fmt::Display for PassThrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotTriggered => write!(f, "not triggered"),
            Self::Tdls => write!(f, "TDLS"),
            Self::Late => write!(f, "late"),
            Self::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// How a released frame left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// In window order.
    InOrder,
    /// Old frame delivered immediately.
    PassThrough(PassThrough),
    /// Flushed by a stop.
    Flush,
}

/// A frame released by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released<F> {
    /// Sequence number the frame arrived with.
    pub sequence_number: SeqNum,
    /// The frame.
    pub frame: F,
    /// How it was released.
    pub release: Release,
}

impl<F> Released<F> {
    fn in_order((sequence_number, frame): (SeqNum, F)) -> Self {
        Self {
            sequence_number,
            frame,
            release: Release::InOrder,
        }
    }
}

/// What happened to the admitted frame itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// It was the expected frame and went straight out.
    Delivered,
    /// Stored until the window reaches it.
    Buffered,
    /// Its slot was already taken; the frame was dropped.
    Duplicate,
    /// Old frame, delivered without reordering.
    PassedThrough(PassThrough),
}

/// Per-peer knobs that influence admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmitPolicy {
    /// Deliver every old frame without judging it (TDLS peers).
    pub tdls: bool,
    /// Ask for teardown on out-of-range frames.
    pub out_of_range_teardown: bool,
}

/// Result of admitting one frame.
#[derive(Debug)]
#[must_use]
pub struct AdmitOutcome<F> {
    /// Frames to deliver, in order.
    pub released: Vec<Released<F>>,
    /// Fate of the admitted frame.
    pub disposition: Disposition,
    /// Aging timer change.
    pub timer: TimerAction,
    /// Teardown must be requested, carrying this sequence number.
    pub teardown: Option<SeqNum>,
    /// The window was scrolled to make room.
    pub scrolled: bool,
    /// Positions given up as lost by the scroll.
    pub skipped: u16,
}

/// Result of a forced window move (aging expiry or window update).
#[derive(Debug)]
#[must_use]
pub struct Advance<F> {
    /// Frames to deliver, in order.
    pub released: Vec<Released<F>>,
    /// Positions given up as lost.
    pub skipped: u16,
    /// Aging timer change.
    pub timer: TimerAction,
}

impl<F> Advance<F> {
    fn idle() -> Self {
        Self {
            released: Vec::new(),
            skipped: 0,
            timer: TimerAction::Keep,
        }
    }
}

/// Result of starting an already existing session again.
#[derive(Debug)]
#[must_use]
pub enum Restart<F> {
    /// Same window parameters; nothing was reset.
    Unchanged,
    /// The old window was flushed and the session re-initialized.
    Reset {
        /// Frames that were buffered in the old window.
        flushed: Vec<Released<F>>,
    },
}

/// Frame handed to a session that is no longer active.
#[derive(Debug)]
pub struct SessionInactive<F>(pub F);

impl<F> fmt::Display for SessionInactive<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session is not active")
    }
}

impl<F: fmt::Debug> std::error::Error for SessionInactive<F> {}

/// Read-only view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Traffic identifier.
    pub tid: Tid,
    /// Negotiated window size.
    pub buffer_size: u16,
    /// Window start at negotiation.
    pub start_sn: SeqNum,
    /// Current window start.
    pub expected_sn: SeqNum,
    /// Highest in-window sequence number seen.
    pub highest_received_sn: SeqNum,
    /// Slots holding a frame.
    pub occupied: usize,
    /// An in-window frame has been seen.
    pub triggered: bool,
    /// Teardown has been requested.
    pub closing: bool,
    /// The aging timer is running.
    pub timer_armed: bool,
}

/// Receive-side Block-Ack session.
pub struct BaSession<F> {
    tid: Tid,
    state: SessionState,
    buffer_size: u16,
    start_sn: SeqNum,
    expected_sn: SeqNum,
    highest_received_sn: SeqNum,
    timer_armed: bool,
    reorder: ReorderBuffer<F>,
}

impl<F> BaSession<F> {
    /// Start a session with a freshly negotiated window.
    pub fn start(tid: Tid, buffer_size: u16, start_sn: SeqNum) -> Result<Self, InvalidBufferSize> {
        let reorder = ReorderBuffer::try_new(buffer_size, start_sn)?;
        Ok(Self {
            tid,
            state: SessionState::Active {
                triggered: false,
                closing: false,
            },
            buffer_size,
            start_sn,
            expected_sn: start_sn,
            highest_received_sn: SeqNum::new(0),
            timer_armed: false,
            reorder,
        })
    }

    /// Apply a new start event to this session.
    ///
    /// An active session whose window size matches and whose window start
    /// sits exactly at `start_sn` is left alone. Anything else flushes the
    /// old window and starts over.
    pub fn restart(
        &mut self,
        buffer_size: u16,
        start_sn: SeqNum,
    ) -> Result<Restart<F>, InvalidBufferSize> {
        let reorder = ReorderBuffer::try_new(buffer_size, start_sn)?;

        if self.is_active() && self.buffer_size == buffer_size && self.expected_sn == start_sn {
            debug!("tid {}: restart with unchanged window, keeping state", self.tid);
            return Ok(Restart::Unchanged);
        }

        let flushed = self.stop();
        *self = Self {
            tid: self.tid,
            state: SessionState::Active {
                triggered: false,
                closing: false,
            },
            buffer_size,
            start_sn,
            expected_sn: start_sn,
            highest_received_sn: SeqNum::new(0),
            timer_armed: false,
            reorder,
        };
        Ok(Restart::Reset { flushed })
    }

    /// Traffic identifier.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while frames are processed.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Negotiated window size.
    pub fn buffer_size(&self) -> u16 {
        self.buffer_size
    }

    /// Current window start.
    pub fn expected_sn(&self) -> SeqNum {
        self.expected_sn
    }

    /// Highest in-window sequence number seen.
    pub fn highest_received_sn(&self) -> SeqNum {
        self.highest_received_sn
    }

    /// Slots holding a frame.
    pub fn occupied(&self) -> usize {
        self.reorder.occupied()
    }

    /// True while the aging timer should be running.
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let (triggered, closing) = match self.state {
            SessionState::Active { triggered, closing } => (triggered, closing),
            SessionState::Inactive => (false, false),
        };
        SessionSnapshot {
            tid: self.tid,
            buffer_size: self.buffer_size,
            start_sn: self.start_sn,
            expected_sn: self.expected_sn,
            highest_received_sn: self.highest_received_sn,
            occupied: self.reorder.occupied(),
            triggered,
            closing,
            timer_armed: self.timer_armed,
        }
    }

    /// Admit one received frame.
    pub fn admit(
        &mut self,
        sn: SeqNum,
        frame: F,
        policy: AdmitPolicy,
    ) -> Result<AdmitOutcome<F>, SessionInactive<F>> {
        let SessionState::Active { triggered, closing } = self.state else {
            return Err(SessionInactive(frame));
        };

        let mut released = Vec::new();
        let mut teardown = None;
        let mut scrolled = false;
        let mut skipped = 0;
        let mut progressed = false;

        let disposition = if sn.distance_forward(self.expected_sn) <= WINDOW_BOUNDARY {
            self.state = SessionState::Active {
                triggered: true,
                closing,
            };

            let far_edge = self.expected_sn.add(self.buffer_size);
            if sn.distance_forward(far_edge) <= WINDOW_BOUNDARY {
                let new_expected = sn.sub(self.buffer_size).next();
                debug!(
                    "tid {}: sn {} beyond window end {}, scrolling {} -> {}",
                    self.tid, sn, far_edge, self.expected_sn, new_expected
                );
                skipped = self.scroll_to(new_expected, &mut released);
                scrolled = true;
                progressed = true;
            }

            let disposition = if sn == self.expected_sn {
                self.expected_sn = self.expected_sn.next();
                released.push(Released::in_order((sn, frame)));
                progressed = true;
                Disposition::Delivered
            } else {
                self.reorder.rebase_if_empty(self.expected_sn);
                match self.reorder.store(sn, frame) {
                    Ok(index) => {
                        debug!("tid {}: buffered sn {} in slot {}", self.tid, sn, index);
                        Disposition::Buffered
                    }
                    Err(rejected) => {
                        warn!("tid {}: dropping duplicate sn {}: {}", self.tid, sn, rejected);
                        drop(rejected.into_frame());
                        Disposition::Duplicate
                    }
                }
            };

            if !sn.is_older(self.highest_received_sn) {
                self.highest_received_sn = sn;
            }
            disposition
        } else {
            let reason = if !triggered {
                PassThrough::NotTriggered
            } else if policy.tdls {
                PassThrough::Tdls
            } else if self.highest_received_sn.is_older(sn.add(self.buffer_size)) {
                PassThrough::Late
            } else {
                PassThrough::OutOfRange
            };

            debug!(
                "tid {}: old sn {} (expected {}), passing through ({})",
                self.tid, sn, self.expected_sn, reason
            );

            if reason == PassThrough::OutOfRange && policy.out_of_range_teardown && !closing {
                warn!(
                    "tid {}: sn {} is out of range (expected {}, highest {}), requesting teardown",
                    self.tid, sn, self.expected_sn, self.highest_received_sn
                );
                self.state = SessionState::Active {
                    triggered,
                    closing: true,
                };
                teardown = Some(sn);
            }

            released.push(Released {
                sequence_number: sn,
                frame,
                release: Release::PassThrough(reason),
            });
            Disposition::PassedThrough(reason)
        };

        self.release_contiguous(&mut released);
        let timer = self.settle_timer(progressed);

        Ok(AdmitOutcome {
            released,
            disposition,
            timer,
            teardown,
            scrolled,
            skipped,
        })
    }

    /// Move the window start forward to `sn` on the transmitter's request.
    ///
    /// Targets behind the window are ignored.
    pub fn update_window(&mut self, sn: SeqNum) -> Advance<F> {
        if !self.is_active() {
            return Advance::idle();
        }

        let gap = sn.distance_forward(self.expected_sn);
        if gap > WINDOW_BOUNDARY {
            debug!(
                "tid {}: window update to {} is behind expected {}, ignoring",
                self.tid, sn, self.expected_sn
            );
            return Advance::idle();
        }

        let mut released = Vec::new();
        let skipped = self.scroll_to(sn, &mut released);
        self.release_contiguous(&mut released);
        let timer = self.settle_timer(gap > 0);

        Advance {
            released,
            skipped,
            timer,
        }
    }

    /// Handle expiry of the aging timer.
    ///
    /// Skips the hole at the window start and releases the run behind it.
    /// Only one hole is resolved per expiry.
    pub fn age_timeout(&mut self) -> Advance<F> {
        self.timer_armed = false;
        if !self.is_active() || self.reorder.is_empty() {
            return Advance::idle();
        }

        let from = self.expected_sn;
        let Reclaimed {
            released,
            skipped,
        } = reclaim_next_hole(&mut self.reorder, &mut self.expected_sn, self.buffer_size);
        debug!(
            "tid {}: aging moved window {} -> {}, {} lost, {} released",
            self.tid,
            from,
            self.expected_sn,
            skipped,
            released.len()
        );

        let timer = if self.reorder.is_empty() {
            TimerAction::Keep
        } else {
            self.timer_armed = true;
            TimerAction::Arm
        };

        Advance {
            released: released.into_iter().map(Released::in_order).collect(),
            skipped,
            timer,
        }
    }

    /// Stop the session, flushing every buffered frame.
    ///
    /// Frames come out in slot order starting at the window start. The
    /// caller must cancel any pending timer.
    pub fn stop(&mut self) -> Vec<Released<F>> {
        if !self.is_active() {
            return Vec::new();
        }

        let flushed: Vec<_> = self
            .reorder
            .drain_all_from(self.expected_sn)
            .into_iter()
            .map(|(sequence_number, frame)| Released {
                sequence_number,
                frame,
                release: Release::Flush,
            })
            .collect();
        self.state = SessionState::Inactive;
        self.timer_armed = false;
        flushed
    }

    /// Step the window start to `target`, releasing buffered frames on the
    /// way. Returns the number of positions passed without a frame.
    fn scroll_to(&mut self, target: SeqNum, released: &mut Vec<Released<F>>) -> u16 {
        let gap = target.distance_forward(self.expected_sn);
        let mut delivered = 0;
        for _ in 0..gap.min(self.buffer_size) {
            if let Some(frame) = self.reorder.take_sequence(self.expected_sn) {
                released.push(Released::in_order((self.expected_sn, frame)));
                delivered += 1;
            }
            self.expected_sn = self.expected_sn.next();
        }
        self.expected_sn = target;
        gap - delivered
    }

    /// Release the run of buffered frames starting at the window start.
    fn release_contiguous(&mut self, released: &mut Vec<Released<F>>) {
        let expected = &mut self.expected_sn;
        let drained = self.reorder.drain_contiguous_from(*expected, || {
            *expected = expected.next();
            *expected
        });
        released.extend(drained.into_iter().map(Released::in_order));
    }

    fn settle_timer(&mut self, progressed: bool) -> TimerAction {
        let action = timer_decision(self.timer_armed, self.reorder.occupied(), progressed);
        self.timer_armed = action.armed_after(self.timer_armed);
        action
    }
}

impl<F> fmt::Debug for BaSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaSession")
            .field("tid", &self.tid)
            .field("state", &self.state)
            .field("buffer_size", &self.buffer_size)
            .field("start_sn", &self.start_sn)
            .field("expected_sn", &self.expected_sn)
            .field("highest_received_sn", &self.highest_received_sn)
            .field("timer_armed", &self.timer_armed)
            .field("reorder", &self.reorder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_reorder_macros::ba_test;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    const STRICT: AdmitPolicy = AdmitPolicy {
        tdls: false,
        out_of_range_teardown: true,
    };

    fn sn(raw: u16) -> SeqNum {
        SeqNum::new(raw)
    }

    fn session(buffer_size: u16, start: u16) -> BaSession<u16> {
        BaSession::start(Tid::new(1).unwrap(), buffer_size, sn(start)).unwrap()
    }

    fn admit(session: &mut BaSession<u16>, raw: u16) -> AdmitOutcome<u16> {
        session.admit(sn(raw), raw, STRICT).unwrap()
    }

    fn frames(released: &[Released<u16>]) -> Vec<u16> {
        released.iter().map(|r| r.frame).collect()
    }

    // ==== Lifecycle Tests ====

    #[ba_test]
    fn test_start_rejects_invalid_window() {
        let tid = Tid::new(0).unwrap();
        assert!(BaSession::<u16>::start(tid, 0, sn(0)).is_err());
        assert!(BaSession::<u16>::start(tid, 65, sn(0)).is_err());
        assert!(BaSession::<u16>::start(tid, 64, sn(0)).is_ok());
    }

    #[ba_test]
    fn test_start_initial_state() {
        let s = session(8, 300);
        let snap = s.snapshot();
        assert_eq!(snap.expected_sn, sn(300));
        assert_eq!(snap.start_sn, sn(300));
        assert_eq!(snap.highest_received_sn, sn(0));
        assert!(!snap.triggered);
        assert!(!snap.closing);
        assert!(!snap.timer_armed);
        assert_eq!(snap.occupied, 0);
    }

    #[ba_test]
    fn test_restart_with_same_window_keeps_state() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 2);
        let before = s.snapshot();

        assert!(matches!(s.restart(4, sn(0)).unwrap(), Restart::Unchanged));
        assert_eq!(s.snapshot(), before);
        assert_eq!(s.occupied(), 1);
        assert_eq!(s.highest_received_sn(), sn(2));
    }

    #[ba_test]
    fn test_restart_with_new_window_flushes() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 2);
        let _ = admit(&mut s, 3);

        let Restart::Reset { flushed } = s.restart(8, sn(500)).unwrap() else {
            panic!("expected reset");
        };
        assert_eq!(frames(&flushed), vec![2, 3]);
        assert!(flushed.iter().all(|r| r.release == Release::Flush));

        let snap = s.snapshot();
        assert_eq!(snap.buffer_size, 8);
        assert_eq!(snap.expected_sn, sn(500));
        assert_eq!(snap.occupied, 0);
        assert!(!snap.timer_armed);
        assert!(!snap.triggered);
    }

    #[ba_test]
    fn test_restart_invalid_window_leaves_session() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 2);
        assert_eq!(s.restart(0, sn(0)).err(), Some(InvalidBufferSize(0)));
        assert_eq!(s.occupied(), 1);
        assert!(s.is_active());
    }

    #[ba_test]
    fn test_stop_flushes_in_slot_order_and_deactivates() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 3);
        let _ = admit(&mut s, 1);

        let flushed = s.stop();
        assert_eq!(frames(&flushed), vec![1, 3]);
        assert!(!s.is_active());
        assert!(!s.timer_armed());
        assert_eq!(s.state(), SessionState::Inactive);

        assert!(s.stop().is_empty());
        assert!(s.admit(sn(0), 0, STRICT).is_err());
    }

    // ==== Admission Tests ====

    #[ba_test]
    fn test_in_order_delivery() {
        let mut s = session(4, 0);
        for raw in 0..4 {
            let outcome = admit(&mut s, raw);
            assert_eq!(frames(&outcome.released), vec![raw]);
            assert_eq!(outcome.disposition, Disposition::Delivered);
            assert_eq!(outcome.timer, TimerAction::Keep);
            assert_eq!(s.occupied(), 0);
        }
        assert_eq!(s.expected_sn(), sn(4));
    }

    #[ba_test]
    fn test_gap_then_fill() {
        let mut s = session(4, 0);

        let outcome = admit(&mut s, 1);
        assert!(outcome.released.is_empty());
        assert_eq!(outcome.disposition, Disposition::Buffered);
        assert_eq!(outcome.timer, TimerAction::Arm);
        assert_eq!(s.occupied(), 1);

        let outcome = admit(&mut s, 0);
        assert_eq!(frames(&outcome.released), vec![0, 1]);
        assert_eq!(outcome.timer, TimerAction::Disarm);
        assert_eq!(s.occupied(), 0);
        assert!(!s.timer_armed());
    }

    #[ba_test]
    fn test_hole_filled_with_frames_remaining_restarts_timer() {
        let mut s = session(8, 0);
        let _ = admit(&mut s, 1);
        let _ = admit(&mut s, 3);

        let outcome = admit(&mut s, 0);
        assert_eq!(frames(&outcome.released), vec![0, 1]);
        assert_eq!(outcome.timer, TimerAction::Restart);
        assert_eq!(s.occupied(), 1);
    }

    #[ba_test]
    fn test_buffering_while_armed_keeps_deadline() {
        let mut s = session(8, 0);
        let _ = admit(&mut s, 2);
        let outcome = admit(&mut s, 4);
        assert_eq!(outcome.timer, TimerAction::Keep);
        assert!(s.timer_armed());
    }

    #[ba_test]
    fn test_duplicate_is_dropped() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 2);
        let outcome = admit(&mut s, 2);
        assert_eq!(outcome.disposition, Disposition::Duplicate);
        assert!(outcome.released.is_empty());
        assert_eq!(s.occupied(), 1);

        let outcome = admit(&mut s, 0);
        let _ = admit(&mut s, 1);
        assert_eq!(frames(&outcome.released), vec![0]);
    }

    #[ba_test]
    fn test_beyond_window_scrolls() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 1);
        let _ = admit(&mut s, 3);

        // Window is [0, 4); sn 6 moves it to [3, 7)
        let outcome = admit(&mut s, 6);
        assert!(outcome.scrolled);
        assert_eq!(frames(&outcome.released), vec![1, 3]);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.disposition, Disposition::Buffered);
        assert_eq!(s.expected_sn(), sn(4));
        assert_eq!(s.occupied(), 1);
        assert_eq!(s.highest_received_sn(), sn(6));
    }

    #[ba_test]
    fn test_far_jump_skips_whole_window() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 2);

        let outcome = admit(&mut s, 1000);
        assert_eq!(frames(&outcome.released), vec![2]);
        assert_eq!(outcome.skipped, 996);
        assert_eq!(s.expected_sn(), sn(997));
        assert_eq!(s.occupied(), 1);
    }

    #[ba_test]
    fn test_window_of_one_delivers_every_forward_frame() {
        let mut s = session(1, 0);
        let outcome = admit(&mut s, 5);
        assert_eq!(frames(&outcome.released), vec![5]);
        assert_eq!(outcome.disposition, Disposition::Delivered);
        assert_eq!(s.expected_sn(), sn(6));
        assert_eq!(s.occupied(), 0);
    }

    #[ba_test]
    fn test_wraparound_in_order() {
        let mut s = session(4, 4094);
        let mut delivered = Vec::new();
        for raw in [4094, 4095, 0, 1] {
            delivered.extend(frames(&admit(&mut s, raw).released));
        }
        assert_eq!(delivered, vec![4094, 4095, 0, 1]);
        assert_eq!(s.expected_sn(), sn(2));
    }

    #[ba_test]
    fn test_wraparound_reordered() {
        let mut s = session(4, 4094);
        assert!(admit(&mut s, 0).released.is_empty());
        assert!(admit(&mut s, 4095).released.is_empty());
        let outcome = admit(&mut s, 4094);
        assert_eq!(frames(&outcome.released), vec![4094, 4095, 0]);
        assert_eq!(s.highest_received_sn(), sn(0));
    }

    #[ba_test]
    fn test_odd_window_size_across_lap() {
        // 3 does not divide 4096; frames must still come out in order
        let mut s = session(3, 4093);
        let mut delivered = Vec::new();
        for raw in [4094, 4095, 4093, 1, 0, 2] {
            delivered.extend(frames(&admit(&mut s, raw).released));
        }
        assert_eq!(delivered, vec![4093, 4094, 4095, 0, 1, 2]);
    }

    // ==== Old Frame Tests ====

    #[ba_test]
    fn test_old_frame_before_trigger_passes_through() {
        let mut s = session(4, 100);
        let outcome = admit(&mut s, 50);
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::NotTriggered)
        );
        assert_eq!(frames(&outcome.released), vec![50]);
        assert!(outcome.teardown.is_none());
        assert_eq!(s.expected_sn(), sn(100));
    }

    #[ba_test]
    fn test_out_of_range_requests_teardown_once() {
        let mut s = session(4, 100);
        for raw in 100..104 {
            let _ = admit(&mut s, raw);
        }
        assert_eq!(s.highest_received_sn(), sn(103));

        let outcome = admit(&mut s, 50);
        assert_eq!(frames(&outcome.released), vec![50]);
        assert_eq!(outcome.teardown, Some(sn(50)));
        assert!(s.snapshot().closing);

        let outcome = admit(&mut s, 40);
        assert_eq!(frames(&outcome.released), vec![40]);
        assert!(outcome.teardown.is_none());
    }

    #[ba_test]
    fn test_out_of_range_without_teardown_policy() {
        let mut s = session(4, 100);
        let _ = admit(&mut s, 100);
        let outcome = s
            .admit(
                sn(50),
                50,
                AdmitPolicy {
                    tdls: false,
                    out_of_range_teardown: false,
                },
            )
            .unwrap();
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::OutOfRange)
        );
        assert!(outcome.teardown.is_none());
        assert!(!s.snapshot().closing);
    }

    #[ba_test]
    fn test_late_frame_is_delivered_quietly() {
        let mut s = session(8, 100);
        for raw in 100..103 {
            let _ = admit(&mut s, raw);
        }

        // Retransmission of a frame already delivered
        let outcome = admit(&mut s, 101);
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::Late)
        );
        assert!(outcome.teardown.is_none());
        assert!(!s.snapshot().closing);
    }

    #[ba_test]
    fn test_frame_trailing_highest_by_a_window_is_out_of_range() {
        let mut s = session(8, 100);
        let _ = admit(&mut s, 100);
        // Scroll the window to [103, 111)
        let _ = admit(&mut s, 110);
        assert_eq!(s.expected_sn(), sn(103));

        let outcome = admit(&mut s, 101);
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::OutOfRange)
        );
        assert_eq!(outcome.teardown, Some(sn(101)));
    }

    #[ba_test]
    fn test_tdls_old_frame_never_tears_down() {
        let mut s = session(4, 100);
        for raw in 100..104 {
            let _ = admit(&mut s, raw);
        }
        let policy = AdmitPolicy {
            tdls: true,
            out_of_range_teardown: true,
        };
        let outcome = s.admit(sn(50), 50, policy).unwrap();
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::Tdls)
        );
        assert!(outcome.teardown.is_none());
    }

    #[ba_test]
    fn test_upper_half_start_keeps_highest_at_zero() {
        let mut s = session(4, 3000);
        for raw in 3000..3004 {
            let _ = admit(&mut s, raw);
        }
        // 3000..3003 all lie behind 0 in the circular order
        assert_eq!(s.highest_received_sn(), sn(0));

        let outcome = admit(&mut s, 3001);
        assert_eq!(frames(&outcome.released), vec![3001]);
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::OutOfRange)
        );
        assert_eq!(outcome.teardown, Some(sn(3001)));
        assert!(s.snapshot().closing);
    }

    #[ba_test]
    fn test_highest_advances_once_past_zero() {
        let mut s = session(8, 4094);
        for raw in [4094, 4095, 0, 1] {
            let _ = admit(&mut s, raw);
        }
        assert_eq!(s.highest_received_sn(), sn(1));

        // Retransmission within a window of the highest is harmless
        let outcome = admit(&mut s, 4095);
        assert_eq!(
            outcome.disposition,
            Disposition::PassedThrough(PassThrough::Late)
        );
        assert!(outcome.teardown.is_none());
    }

    // ==== Window Update Tests ====

    #[ba_test]
    fn test_update_window_releases_up_to_target() {
        let mut s = session(8, 0);
        let _ = admit(&mut s, 2);
        let _ = admit(&mut s, 5);
        let _ = admit(&mut s, 6);

        let advance = s.update_window(sn(4));
        assert_eq!(frames(&advance.released), vec![2]);
        assert_eq!(advance.skipped, 3);
        assert_eq!(s.expected_sn(), sn(4));
        assert_eq!(advance.timer, TimerAction::Restart);

        let advance = s.update_window(sn(5));
        assert_eq!(frames(&advance.released), vec![5, 6]);
        assert_eq!(advance.timer, TimerAction::Disarm);
        assert_eq!(s.expected_sn(), sn(7));
    }

    #[ba_test]
    fn test_update_window_behind_is_ignored() {
        let mut s = session(8, 100);
        let _ = admit(&mut s, 102);
        let advance = s.update_window(sn(90));
        assert!(advance.released.is_empty());
        assert_eq!(advance.timer, TimerAction::Keep);
        assert_eq!(s.expected_sn(), sn(100));
    }

    // ==== Aging Tests ====

    #[ba_test]
    fn test_age_timeout_skips_hole() {
        let mut s = session(4, 0);
        let _ = admit(&mut s, 1);

        let advance = s.age_timeout();
        assert_eq!(frames(&advance.released), vec![1]);
        assert_eq!(advance.skipped, 1);
        assert_eq!(advance.timer, TimerAction::Keep);
        assert_eq!(s.expected_sn(), sn(2));
        assert_eq!(s.occupied(), 0);
        assert!(!s.timer_armed());
    }

    #[ba_test]
    fn test_age_timeout_one_hole_per_tick() {
        let mut s = session(8, 0);
        let _ = admit(&mut s, 2);
        let _ = admit(&mut s, 4);

        let first = s.age_timeout();
        assert_eq!(frames(&first.released), vec![2]);
        assert_eq!(first.timer, TimerAction::Arm);
        assert!(s.timer_armed());

        let second = s.age_timeout();
        assert_eq!(frames(&second.released), vec![4]);
        assert_eq!(second.timer, TimerAction::Keep);
        assert_eq!(s.occupied(), 0);
    }

    #[ba_test]
    fn test_age_timeout_on_empty_or_stopped_session() {
        let mut s = session(4, 0);
        let advance = s.age_timeout();
        assert!(advance.released.is_empty());
        assert_eq!(advance.timer, TimerAction::Keep);

        let _ = admit(&mut s, 2);
        let _ = s.stop();
        assert!(s.age_timeout().released.is_empty());
    }

    // ==== Property Tests ====

    #[ba_test]
    fn test_bounded_occupancy_and_in_order_delivery() {
        for buffer_size in [1u16, 3, 7, 16, 64] {
            let mut rng = XorShiftRng::seed_from_u64(u64::from(buffer_size));
            let mut s = session(buffer_size, 4000);
            let mut last: Option<SeqNum> = None;
            let mut seen = std::collections::HashSet::new();

            for step in 0..2000u16 {
                let jitter = (rng.next_u32() % u32::from(buffer_size * 2)) as u16;
                let raw = 4000u16.wrapping_add(step).wrapping_add(jitter) % 4096;
                let outcome = admit(&mut s, raw);
                assert!(s.occupied() <= usize::from(buffer_size));

                for released in outcome.released {
                    if released.release != Release::InOrder {
                        continue;
                    }
                    if let Some(prev) = last {
                        assert!(
                            !released.sequence_number.is_older(prev),
                            "{} released after {}",
                            released.sequence_number,
                            prev
                        );
                    }
                    assert!(seen.insert(released.sequence_number.get()));
                    last = Some(released.sequence_number);
                }
            }
        }
    }

    #[ba_test]
    fn test_aging_drains_within_window_ticks() {
        let mut s = session(64, 0);
        for raw in (1..64).step_by(2) {
            let _ = admit(&mut s, raw);
        }
        assert_eq!(s.occupied(), 32);

        let mut ticks = 0;
        while s.occupied() > 0 {
            let _ = s.age_timeout();
            ticks += 1;
            assert!(ticks <= 64);
        }
        assert!(!s.timer_armed());
    }
}
