//! Per-session reorder machinery.
//!
//! This module contains the pieces that do not depend on any runtime:
//! - Circular reorder buffer with checked slot indices
//! - Block-Ack session state machine and frame admission
//! - Aging timer policy and hole reclaim
//!
//! Everything here is synchronous; the async engine drives it.

mod aging;
mod buffer;
mod session;

pub use aging::{timer_decision, TimerAction};
pub use buffer::{InvalidBufferSize, Rejected, ReorderBuffer, SlotIndex, MAX_BA_BUFFER_SIZE};
pub use session::{
    AdmitOutcome, AdmitPolicy, Advance, BaSession, Disposition, PassThrough, Release, Released,
    Restart, SessionInactive, SessionSnapshot, SessionState,
};
