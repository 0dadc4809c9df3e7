//! 802.11 Block-Ack MPDU reorder engine.
//!
//! Frames received under a Block-Ack agreement can arrive out of order. This
//! library re-sequences them per (peer, TID) inside the negotiated window
//! before they are handed to the rest of the receive path:
//!
//! - [`sequence`]: 12-bit wrapping sequence number arithmetic
//! - [`reorder`]: reorder buffer, session state machine, aging reclaim
//! - [`pool`]: session pool and per-peer session tables
//! - [`control`]: Block-Ack indications and teardown requests
//! - [`engine`]: async engine task and its handle
//! - [`stats`] / [`stats_server`]: counters and their HTTP endpoint

pub mod config;
pub mod control;
pub mod engine;
pub mod peer;
pub mod pool;
pub mod reorder;
pub mod sequence;
pub mod stats;
pub mod stats_server;

// Re-export commonly used items
pub use config::{ConfigError, ReorderConfig};
pub use control::{
    BlockAckDirection, BlockAckIndication, BlockAckParameterSet, BlockAckReason, TeardownReason,
    TeardownRequest,
};
pub use engine::{ControlPlane, DeliveredFrame, EngineError, FrameSink, ReorderEngine};
pub use peer::{InvalidTid, PeerAddress, PeerKind, Tid};
pub use reorder::{BaSession, Release, SessionSnapshot};
pub use sequence::SeqNum;
pub use stats::ReorderStats;
pub use stats_server::{StatsServer, DEFAULT_STATS_PORT};
