//! Async reorder engine.
//!
//! The engine is a single tokio task that owns every session, the session
//! pool and the aging timers. [`ReorderEngine`] is a cheap, cloneable handle
//! that sends it commands and waits for the answer. Frame admission, control
//! events and timer expiries are processed one at a time in that task, so a
//! timer can never run concurrently with an admission on the same session.
//!
//! Frames released by a command are handed to the [`FrameSink`] before the
//! command's reply is sent, so once `admit_frame` returns, everything that
//! frame made deliverable has been delivered.
//!
//! # Example
//!
//! ```no_run
//! use ba_reorder::{DeliveredFrame, PeerAddress, ReorderConfig, ReorderEngine, TeardownRequest, Tid};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<DeliveredFrame<Vec<u8>>>();
//! let (teardown_tx, _teardown_rx) = mpsc::unbounded_channel::<TeardownRequest>();
//! let (engine, task) = ReorderEngine::<Vec<u8>>::spawn(
//!     ReorderConfig::default(),
//!     frames_tx,
//!     teardown_tx,
//! )?;
//!
//! let peer = PeerAddress::new([0x02, 0, 0, 0, 0, 0x01]);
//! let tid = Tid::new(0)?;
//! engine.session_start(peer, tid, 64, 0u16).await?;
//! engine.admit_frame(peer, tid, 1u16, vec![1]).await?;
//! engine.admit_frame(peer, tid, 0u16, vec![0]).await?;
//!
//! assert_eq!(frames_rx.recv().await.map(|f| f.frame), Some(vec![0]));
//! assert_eq!(frames_rx.recv().await.map(|f| f.frame), Some(vec![1]));
//!
//! engine.shutdown();
//! task.await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod sink;

pub use sink::{ControlPlane, DeliveredFrame, FrameSink};

use crate::config::{ConfigError, ReorderConfig};
use crate::control::BlockAckIndication;
use crate::peer::{PeerAddress, PeerKind, Tid};
use crate::reorder::SessionSnapshot;
use crate::sequence::SeqNum;
use crate::stats::ReorderStats;
use actor::{Actor, Command};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Commands that can be queued before senders wait.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Buffer size outside `1..=64`.
    InvalidWindow { buffer_size: u16 },
    /// TID above 7 in a control indication.
    InvalidTid(u8),
    /// No active session for this (peer, TID).
    NoSession { peer: PeerAddress, tid: Tid },
    /// Every session slot is in use.
    PoolExhausted,
    /// The engine task has stopped.
    EngineClosed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow { buffer_size } => {
                write!(f, "invalid Block-Ack window size {}", buffer_size)
            }
            Self::InvalidTid(tid) => write!(f, "invalid TID {}", tid),
            Self::NoSession { peer, tid } => write!(f, "no session for {} tid {}", peer, tid),
            Self::PoolExhausted => write!(f, "session pool exhausted"),
            Self::EngineClosed => write!(f, "reorder engine closed"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Handle to a running reorder engine.
pub struct ReorderEngine<F> {
    commands: mpsc::Sender<Command<F>>,
    cancel: CancellationToken,
    stats: Arc<ReorderStats>,
}

impl<F> Clone for ReorderEngine<F> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            cancel: self.cancel.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<F> fmt::Debug for ReorderEngine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderEngine")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: Send + 'static> ReorderEngine<F> {
    /// Validate `config` and start the engine task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<S, C>(
        config: ReorderConfig,
        sink: S,
        control: C,
    ) -> Result<(Self, JoinHandle<()>), ConfigError>
    where
        S: FrameSink<F>,
        C: ControlPlane,
    {
        Self::spawn_with_stats(config, sink, control, Arc::new(ReorderStats::new()))
    }

    /// Like [`ReorderEngine::spawn`], recording into existing counters.
    pub fn spawn_with_stats<S, C>(
        config: ReorderConfig,
        sink: S,
        control: C,
        stats: Arc<ReorderStats>,
    ) -> Result<(Self, JoinHandle<()>), ConfigError>
    where
        S: FrameSink<F>,
        C: ControlPlane,
    {
        config.validate()?;

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let actor = Actor::new(config, sink, control, Arc::clone(&stats));
        let task = tokio::spawn(actor.run(rx, cancel.clone()));

        Ok((
            Self {
                commands: tx,
                cancel,
                stats,
            },
            task,
        ))
    }

    /// Counters updated by the engine.
    pub fn stats(&self) -> &Arc<ReorderStats> {
        &self.stats
    }

    /// Start (or restart) the receive session for `(peer, tid)`.
    ///
    /// Restarting with the window size and start the session already has
    /// keeps its state. Unknown peers are registered as infrastructure peers.
    pub async fn session_start(
        &self,
        peer: PeerAddress,
        tid: Tid,
        buffer_size: u16,
        start_sn: impl Into<SeqNum>,
    ) -> Result<(), EngineError> {
        let start_sn = start_sn.into();
        self.request(|reply| Command::Start {
            peer,
            tid,
            buffer_size,
            start_sn,
            reply,
        })
        .await?
    }

    /// Stop the session for `(peer, tid)`, delivering its buffered frames.
    ///
    /// Stopping a session that does not exist is not an error.
    pub async fn session_stop(&self, peer: PeerAddress, tid: Tid) -> Result<(), EngineError> {
        self.request(|reply| Command::Stop { peer, tid, reply })
            .await
    }

    /// Admit a received frame.
    ///
    /// Fails with [`EngineError::NoSession`] if the session is not active; the
    /// frame is dropped.
    pub async fn admit_frame(
        &self,
        peer: PeerAddress,
        tid: Tid,
        sequence_number: impl Into<SeqNum>,
        frame: F,
    ) -> Result<(), EngineError> {
        let sequence_number = sequence_number.into();
        self.request(|reply| Command::Admit {
            peer,
            tid,
            sequence_number,
            frame,
            reply,
        })
        .await?
    }

    /// Whether frames for `(peer, tid)` should go through the engine.
    ///
    /// Returns false once the engine has stopped.
    pub async fn is_session_active(&self, peer: PeerAddress, tid: Tid) -> bool {
        self.request(|reply| Command::IsActive { peer, tid, reply })
            .await
            .unwrap_or(false)
    }

    /// Register a peer or change its link type.
    pub async fn add_peer(&self, peer: PeerAddress, kind: PeerKind) -> Result<(), EngineError> {
        self.request(|reply| Command::AddPeer { peer, kind, reply })
            .await
    }

    /// Forget a peer, stopping all of its sessions first.
    pub async fn remove_peer(&self, peer: PeerAddress) -> Result<(), EngineError> {
        self.request(|reply| Command::RemovePeer { peer, reply })
            .await
    }

    /// Move the window start of `(peer, tid)` forward to `sequence_number`.
    pub async fn update_window(
        &self,
        peer: PeerAddress,
        tid: Tid,
        sequence_number: impl Into<SeqNum>,
    ) -> Result<(), EngineError> {
        let sequence_number = sequence_number.into();
        self.request(|reply| Command::UpdateWindow {
            peer,
            tid,
            sequence_number,
            reply,
        })
        .await?
    }

    /// Apply a Block-Ack indication from the control plane.
    pub async fn handle_block_ack(&self, indication: BlockAckIndication) -> Result<(), EngineError> {
        self.request(|reply| Command::BlockAck { indication, reply })
            .await?
    }

    /// Read-only view of the session for `(peer, tid)`, if there is one.
    pub async fn session_snapshot(
        &self,
        peer: PeerAddress,
        tid: Tid,
    ) -> Result<Option<SessionSnapshot>, EngineError> {
        self.request(|reply| Command::Snapshot { peer, tid, reply })
            .await
    }

    /// Stop the engine.
    ///
    /// Every session is stopped and its buffered frames delivered before the
    /// task exits; await the task's `JoinHandle` to wait for that.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// True once the engine task has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command<F>,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        response.await.map_err(|_| EngineError::EngineClosed)
    }
}
