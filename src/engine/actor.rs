//! Engine task: owns all session state and the aging timer wheel.

use super::sink::{ControlPlane, DeliveredFrame, FrameSink};
use super::EngineError;
use crate::config::ReorderConfig;
use crate::control::{BlockAckAction, BlockAckIndication, TeardownReason, TeardownRequest};
use crate::peer::{PeerAddress, PeerKind, Tid};
use crate::pool::{PeerRegistry, SessionHandle, SessionPool};
use crate::reorder::{
    AdmitPolicy, BaSession, Disposition, InvalidBufferSize, Release, Released, Restart, SessionInactive,
    SessionSnapshot, TimerAction, MAX_BA_BUFFER_SIZE,
};
use crate::sequence::SeqNum;
use crate::stats::ReorderStats;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue::Key, DelayQueue};

/// Request sent from a [`ReorderEngine`](super::ReorderEngine) handle.
pub(crate) enum Command<F> {
    Start {
        peer: PeerAddress,
        tid: Tid,
        buffer_size: u16,
        start_sn: SeqNum,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        peer: PeerAddress,
        tid: Tid,
        reply: oneshot::Sender<()>,
    },
    Admit {
        peer: PeerAddress,
        tid: Tid,
        sequence_number: SeqNum,
        frame: F,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    IsActive {
        peer: PeerAddress,
        tid: Tid,
        reply: oneshot::Sender<bool>,
    },
    AddPeer {
        peer: PeerAddress,
        kind: PeerKind,
        reply: oneshot::Sender<()>,
    },
    RemovePeer {
        peer: PeerAddress,
        reply: oneshot::Sender<()>,
    },
    UpdateWindow {
        peer: PeerAddress,
        tid: Tid,
        sequence_number: SeqNum,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    BlockAck {
        indication: BlockAckIndication,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Snapshot {
        peer: PeerAddress,
        tid: Tid,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
}

/// What an aging deadline belongs to.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    handle: SessionHandle,
    peer: PeerAddress,
    tid: Tid,
}

type Timers = DelayQueue<Deadline>;

pub(crate) struct Actor<F, S, C> {
    config: ReorderConfig,
    pool: SessionPool<F>,
    peers: PeerRegistry,
    /// Queue key of every armed aging timer.
    deadlines: HashMap<SessionHandle, Key>,
    sink: S,
    control: C,
    stats: Arc<ReorderStats>,
}

impl<F, S, C> Actor<F, S, C>
where
    F: Send + 'static,
    S: FrameSink<F>,
    C: ControlPlane,
{
    pub(crate) fn new(config: ReorderConfig, sink: S, control: C, stats: Arc<ReorderStats>) -> Self {
        Self {
            pool: SessionPool::with_capacity(config.max_sessions),
            peers: PeerRegistry::new(),
            deadlines: HashMap::new(),
            config,
            sink,
            control,
            stats,
        }
    }

    /// Process commands and timer expiries until cancelled or every handle
    /// is dropped, then stop all sessions.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command<F>>,
        cancel: CancellationToken,
    ) {
        let mut timers = Timers::new();
        info!(
            "Reorder engine started ({} sessions, aging timeout {:?})",
            self.pool.capacity(),
            self.config.reorder_age_timeout
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Reorder engine cancelled");
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command, &mut timers),
                    None => {
                        debug!("All engine handles dropped");
                        break;
                    }
                },

                Some(expired) = poll_fn(|cx| timers.poll_expired(cx)), if !timers.is_empty() => {
                    self.on_deadline(expired.into_inner(), &mut timers);
                }
            }
        }

        if !self.peers.is_empty() {
            info!("Stopping sessions of {} peers", self.peers.len());
        }
        for peer in self.peers.addresses() {
            self.remove_peer(peer, &mut timers);
        }
        info!("Reorder engine stopped");
    }

    fn dispatch(&mut self, command: Command<F>, timers: &mut Timers) {
        match command {
            Command::Start {
                peer,
                tid,
                buffer_size,
                start_sn,
                reply,
            } => {
                let result = self.start_session(peer, tid, buffer_size, start_sn, timers);
                let _ = reply.send(result);
            }
            Command::Stop { peer, tid, reply } => {
                self.stop_session(peer, tid, timers);
                let _ = reply.send(());
            }
            Command::Admit {
                peer,
                tid,
                sequence_number,
                frame,
                reply,
            } => {
                let result = self.admit(peer, tid, sequence_number, frame, timers);
                let _ = reply.send(result);
            }
            Command::IsActive { peer, tid, reply } => {
                let active = self
                    .peers
                    .session(&peer, tid)
                    .and_then(|handle| self.pool.get(handle))
                    .is_some_and(BaSession::is_active);
                let _ = reply.send(active);
            }
            Command::AddPeer { peer, kind, reply } => {
                if self.peers.add(peer, kind) {
                    info!("Peer {} added ({})", peer, kind);
                } else {
                    debug!("Peer {} is now {}", peer, kind);
                }
                let _ = reply.send(());
            }
            Command::RemovePeer { peer, reply } => {
                self.remove_peer(peer, timers);
                let _ = reply.send(());
            }
            Command::UpdateWindow {
                peer,
                tid,
                sequence_number,
                reply,
            } => {
                let result = self.update_window(peer, tid, sequence_number, timers);
                let _ = reply.send(result);
            }
            Command::BlockAck { indication, reply } => {
                let result = self.block_ack(indication, timers);
                let _ = reply.send(result);
            }
            Command::Snapshot { peer, tid, reply } => {
                let snapshot = self
                    .peers
                    .session(&peer, tid)
                    .and_then(|handle| self.pool.get(handle))
                    .map(BaSession::snapshot);
                let _ = reply.send(snapshot);
            }
        }
    }

    fn start_session(
        &mut self,
        peer: PeerAddress,
        tid: Tid,
        buffer_size: u16,
        start_sn: SeqNum,
        timers: &mut Timers,
    ) -> Result<(), EngineError> {
        if buffer_size == 0 || buffer_size > MAX_BA_BUFFER_SIZE {
            error!(
                "Rejecting session {} tid {}: buffer size {} out of range",
                peer, tid, buffer_size
            );
            return Err(EngineError::InvalidWindow { buffer_size });
        }
        let invalid = |_: InvalidBufferSize| EngineError::InvalidWindow { buffer_size };

        if self.peers.get(&peer).is_none() {
            info!("Peer {} added (infrastructure)", peer);
        }
        let existing = self.peers.entry(peer).sessions.get(tid);

        if let Some(handle) = existing {
            if let Some(session) = self.pool.get_mut(handle) {
                match session.restart(buffer_size, start_sn).map_err(invalid)? {
                    Restart::Unchanged => {
                        debug!("Session {} tid {} already running at sn {}", peer, tid, start_sn);
                    }
                    Restart::Reset { flushed } => {
                        info!(
                            "Session {} tid {} restarted (window {}, sn {})",
                            peer, tid, buffer_size, start_sn
                        );
                        self.cancel_timer(handle, timers);
                        ReorderStats::add(&self.stats.sessions_started, 1);
                        self.deliver(peer, tid, flushed);
                    }
                }
                return Ok(());
            }
        }

        let session = BaSession::start(tid, buffer_size, start_sn).map_err(invalid)?;
        let handle = match self.pool.claim(session) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Cannot start session {} tid {}: {}", peer, tid, e);
                return Err(EngineError::PoolExhausted);
            }
        };
        self.peers.entry(peer).sessions.insert(tid, handle);

        ReorderStats::add(&self.stats.sessions_started, 1);
        self.update_active_gauge();
        info!(
            "Session {} tid {} started (window {}, sn {}, slot {})",
            peer, tid, buffer_size, start_sn, handle
        );
        Ok(())
    }

    fn stop_session(&mut self, peer: PeerAddress, tid: Tid, timers: &mut Timers) {
        match self.peers.remove_session(&peer, tid) {
            Some(handle) => {
                self.destroy_session(peer, tid, handle, timers);
                if self.peers.get(&peer).is_none() {
                    debug!("Peer {} has no sessions left, forgotten", peer);
                }
            }
            None => debug!("No session {} tid {} to stop", peer, tid),
        }
    }

    fn remove_peer(&mut self, peer: PeerAddress, timers: &mut Timers) {
        let Some(entry) = self.peers.remove(&peer) else {
            debug!("Peer {} not known", peer);
            return;
        };
        for (tid, handle) in entry.sessions.iter() {
            self.destroy_session(peer, tid, handle, timers);
        }
        info!("Peer {} removed", peer);
    }

    /// Stop a session that is no longer in its peer's table and free its slot.
    fn destroy_session(
        &mut self,
        peer: PeerAddress,
        tid: Tid,
        handle: SessionHandle,
        timers: &mut Timers,
    ) {
        self.cancel_timer(handle, timers);
        let Some(mut session) = self.pool.release(handle) else {
            warn!("Session {} tid {} had no pool slot {}", peer, tid, handle);
            return;
        };
        let flushed = session.stop();
        info!(
            "Session {} tid {} stopped, {} buffered frames flushed",
            peer,
            tid,
            flushed.len()
        );
        ReorderStats::add(&self.stats.sessions_stopped, 1);
        self.update_active_gauge();
        self.deliver(peer, tid, flushed);
    }

    fn admit(
        &mut self,
        peer: PeerAddress,
        tid: Tid,
        sequence_number: SeqNum,
        frame: F,
        timers: &mut Timers,
    ) -> Result<(), EngineError> {
        let no_session = EngineError::NoSession { peer, tid };
        let Some(handle) = self.peers.session(&peer, tid) else {
            debug!("No session {} tid {}, dropping sn {}", peer, tid, sequence_number);
            return Err(no_session);
        };
        let policy = AdmitPolicy {
            tdls: self.peers.kind(&peer) == PeerKind::Tdls,
            out_of_range_teardown: self.config.out_of_range_teardown,
        };
        let Some(session) = self.pool.get_mut(handle) else {
            return Err(no_session);
        };

        let outcome = match session.admit(sequence_number, frame, policy) {
            Ok(outcome) => outcome,
            Err(SessionInactive(_)) => {
                debug!("Session {} tid {} inactive, dropping sn {}", peer, tid, sequence_number);
                return Err(no_session);
            }
        };

        match outcome.disposition {
            Disposition::Buffered => ReorderStats::add(&self.stats.frames_buffered, 1),
            Disposition::Duplicate => ReorderStats::add(&self.stats.duplicates_dropped, 1),
            Disposition::Delivered | Disposition::PassedThrough(_) => {}
        }
        if outcome.scrolled {
            ReorderStats::add(&self.stats.window_scrolls, 1);
        }
        ReorderStats::add(&self.stats.holes_skipped, usize::from(outcome.skipped));

        self.apply_timer(handle, peer, tid, outcome.timer, timers);
        self.deliver(peer, tid, outcome.released);

        if let Some(sequence_number) = outcome.teardown {
            let request = TeardownRequest {
                peer,
                tid,
                sequence_number,
                reason: TeardownReason::OutOfRangeSequenceNumber,
            };
            warn!("Requesting {}", request);
            ReorderStats::add(&self.stats.teardown_requests, 1);
            self.control.request_teardown(request);
        }
        Ok(())
    }

    fn update_window(
        &mut self,
        peer: PeerAddress,
        tid: Tid,
        sequence_number: SeqNum,
        timers: &mut Timers,
    ) -> Result<(), EngineError> {
        let session = self
            .peers
            .session(&peer, tid)
            .and_then(|handle| Some((handle, self.pool.get_mut(handle)?)));
        let Some((handle, session)) = session else {
            return Err(EngineError::NoSession { peer, tid });
        };

        let advance = session.update_window(sequence_number);
        debug!(
            "Session {} tid {} window update to {}: {} released, {} skipped",
            peer,
            tid,
            sequence_number,
            advance.released.len(),
            advance.skipped
        );
        ReorderStats::add(&self.stats.holes_skipped, usize::from(advance.skipped));
        self.apply_timer(handle, peer, tid, advance.timer, timers);
        self.deliver(peer, tid, advance.released);
        Ok(())
    }

    fn block_ack(
        &mut self,
        indication: BlockAckIndication,
        timers: &mut Timers,
    ) -> Result<(), EngineError> {
        let action = indication.action().map_err(|e| {
            error!("Block-Ack indication from {}: {}", indication.peer, e);
            EngineError::InvalidTid(e.0)
        })?;

        let peer = indication.peer;
        match action {
            BlockAckAction::Ignore => {
                debug!("Ignoring transmit-direction Block-Ack indication from {}", peer);
                Ok(())
            }
            BlockAckAction::Start {
                tid,
                buffer_size,
                start_sn,
            } => self.start_session(peer, tid, buffer_size, start_sn, timers),
            BlockAckAction::Stop { tid } => {
                self.stop_session(peer, tid, timers);
                Ok(())
            }
            BlockAckAction::UpdateWindow {
                tid,
                sequence_number,
            } => match self.update_window(peer, tid, sequence_number, timers) {
                Err(EngineError::NoSession { .. }) => {
                    debug!("Window update for {} tid {} without session", peer, tid);
                    Ok(())
                }
                result => result,
            },
        }
    }

    fn on_deadline(&mut self, deadline: Deadline, timers: &mut Timers) {
        let Deadline { handle, peer, tid } = deadline;
        // The queue entry is gone; its key must not be used again
        self.deadlines.remove(&handle);

        let Some(session) = self.pool.get_mut(handle) else {
            debug!("Aging timer for freed slot {}", handle);
            return;
        };

        ReorderStats::add(&self.stats.aging_expiries, 1);
        let advance = session.age_timeout();
        debug!(
            "Session {} tid {} aged: {} released, {} skipped",
            peer,
            tid,
            advance.released.len(),
            advance.skipped
        );
        ReorderStats::add(&self.stats.holes_skipped, usize::from(advance.skipped));
        self.apply_timer(handle, peer, tid, advance.timer, timers);
        self.deliver(peer, tid, advance.released);
    }

    fn apply_timer(
        &mut self,
        handle: SessionHandle,
        peer: PeerAddress,
        tid: Tid,
        action: TimerAction,
        timers: &mut Timers,
    ) {
        let timeout = self.config.reorder_age_timeout;
        match action {
            TimerAction::Keep => {}
            TimerAction::Disarm => self.cancel_timer(handle, timers),
            TimerAction::Arm | TimerAction::Restart => match self.deadlines.get(&handle) {
                Some(key) => timers.reset(key, timeout),
                None => {
                    let key = timers.insert(Deadline { handle, peer, tid }, timeout);
                    self.deadlines.insert(handle, key);
                }
            },
        }
    }

    fn cancel_timer(&mut self, handle: SessionHandle, timers: &mut Timers) {
        if let Some(key) = self.deadlines.remove(&handle) {
            timers.remove(&key);
        }
    }

    fn deliver(&mut self, peer: PeerAddress, tid: Tid, released: Vec<Released<F>>) {
        for Released {
            sequence_number,
            frame,
            release,
        } in released
        {
            let counter = match release {
                Release::InOrder => &self.stats.frames_in_order,
                Release::PassThrough(_) => &self.stats.frames_passed_through,
                Release::Flush => &self.stats.frames_flushed,
            };
            counter.fetch_add(1, Ordering::Relaxed);

            self.sink.deliver(DeliveredFrame {
                peer,
                tid,
                sequence_number,
                frame,
                release,
            });
        }
    }

    fn update_active_gauge(&self) {
        self.stats
            .sessions_active
            .store(self.pool.in_use(), Ordering::Relaxed);
    }
}
