//! Session pool and per-peer session tables.
//!
//! Sessions live in a fixed-capacity [`SessionPool`] shared by every peer of
//! a device. Peers refer to them through a [`SessionTable`] of
//! [`SessionHandle`]s indexed by TID, so a session's lifetime is bounded by its
//! pool slot and nothing outside the pool holds a reference to it.

use crate::peer::{PeerAddress, PeerKind, Tid, NUM_TIDS};
use crate::reorder::BaSession;
use std::collections::HashMap;
use std::fmt;

/// Default number of receive Block-Ack sessions per device.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Opaque index of a session in a [`SessionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(usize);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every pool slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted {
    /// Pool capacity.
    pub capacity: usize,
}

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} session slots are in use", self.capacity)
    }
}

impl std::error::Error for PoolExhausted {}

/// Fixed-capacity arena of sessions.
pub struct SessionPool<F> {
    slots: Vec<Option<BaSession<F>>>,
    in_use: usize,
}

impl<F> SessionPool<F> {
    /// Create a pool with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            in_use: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of claimed slots.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Place a session in the first free slot.
    pub fn claim(&mut self, session: BaSession<F>) -> Result<SessionHandle, PoolExhausted> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(PoolExhausted {
                capacity: self.slots.len(),
            });
        };
        self.slots[index] = Some(session);
        self.in_use += 1;
        Ok(SessionHandle(index))
    }

    /// Free a slot, returning the session it held.
    pub fn release(&mut self, handle: SessionHandle) -> Option<BaSession<F>> {
        let session = self.slots.get_mut(handle.0)?.take()?;
        self.in_use -= 1;
        Some(session)
    }

    /// Session in a claimed slot.
    pub fn get(&self, handle: SessionHandle) -> Option<&BaSession<F>> {
        self.slots.get(handle.0)?.as_ref()
    }

    /// Mutable session in a claimed slot.
    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut BaSession<F>> {
        self.slots.get_mut(handle.0)?.as_mut()
    }
}

impl<F> Default for SessionPool<F> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl<F> fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.slots.len())
            .field("in_use", &self.in_use)
            .finish()
    }
}

/// TID to session mapping for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTable {
    sessions: [Option<SessionHandle>; NUM_TIDS],
}

impl SessionTable {
    /// Session registered for `tid`.
    pub fn get(&self, tid: Tid) -> Option<SessionHandle> {
        self.sessions[tid.index()]
    }

    /// Register a session for `tid`, returning the one it replaces.
    pub fn insert(&mut self, tid: Tid, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions[tid.index()].replace(handle)
    }

    /// Unregister the session for `tid`.
    pub fn remove(&mut self, tid: Tid) -> Option<SessionHandle> {
        self.sessions[tid.index()].take()
    }

    /// Registered sessions in TID order.
    pub fn iter(&self) -> impl Iterator<Item = (Tid, SessionHandle)> + '_ {
        self.sessions.iter().enumerate().filter_map(|(index, handle)| {
            let tid = Tid::new(u8::try_from(index).ok()?).ok()?;
            handle.map(|handle| (tid, handle))
        })
    }

    /// True when no TID has a session.
    pub fn is_empty(&self) -> bool {
        self.sessions.iter().all(Option::is_none)
    }
}

/// A known peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerEntry {
    /// Link type.
    pub kind: PeerKind,
    /// Sessions by TID.
    pub sessions: SessionTable,
}

/// Peers known to the engine.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerAddress, PeerEntry>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer or update its link type. Returns true if it was new.
    pub fn add(&mut self, peer: PeerAddress, kind: PeerKind) -> bool {
        match self.peers.get_mut(&peer) {
            Some(entry) => {
                entry.kind = kind;
                false
            }
            None => {
                self.peers.insert(
                    peer,
                    PeerEntry {
                        kind,
                        sessions: SessionTable::default(),
                    },
                );
                true
            }
        }
    }

    /// Forget a peer, returning its entry.
    pub fn remove(&mut self, peer: &PeerAddress) -> Option<PeerEntry> {
        self.peers.remove(peer)
    }

    /// Entry for a known peer.
    pub fn get(&self, peer: &PeerAddress) -> Option<&PeerEntry> {
        self.peers.get(peer)
    }

    /// Entry for a peer, registering it as infrastructure if unknown.
    pub fn entry(&mut self, peer: PeerAddress) -> &mut PeerEntry {
        self.peers.entry(peer).or_default()
    }

    /// Session handle for a (peer, TID) pair.
    pub fn session(&self, peer: &PeerAddress, tid: Tid) -> Option<SessionHandle> {
        self.peers.get(peer)?.sessions.get(tid)
    }

    /// Unregister the session for a (peer, TID) pair.
    ///
    /// An infrastructure peer left without sessions is forgotten; unknown
    /// peers are treated as infrastructure anyway.
    pub fn remove_session(&mut self, peer: &PeerAddress, tid: Tid) -> Option<SessionHandle> {
        let entry = self.peers.get_mut(peer)?;
        let handle = entry.sessions.remove(tid);
        if entry.kind == PeerKind::Infrastructure && entry.sessions.is_empty() {
            self.peers.remove(peer);
        }
        handle
    }

    /// Link type of a peer; unknown peers are infrastructure.
    pub fn kind(&self, peer: &PeerAddress) -> PeerKind {
        self.peers
            .get(peer)
            .map(|entry| entry.kind)
            .unwrap_or_default()
    }

    /// Addresses of all known peers.
    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.peers.keys().copied().collect()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peer is known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
