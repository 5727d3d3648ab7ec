//! Embedded Coordination Service
//!
//! An in-process namespace that behaves like a single ZooKeeper server:
//! every operation is serialised under one mutex, ephemeral nodes die with
//! their session, and children watches fire once.
//!
//! Used by the dev binary and by tests. Tests drive failures through
//! [`MemoryCoordinator::expire_session`], [`MemoryCoordinator::set_unreachable`],
//! [`MemoryCoordinator::notify_watches`] and
//! [`MemoryCoordinator::fail_next_create_after_commit`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::client::{
    Acl, CoordinationClient, CreateMode, EventKind, Session, SessionEvent, SessionEvents,
    SessionState, WatchEvent, WatchReceiver,
};
use crate::error::{ElectionError, Result};

const FIRST_SESSION_ID: i64 = 0x100;

struct Node {
    data: Vec<u8>,
    owner: Option<i64>,
}

struct PendingWatch {
    path: String,
    tx: oneshot::Sender<WatchEvent>,
}

struct SessionSlot {
    state: SessionState,
    events: mpsc::UnboundedSender<SessionEvent>,
    watches: Vec<PendingWatch>,
}

impl SessionSlot {
    fn transition(&mut self, state: SessionState) {
        self.state = state;
        let _ = self.events.send(SessionEvent { state });
    }
}

struct Namespace {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<i64, SessionSlot>,
    next_session_id: i64,
    unreachable: bool,
    fail_next_create: bool,
    create_calls: u64,
}

impl Namespace {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            sessions: HashMap::new(),
            next_session_id: FIRST_SESSION_ID,
            unreachable: false,
            fail_next_create: false,
            create_calls: 0,
        }
    }

    fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn check_session(&self, id: i64) -> Result<()> {
        match self.sessions.get(&id) {
            None => Err(ElectionError::SessionClosed),
            Some(_) if self.unreachable => {
                Err(ElectionError::Connection("coordination service unreachable".to_string()))
            }
            Some(slot) if !slot.state.is_live() => {
                Err(ElectionError::Connection(format!("session not connected: {}", slot.state)))
            }
            Some(_) => Ok(()),
        }
    }

    /// Deliver `kind` to every watch registered on `path`.
    fn fire(&mut self, path: &str, kind: EventKind) {
        for slot in self.sessions.values_mut() {
            let state = slot.state;
            let (hit, kept): (Vec<_>, Vec<_>) =
                slot.watches.drain(..).partition(|w| w.path == path);
            slot.watches = kept;
            for watch in hit {
                let _ = watch.tx.send(WatchEvent {
                    kind,
                    state,
                    path: path.to_string(),
                });
            }
        }
    }

    fn remove_node(&mut self, path: &str) -> bool {
        if self.nodes.remove(path).is_none() {
            return false;
        }
        self.fire(path, EventKind::NodeDeleted);
        self.fire(parent_of(path), EventKind::NodeChildrenChanged);
        true
    }

    fn end_session(&mut self, id: i64, state: SessionState) {
        let Some(mut slot) = self.sessions.remove(&id) else {
            return;
        };
        slot.transition(state);
        for watch in slot.watches.drain(..) {
            let _ = watch.tx.send(WatchEvent {
                kind: EventKind::Session,
                state,
                path: watch.path,
            });
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            debug!(session_id = id, path = %path, "Removing ephemeral node of ended session");
            self.remove_node(&path);
        }
    }
}

/// Yield once so concurrent callers interleave the way network calls do.
async fn round_trip() {
    tokio::task::yield_now().await;
}

fn validate_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(ElectionError::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Embedded coordination service. Clones share the same namespace.
#[derive(Clone)]
pub struct MemoryCoordinator {
    inner: Arc<Mutex<Namespace>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    /// Expire a session as the server would after losing its heartbeat.
    pub fn expire_session(&self, id: i64) {
        self.inner.lock().end_session(id, SessionState::Expired);
    }

    /// Delete a node out from under its owner.
    pub fn delete_node(&self, path: &str) -> bool {
        self.inner.lock().remove_node(path)
    }

    /// While unreachable, new sessions never connect and every operation
    /// fails with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    /// Deliver `kind` to the watches on `path` without changing the node,
    /// as a client sees after a spurious or replayed notification.
    pub fn notify_watches(&self, path: &str, kind: EventKind) {
        self.inner.lock().fire(path, kind);
    }

    /// Watches currently registered on `path` across all sessions.
    pub fn watch_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .sessions
            .values()
            .map(|slot| slot.watches.iter().filter(|w| w.path == path).count())
            .sum()
    }

    /// Make the next create commit but report a timeout to the caller.
    pub fn fail_next_create_after_commit(&self) {
        self.inner.lock().fail_next_create = true;
    }

    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn exists_node(&self, path: &str) -> bool {
        self.inner.lock().node_exists(path)
    }

    /// Number of nodes, not counting `/`.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn create_calls(&self) -> u64 {
        self.inner.lock().create_calls
    }

    pub fn session_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Session owning the ephemeral node at `path`, if any.
    pub fn owner_of(&self, path: &str) -> Option<i64> {
        self.inner.lock().nodes.get(path).and_then(|node| node.owner)
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinator {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn Session>, SessionEvents)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut ns = self.inner.lock();

        let id = ns.next_session_id;
        ns.next_session_id += 1;

        let mut slot = SessionSlot {
            state: SessionState::Disconnected,
            events: events_tx,
            watches: Vec::new(),
        };
        slot.transition(SessionState::Connecting);
        if !ns.unreachable {
            slot.transition(SessionState::Connected);
            slot.transition(SessionState::HasSession);
        }
        ns.sessions.insert(id, slot);

        debug!(
            session_id = id,
            servers = ?servers,
            session_timeout_ms = session_timeout.as_millis() as u64,
            "Opened embedded coordination session"
        );

        let session: Arc<dyn Session> = Arc::new(MemorySession {
            id,
            inner: self.inner.clone(),
        });
        Ok((session, events_rx))
    }
}

/// A session against [`MemoryCoordinator`].
pub struct MemorySession {
    id: i64,
    inner: Arc<Mutex<Namespace>>,
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> i64 {
        self.id
    }

    fn state(&self) -> SessionState {
        let ns = self.inner.lock();
        match ns.sessions.get(&self.id) {
            Some(_) if ns.unreachable => SessionState::Disconnected,
            Some(slot) => slot.state,
            None => SessionState::Closed,
        }
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, _acl: &Acl) -> Result<String> {
        round_trip().await;
        let mut ns = self.inner.lock();
        ns.create_calls += 1;
        ns.check_session(self.id)?;
        validate_path(path)?;

        if ns.node_exists(path) {
            return Err(ElectionError::NodeExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !ns.node_exists(parent) {
            return Err(ElectionError::NoNode(parent.to_string()));
        }
        if ns.nodes.get(parent).is_some_and(|node| node.owner.is_some()) {
            return Err(ElectionError::NoChildrenForEphemerals(parent.to_string()));
        }

        let owner = match mode {
            CreateMode::Permanent => None,
            CreateMode::Ephemeral => Some(self.id),
        };
        ns.nodes.insert(path.to_string(), Node { data: data.to_vec(), owner });
        ns.fire(parent, EventKind::NodeChildrenChanged);

        if std::mem::take(&mut ns.fail_next_create) {
            return Err(ElectionError::Connection(format!("create {} timed out", path)));
        }
        Ok(path.to_string())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        round_trip().await;
        let ns = self.inner.lock();
        ns.check_session(self.id)?;
        validate_path(path)?;
        Ok(ns.node_exists(path))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        round_trip().await;
        let ns = self.inner.lock();
        ns.check_session(self.id)?;
        validate_path(path)?;
        if path == "/" {
            return Ok(Vec::new());
        }
        ns.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| ElectionError::NoNode(path.to_string()))
    }

    async fn children_watch(&self, path: &str) -> Result<WatchReceiver> {
        round_trip().await;
        let mut ns = self.inner.lock();
        ns.check_session(self.id)?;
        validate_path(path)?;
        if !ns.node_exists(path) {
            return Err(ElectionError::NoNode(path.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        if let Some(slot) = ns.sessions.get_mut(&self.id) {
            slot.watches.push(PendingWatch {
                path: path.to_string(),
                tx,
            });
        }
        Ok(rx)
    }

    async fn close(&self) {
        self.inner.lock().end_session(self.id, SessionState::Closed);
    }
}
