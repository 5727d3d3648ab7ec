//! Coordination Client Interface
//!
//! The election only needs a small slice of a ZooKeeper-style service:
//! sessions, atomic create with an ephemeral flag, existence checks, reads
//! and single-shot children watches. Backends implement [`CoordinationClient`]
//! and [`Session`]; [`crate::memory::MemoryCoordinator`] is the embedded one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Session connection state reported by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Connected,
    HasSession,
    Disconnected,
    Expired,
    AuthFailed,
    Closed,
}

impl SessionState {
    /// Whether the session can still vouch for its ephemeral nodes.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::HasSession)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "StateConnecting",
            SessionState::Connected => "StateConnected",
            SessionState::HasSession => "StateHasSession",
            SessionState::Disconnected => "StateDisconnected",
            SessionState::Expired => "StateExpired",
            SessionState::AuthFailed => "StateAuthFailed",
            SessionState::Closed => "StateClosed",
        };
        f.write_str(name)
    }
}

/// What a watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// Session state transition with no node change attached
    Session,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::NodeCreated => "EventNodeCreated",
            EventKind::NodeDeleted => "EventNodeDeleted",
            EventKind::NodeDataChanged => "EventNodeDataChanged",
            EventKind::NodeChildrenChanged => "EventNodeChildrenChanged",
            EventKind::Session => "EventSession",
        };
        f.write_str(name)
    }
}

/// A single delivery from a children watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub state: SessionState,
    pub path: String,
}

/// A session state transition delivered on the connection event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub state: SessionState,
}

/// Connection event stream returned by [`CoordinationClient::connect`].
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Single-shot watch receiver. A dropped sender means the session is gone.
pub type WatchReceiver = oneshot::Receiver<WatchEvent>;

/// Node lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Permanent,
    /// Removed by the service when the creating session ends
    Ephemeral,
}

/// Access control attached to created nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub scheme: String,
    pub id: String,
    pub perms: u32,
}

impl Acl {
    pub const PERM_ALL: u32 = 0x1f;

    /// World readable and writable, the ACL used for every election node.
    pub fn world_all() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: Self::PERM_ALL,
        }
    }
}

/// A live session with the coordination service.
#[async_trait]
pub trait Session: Send + Sync {
    /// Service-assigned session id
    fn id(&self) -> i64;

    /// Last known connection state
    fn state(&self) -> SessionState;

    /// Atomically create a node, returning the created path.
    ///
    /// Fails with `NodeExists` when the path is taken and `NoNode` when the
    /// parent is missing.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &Acl) -> Result<String>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a node's value. Fails with `NoNode` when absent.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Register a single-shot watch on the children of `path`.
    ///
    /// The receiver fires once on deletion of `path`, a change of its
    /// children, or a session state transition.
    async fn children_watch(&self, path: &str) -> Result<WatchReceiver>;

    /// End the session. Ephemeral nodes owned by it are removed.
    async fn close(&self);
}

/// Entry point of a coordination backend.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn Session>, SessionEvents)>;
}
