//! Election configuration and leadership callbacks

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ElectionError, Result};
use crate::lock::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SESSION_TIMEOUT};

/// Wait between failed acquisitions and after losing leadership.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Application hooks run on leadership transitions.
#[async_trait]
pub trait LeaderCallbacks: Send + Sync {
    /// Runs in its own task for one leadership period.
    ///
    /// `token` is cancelled when leadership ends; the implementation must
    /// return promptly once it is.
    async fn on_started_leading(&self, token: CancellationToken) -> anyhow::Result<()>;

    /// Runs on the election loop when a leadership period ends,
    /// including shutdown while leading.
    fn on_stopped_leading(&self);
}

/// [`LeaderCallbacks`] built from two closures.
pub struct FnCallbacks<S, T> {
    on_started: S,
    on_stopped: T,
}

impl<S, Fut, T> FnCallbacks<S, T>
where
    S: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    T: Fn() + Send + Sync + 'static,
{
    pub fn new(on_started: S, on_stopped: T) -> Self {
        Self { on_started, on_stopped }
    }
}

#[async_trait]
impl<S, Fut, T> LeaderCallbacks for FnCallbacks<S, T>
where
    S: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    T: Fn() + Send + Sync + 'static,
{
    async fn on_started_leading(&self, token: CancellationToken) -> anyhow::Result<()> {
        (self.on_started)(token).await
    }

    fn on_stopped_leading(&self) {
        (self.on_stopped)()
    }
}

/// Immutable settings of one election candidate.
#[derive(Clone)]
pub struct ElectionConfig {
    /// Comma-joined coordination service addresses
    pub servers: String,

    /// Permanent parent node, must begin with '/'
    pub election_root: String,

    /// Name of the leader slot under the root
    pub election_id: String,

    /// Label used in logs only
    pub identity: String,

    pub callbacks: Arc<dyn LeaderCallbacks>,

    pub backoff: Duration,

    pub connect_timeout: Duration,

    pub session_timeout: Duration,
}

impl ElectionConfig {
    pub fn new(
        servers: impl Into<String>,
        election_root: impl Into<String>,
        election_id: impl Into<String>,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Self {
        Self {
            servers: servers.into(),
            election_root: election_root.into(),
            election_id: election_id.into(),
            identity: format!("candidate-{}", &ze_common::guid()[..8]),
            callbacks,
            backoff: DEFAULT_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if ze_common::is_blank(&self.servers) {
            return Err(ElectionError::Config("zk servers is required".to_string()));
        }
        if ze_common::is_blank(&self.election_root) {
            return Err(ElectionError::Config("root path is required".to_string()));
        }
        if !self.election_root.starts_with('/') {
            return Err(ElectionError::Config("root path should begin with '/'".to_string()));
        }
        if self.election_root.contains("//") {
            return Err(ElectionError::Config("root path should not contain '//'".to_string()));
        }
        if ze_common::is_blank(&self.election_id) {
            return Err(ElectionError::Config("leaderElectionID is required".to_string()));
        }
        if self.election_id.contains('/') {
            return Err(ElectionError::Config("leaderElectionID should not contain '/'".to_string()));
        }
        Ok(())
    }

    /// Root path without a trailing '/'.
    pub fn root_path(&self) -> &str {
        match self.election_root.trim_end_matches('/') {
            "" => "/",
            root => root,
        }
    }

    /// Path of the leader slot, `root/electionId`.
    pub fn leader_path(&self) -> String {
        match self.root_path() {
            "/" => format!("/{}", self.election_id),
            root => format!("{}/{}", root, self.election_id),
        }
    }
}

impl fmt::Debug for ElectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionConfig")
            .field("servers", &self.servers)
            .field("election_root", &self.election_root)
            .field("election_id", &self.election_id)
            .field("identity", &self.identity)
            .field("backoff", &self.backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("session_timeout", &self.session_timeout)
            .finish_non_exhaustive()
    }
}
