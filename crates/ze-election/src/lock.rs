//! Resource Lock
//!
//! Holds the coordination session used by one election and exposes the
//! four primitives the acquisition protocol needs. Construction blocks until
//! the session reports `Connected`, or fails after the connect timeout.
//! A session that expires is replaced on the next [`ResourceLock::ensure_session`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{
    Acl, CoordinationClient, CreateMode, Session, SessionEvents, SessionState, WatchReceiver,
};
use crate::error::{ElectionError, Result};

/// Default wait for the first `Connected` event.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default session timeout requested from the service.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ResourceLock {
    client: Arc<dyn CoordinationClient>,
    servers: Vec<String>,
    session_timeout: Duration,
    connect_timeout: Duration,
    session: Mutex<Arc<dyn Session>>,
    acl: Acl,
    closed: AtomicBool,
}

impl ResourceLock {
    /// Open a session against `servers` (comma-joined) and wait for it to connect.
    pub async fn connect<C>(
        client: &C,
        servers: &str,
        session_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self>
    where
        C: CoordinationClient + Clone + 'static,
    {
        let servers = ze_common::split_servers(servers);
        if servers.is_empty() {
            return Err(ElectionError::Config("zk servers is required".to_string()));
        }

        let client: Arc<dyn CoordinationClient> = Arc::new(client.clone());
        let session = open_session(client.as_ref(), &servers, session_timeout, connect_timeout).await?;

        Ok(Self {
            client,
            servers,
            session_timeout,
            connect_timeout,
            session: Mutex::new(session),
            acl: Acl::world_all(),
            closed: AtomicBool::new(false),
        })
    }

    fn session(&self) -> Arc<dyn Session> {
        self.session.lock().clone()
    }

    /// Replace an expired or closed session with a new one.
    ///
    /// A live or merely disconnected session is kept; the client reconnects
    /// those by itself. Fails with `SessionClosed` once the lock is closed.
    pub async fn ensure_session(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ElectionError::SessionClosed);
        }

        let current = self.session();
        let state = current.state();
        if !matches!(state, SessionState::Expired | SessionState::Closed) {
            return Ok(());
        }

        warn!(session_id = current.id(), state = %state, "Coordination session ended, reconnecting");
        current.close().await;

        let session = open_session(
            self.client.as_ref(),
            &self.servers,
            self.session_timeout,
            self.connect_timeout,
        )
        .await?;

        if self.closed.load(Ordering::SeqCst) {
            session.close().await;
            return Err(ElectionError::SessionClosed);
        }

        info!(
            previous_session_id = current.id(),
            session_id = session.id(),
            "Re-established coordination session"
        );
        *self.session.lock() = session;
        Ok(())
    }

    /// Create a node and check the service created exactly `path`.
    pub async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let created = self.session().create(path, data, mode, &self.acl).await?;
        if created != path {
            return Err(ElectionError::CreatedPathMismatch {
                want: path.to_string(),
                created,
            });
        }
        Ok(created)
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.session().exists(path).await
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.session().get(path).await
    }

    /// Register a single-shot children watch on `path`.
    pub async fn watch(&self, path: &str) -> Result<WatchReceiver> {
        self.session().children_watch(path).await
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.session().state().is_live()
    }

    /// Id of the current session; changes after a reconnect.
    pub fn session_id(&self) -> i64 {
        self.session().id()
    }

    /// Close the session. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.session();
        debug!(session_id = session.id(), "Closing coordination session");
        session.close().await;
    }
}

async fn open_session(
    client: &dyn CoordinationClient,
    servers: &[String],
    session_timeout: Duration,
    connect_timeout: Duration,
) -> Result<Arc<dyn Session>> {
    let (session, mut events) = client.connect(servers, session_timeout).await?;

    if let Err(e) = wait_connected(&mut events, connect_timeout).await {
        session.close().await;
        return Err(e);
    }
    info!(session_id = session.id(), servers = ?servers, "Connected to coordination service");

    tokio::spawn(log_session_events(session.id(), events));
    Ok(session)
}

async fn wait_connected(events: &mut SessionEvents, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if event.state == SessionState::Connected => return Ok(()),
            Ok(Some(event)) => {
                debug!(state = %event.state, "Waiting for coordination session");
            }
            Ok(None) => {
                return Err(ElectionError::Connection(
                    "session event stream closed before connecting".to_string(),
                ));
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Connect to coordination service timeout");
                return Err(ElectionError::ConnectTimeout(timeout));
            }
        }
    }
}

async fn log_session_events(session_id: i64, mut events: SessionEvents) {
    while let Some(event) = events.recv().await {
        if event.state.is_live() {
            debug!(session_id, state = %event.state, "Coordination session state changed");
        } else {
            warn!(session_id, state = %event.state, "Coordination session state changed");
        }
    }
    debug!(session_id, "Coordination session event stream ended");
}
