//! Election Engine
//!
//! One control loop per candidate:
//! - ensure the permanent election root exists
//! - claim the ephemeral leader slot with this candidate's resource id
//! - re-read the slot, since only the stored id proves ownership
//! - while leading, block on single-shot watches until the slot is deleted,
//!   the session degrades or the caller cancels
//! - back off and start over, opening a new session if the old one expired

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{CoordinationClient, CreateMode, EventKind};
use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};
use crate::lock::ResourceLock;

/// Position of the candidate in its acquire/watch/retreat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Between attempts, usually backing off
    Idle,
    /// Running the acquisition protocol
    Acquiring,
    /// Owns the leader slot and watches it
    Leading,
    /// Leadership ended, callbacks are being torn down
    Draining,
    /// The loop has exited and the session is closed
    Terminated,
}

/// A leader election candidate.
pub struct Election {
    config: ElectionConfig,
    lock: ResourceLock,
    resource_id: String,
    leader_path: String,
    is_leader: AtomicBool,
    started: AtomicBool,
    callback_failures: Arc<AtomicU64>,
    state_tx: watch::Sender<ElectionState>,
    state_rx: watch::Receiver<ElectionState>,
}

impl Election {
    /// Validate `config`, connect to the coordination service and mint a
    /// fresh resource id for this candidate.
    pub async fn new<C>(config: ElectionConfig, client: &C) -> Result<Self>
    where
        C: CoordinationClient + Clone + 'static,
    {
        config.validate()?;

        let lock = ResourceLock::connect(
            client,
            &config.servers,
            config.session_timeout,
            config.connect_timeout,
        )
        .await?;

        let resource_id = ze_common::guid();
        let leader_path = config.leader_path();
        let (state_tx, state_rx) = watch::channel(ElectionState::Idle);

        info!(
            identity = %config.identity,
            resource_id = %resource_id,
            leader_path = %leader_path,
            "Created election candidate"
        );

        Ok(Self {
            config,
            lock,
            resource_id,
            leader_path,
            is_leader: AtomicBool::new(false),
            started: AtomicBool::new(false),
            callback_failures: Arc::new(AtomicU64::new(0)),
            state_tx,
            state_rx,
        })
    }

    /// Run the election until `cancel` fires, then close the session.
    ///
    /// Coordination failures never end the loop; they are logged and retried
    /// after the backoff. May only be called once.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ElectionError::AlreadyRunning);
        }

        let span = info_span!(
            "election",
            identity = %self.config.identity,
            leader_path = %self.leader_path,
        );

        async {
            info!(resource_id = %self.resource_id, "Starting leader election");
            while !cancel.is_cancelled() {
                self.run_once(&cancel).await;
            }
            self.set_state(ElectionState::Terminated);
            self.release().await;
            info!("Leader election stopped");
        }
        .instrument(span)
        .await;

        Ok(())
    }

    /// One Idle -> Acquiring -> Leading -> Draining pass.
    async fn run_once(&self, cancel: &CancellationToken) {
        self.set_state(ElectionState::Acquiring);

        if let Err(e) = self.acquire().await {
            if e.is_race() {
                debug!(error = %e, "Leader slot held by another candidate");
            } else {
                warn!(error = %e, "Failed to acquire leadership");
            }
            self.set_state(ElectionState::Idle);
            self.backoff(cancel).await;
            return;
        }

        let leadership = cancel.child_token();
        self.is_leader.store(true, Ordering::SeqCst);
        self.set_state(ElectionState::Leading);
        info!("Acquired leadership");

        self.spawn_started_leading(leadership.clone());

        let outcome = self.watch(cancel).await;

        self.set_state(ElectionState::Draining);
        leadership.cancel();
        self.is_leader.store(false, Ordering::SeqCst);
        self.config.callbacks.on_stopped_leading();

        match outcome {
            Ok(()) => info!("Stopped leading on shutdown"),
            Err(e) => {
                warn!(error = %e, "Lost leadership");
                self.set_state(ElectionState::Idle);
                self.backoff(cancel).await;
            }
        }
    }

    /// Claim the leader slot. `Ok` means the slot holds our resource id.
    pub(crate) async fn acquire(&self) -> Result<()> {
        self.lock.ensure_session().await?;
        self.ensure_root().await?;

        match self.elected().await {
            Ok(()) => return Ok(()),
            Err(ElectionError::NoNode(_)) => {
                match self
                    .lock
                    .create(&self.leader_path, self.resource_id.as_bytes(), CreateMode::Ephemeral)
                    .await
                {
                    Ok(_) => {}
                    Err(ElectionError::NodeExists(_)) => {
                        debug!("Leader slot was created concurrently");
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        // a create result alone never proves ownership
        self.elected().await
    }

    /// Compare the stored slot value with our resource id.
    async fn elected(&self) -> Result<()> {
        let data = self.lock.get(&self.leader_path).await?;
        let holder = String::from_utf8_lossy(&data);
        if holder.eq_ignore_ascii_case(&self.resource_id) {
            Ok(())
        } else {
            Err(ElectionError::NotOwner(self.leader_path.clone()))
        }
    }

    /// Create the election root and any missing ancestors as permanent nodes.
    async fn ensure_root(&self) -> Result<()> {
        for path in ancestors(self.config.root_path()) {
            if self.lock.exists(&path).await? {
                continue;
            }
            match self.lock.create(&path, &[], CreateMode::Permanent).await {
                Ok(_) => debug!(path = %path, "Created election root node"),
                Err(ElectionError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Block while leading. `Ok` means cancelled, `Err` means leadership lost.
    async fn watch(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let event_rx = self.lock.watch(&self.leader_path).await?;

            tokio::select! {
                event = event_rx => match event {
                    Ok(event) if event.kind == EventKind::NodeDeleted => {
                        return Err(ElectionError::LeadershipLost(event.kind.to_string()));
                    }
                    Ok(event) if !event.state.is_live() => {
                        return Err(ElectionError::LeadershipLost(event.state.to_string()));
                    }
                    Ok(event) => {
                        debug!(kind = %event.kind, state = %event.state, "Leader slot watch fired");
                    }
                    Err(_) => return Err(ElectionError::SessionClosed),
                },
                _ = cancel.cancelled() => {
                    info!("Received cancel while leading");
                    return Ok(());
                }
            }
        }
    }

    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.backoff) => {}
            _ = cancel.cancelled() => {}
        }
    }

    fn spawn_started_leading(&self, token: CancellationToken) {
        let callbacks = self.config.callbacks.clone();
        let failures = self.callback_failures.clone();

        let task = tokio::spawn(
            async move { callbacks.on_started_leading(token).await }.in_current_span(),
        );

        tokio::spawn(
            async move {
                match task.await {
                    Ok(Ok(())) => debug!("Leader task finished"),
                    Ok(Err(e)) => {
                        failures.fetch_add(1, Ordering::SeqCst);
                        error!(error = %e, "Leader task failed");
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::SeqCst);
                        error!(error = %e, "Leader task panicked");
                    }
                }
            }
            .in_current_span(),
        );
    }

    async fn release(&self) {
        self.is_leader.store(false, Ordering::SeqCst);
        self.lock.close().await;
    }

    fn set_state(&self, state: ElectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Best-effort view of leadership; never blocks.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ElectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state machine transitions
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state_rx.clone()
    }

    /// Wait until this candidate leads. Returns false if the election
    /// terminated first.
    pub async fn wait_for_leadership(&self) -> bool {
        let mut rx = self.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ElectionState::Leading => return true,
                ElectionState::Terminated => return false,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn leader_path(&self) -> &str {
        &self.leader_path
    }

    pub fn session_id(&self) -> i64 {
        self.lock.session_id()
    }

    pub fn is_connected(&self) -> bool {
        self.lock.is_connected()
    }

    /// Leader tasks that returned an error or panicked
    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::SeqCst)
    }
}

/// `/a/b/c` -> `/a`, `/a/b`, `/a/b/c`. `/` has no ancestors to create.
fn ancestors(root: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current = String::new();
    for part in root.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        paths.push(current.clone());
    }
    paths
}
