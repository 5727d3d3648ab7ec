//! Election Engine Integration Tests
//!
//! Tests for:
//! - Mutual exclusion between racing candidates
//! - Failover after the leader's session ends
//! - Rejoining with a new session after expiry
//! - Watch re-registration on non-terminal events
//! - Leader task cancellation and stop callbacks
//! - Shutdown while leading
//! - Behaviour while the coordination service is unreachable

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ze_election::{
    Election, ElectionConfig, ElectionError, ElectionState, EventKind, LeaderCallbacks,
    MemoryCoordinator,
};

/// Records leadership callbacks
struct RecordingCallbacks {
    started: AtomicU32,
    stopped: AtomicU32,
    leader_task_cancelled: AtomicBool,
    fail_leader_task: bool,
}

impl RecordingCallbacks {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicU32::new(0),
            stopped: AtomicU32::new(0),
            leader_task_cancelled: AtomicBool::new(false),
            fail_leader_task: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicU32::new(0),
            stopped: AtomicU32::new(0),
            leader_task_cancelled: AtomicBool::new(false),
            fail_leader_task: true,
        })
    }

    fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> u32 {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaderCallbacks for RecordingCallbacks {
    async fn on_started_leading(&self, token: CancellationToken) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_leader_task {
            anyhow::bail!("leader work failed");
        }
        token.cancelled().await;
        self.leader_task_cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_stopped_leading(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

struct Candidate {
    election: Arc<Election>,
    callbacks: Arc<RecordingCallbacks>,
    cancel: CancellationToken,
    handle: JoinHandle<ze_election::Result<()>>,
}

impl Candidate {
    async fn stop(self) {
        self.cancel.cancel();
        tokio_test::assert_ok!(self.handle.await.unwrap());
    }
}

fn config(identity: &str, callbacks: Arc<RecordingCallbacks>, backoff: Duration) -> ElectionConfig {
    ElectionConfig::new("zk1:2181,zk2:2181", "/election", "leader", callbacks)
        .with_identity(identity)
        .with_backoff(backoff)
}

async fn start_with(
    coordinator: &MemoryCoordinator,
    identity: &str,
    callbacks: Arc<RecordingCallbacks>,
    backoff: Duration,
) -> Candidate {
    let election = Arc::new(
        Election::new(config(identity, callbacks.clone(), backoff), coordinator)
            .await
            .unwrap(),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let election = election.clone();
        let cancel = cancel.clone();
        async move { election.run(cancel).await }
    });
    Candidate {
        election,
        callbacks,
        cancel,
        handle,
    }
}

async fn start(coordinator: &MemoryCoordinator, identity: &str) -> Candidate {
    start_with(coordinator, identity, RecordingCallbacks::new(), Duration::from_millis(50)).await
}

/// Poll `condition` every 5ms until it holds or `limit` elapses.
async fn eventually<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_single_candidate_becomes_leader() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;

    assert!(tokio::time::timeout(Duration::from_secs(2), a.election.wait_for_leadership())
        .await
        .unwrap());
    assert!(a.election.is_leader());
    assert_eq!(a.election.state(), ElectionState::Leading);
    assert_eq!(
        coordinator.node_data("/election/leader"),
        Some(a.election.resource_id().as_bytes().to_vec())
    );
    assert!(eventually(Duration::from_secs(1), || a.callbacks.started() == 1).await);

    a.stop().await;
}

#[tokio::test]
async fn test_mutual_exclusion_between_racing_candidates() {
    let coordinator = MemoryCoordinator::new();
    let mut candidates = Vec::new();
    for i in 0..5 {
        candidates.push(start(&coordinator, &format!("node-{}", i)).await);
    }

    let leaders = || candidates.iter().filter(|c| c.election.is_leader()).count();
    assert!(eventually(Duration::from_secs(2), || leaders() == 1).await);

    for _ in 0..40 {
        assert!(leaders() <= 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let leader = candidates.iter().find(|c| c.election.is_leader()).unwrap();
    assert_eq!(
        coordinator.node_data("/election/leader"),
        Some(leader.election.resource_id().as_bytes().to_vec())
    );
    let total_started: u32 = candidates.iter().map(|c| c.callbacks.started()).sum();
    assert_eq!(total_started, 1);

    for candidate in candidates {
        candidate.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_standby_takes_over_after_leader_session_closes() {
    let coordinator = MemoryCoordinator::new();
    let a = start_with(&coordinator, "a", RecordingCallbacks::new(), Duration::from_secs(2)).await;
    assert!(a.election.wait_for_leadership().await);

    let b = start_with(&coordinator, "b", RecordingCallbacks::new(), Duration::from_secs(2)).await;
    // b has lost the race once and is backing off
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.election.state(), ElectionState::Idle);
    assert!(!b.election.is_leader());

    coordinator.expire_session(a.election.session_id());
    assert!(!coordinator.exists_node("/election/leader"));

    // within one backoff interval plus propagation
    assert!(eventually(Duration::from_millis(2100), || b.election.is_leader()).await);
    assert!(eventually(Duration::from_millis(100), || !a.election.is_leader()).await);
    assert_eq!(
        coordinator.node_data("/election/leader"),
        Some(b.election.resource_id().as_bytes().to_vec())
    );

    assert_eq!(a.callbacks.stopped(), 1);
    assert!(a.callbacks.leader_task_cancelled.load(Ordering::SeqCst));
    assert_eq!(b.callbacks.stopped(), 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_sole_candidate_leads_again_after_session_expiry() {
    let coordinator = MemoryCoordinator::new();
    let a = start_with(&coordinator, "a", RecordingCallbacks::new(), Duration::from_millis(10)).await;
    assert!(a.election.wait_for_leadership().await);
    let first_session = a.election.session_id();

    coordinator.expire_session(first_session);
    assert!(!coordinator.exists_node("/election/leader"));

    assert!(eventually(Duration::from_secs(1), || a.callbacks.stopped() == 1).await);
    assert!(eventually(Duration::from_secs(1), || a.election.is_leader()).await);
    assert!(eventually(Duration::from_secs(1), || a.callbacks.started() == 2).await);

    let session_id = a.election.session_id();
    assert_ne!(session_id, first_session);
    assert!(a.election.is_connected());
    assert_eq!(coordinator.owner_of("/election/leader"), Some(session_id));
    assert_eq!(
        coordinator.node_data("/election/leader"),
        Some(a.election.resource_id().as_bytes().to_vec())
    );

    let election = a.election.clone();
    a.stop().await;
    assert!(!election.is_connected());
    assert!(coordinator.session_ids().is_empty());
}

#[tokio::test]
async fn test_non_terminal_watch_event_keeps_leadership() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;
    assert!(a.election.wait_for_leadership().await);
    assert!(eventually(Duration::from_secs(1), || {
        coordinator.watch_count("/election/leader") == 1
    })
    .await);

    coordinator.notify_watches("/election/leader", EventKind::NodeChildrenChanged);
    assert_eq!(coordinator.watch_count("/election/leader"), 0);

    // the single-shot watch is registered again
    assert!(eventually(Duration::from_secs(1), || {
        coordinator.watch_count("/election/leader") == 1
    })
    .await);
    assert!(a.election.is_leader());
    assert_eq!(a.election.state(), ElectionState::Leading);
    assert_eq!(a.callbacks.started(), 1);
    assert_eq!(a.callbacks.stopped(), 0);

    // the new registration still sees the slot go away
    assert!(coordinator.delete_node("/election/leader"));
    assert!(eventually(Duration::from_secs(1), || a.callbacks.stopped() == 1).await);
    assert!(a.callbacks.leader_task_cancelled.load(Ordering::SeqCst));

    a.stop().await;
}

#[tokio::test]
async fn test_deleted_slot_is_reclaimed_by_live_leader() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;
    assert!(a.election.wait_for_leadership().await);
    assert!(eventually(Duration::from_secs(1), || a.callbacks.started() == 1).await);

    assert!(coordinator.delete_node("/election/leader"));

    assert!(eventually(Duration::from_secs(1), || a.callbacks.stopped() == 1).await);
    assert!(a.callbacks.leader_task_cancelled.load(Ordering::SeqCst));
    assert!(eventually(Duration::from_secs(1), || a.callbacks.started() == 2).await);
    assert!(a.election.is_leader());

    a.stop().await;
}

#[tokio::test]
async fn test_cancel_while_leading_stops_once_and_closes_session() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;
    assert!(a.election.wait_for_leadership().await);
    let session_id = a.election.session_id();
    let callbacks = a.callbacks.clone();
    let election = a.election.clone();

    a.stop().await;

    assert_eq!(callbacks.stopped(), 1);
    assert!(eventually(Duration::from_secs(1), || {
        callbacks.leader_task_cancelled.load(Ordering::SeqCst)
    })
    .await);
    assert!(!election.is_leader());
    assert!(!election.is_connected());
    assert_eq!(election.state(), ElectionState::Terminated);
    assert!(!coordinator.session_ids().contains(&session_id));
    assert!(!coordinator.exists_node("/election/leader"));
    assert!(coordinator.exists_node("/election"));

    let creates = coordinator.create_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(coordinator.create_calls(), creates);
    assert!(!election.wait_for_leadership().await);
}

#[tokio::test]
async fn test_cancel_while_following_never_calls_stop() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;
    assert!(a.election.wait_for_leadership().await);
    let b = start(&coordinator, "b").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let callbacks = b.callbacks.clone();
    b.stop().await;
    assert_eq!(callbacks.started(), 0);
    assert_eq!(callbacks.stopped(), 0);
    assert!(a.election.is_leader());

    a.stop().await;
}

#[tokio::test]
async fn test_failing_leader_task_keeps_leadership() {
    let coordinator = MemoryCoordinator::new();
    let a = start_with(
        &coordinator,
        "a",
        RecordingCallbacks::failing(),
        Duration::from_millis(50),
    )
    .await;

    assert!(a.election.wait_for_leadership().await);
    assert!(eventually(Duration::from_secs(1), || a.election.callback_failures() == 1).await);
    assert!(a.election.is_leader());
    assert_eq!(a.callbacks.stopped(), 0);

    a.stop().await;
}

#[tokio::test]
async fn test_unreachable_service_retries_until_it_recovers() {
    let coordinator = MemoryCoordinator::new();
    let a = start(&coordinator, "a").await;
    assert!(a.election.wait_for_leadership().await);
    let b = start(&coordinator, "b").await;

    coordinator.set_unreachable(true);
    coordinator.delete_node("/election/leader");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!a.election.is_leader());
    assert!(!b.election.is_leader());

    coordinator.set_unreachable(false);
    let leaders = || [&a, &b].iter().filter(|c| c.election.is_leader()).count();
    assert!(eventually(Duration::from_secs(2), || leaders() == 1).await);

    a.stop().await;
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_fails_when_service_never_connects() {
    let coordinator = MemoryCoordinator::new();
    coordinator.set_unreachable(true);

    let err = Election::new(
        config("a", RecordingCallbacks::new(), Duration::from_secs(2)),
        &coordinator,
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err, ElectionError::ConnectTimeout(Duration::from_secs(3)));
}

#[tokio::test]
async fn test_new_rejects_unreachable_slot_names() {
    let coordinator = MemoryCoordinator::new();

    let err = Election::new(
        ElectionConfig::new("zk1:2181", "/election", "a/b", RecordingCallbacks::new()),
        &coordinator,
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err, ElectionError::Config("leaderElectionID should not contain '/'".to_string()));

    let err = Election::new(
        ElectionConfig::new("zk1:2181", "/a//b", "leader", RecordingCallbacks::new()),
        &coordinator,
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err, ElectionError::Config("root path should not contain '//'".to_string()));

    // no session was opened for either
    assert!(coordinator.session_ids().is_empty());
}
