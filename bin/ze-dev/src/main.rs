//! zkelect Development Runner
//!
//! Starts several election candidates in one process against the embedded
//! coordinator and, optionally, crashes the current leader on an interval so
//! failover can be watched in the logs.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ZKELECT_CONFIG` | - | Path to a TOML config file |
//! | `ZKELECT_ROOT` | `/zkelect` | Election root node |
//! | `ZKELECT_ELECTION_ID` | `leader` | Leader slot name |
//! | `ZKELECT_BACKOFF_MS` | `2000` | Retry backoff |
//! | `ZKELECT_DEV_CANDIDATES` | `3` | Candidates to start |
//! | `ZKELECT_DEV_FAILOVER_INTERVAL_SECS` | `10` | Crash the leader this often (0 = never) |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | `json` for JSON logs |

use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ze_config::{AppConfig, ConfigLoader, ElectionSettings};
use ze_election::{Election, ElectionConfig, LeaderCallbacks, MemoryCoordinator};

/// Leader task that reports on an interval until its leadership ends.
struct LeaderWorker {
    identity: String,
    interval: Duration,
}

#[async_trait]
impl LeaderCallbacks for LeaderWorker {
    async fn on_started_leading(&self, token: CancellationToken) -> anyhow::Result<()> {
        info!(identity = %self.identity, "Started leading - beginning leader work");
        let mut ticker = tokio::time::interval(self.interval);
        let mut rounds: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    rounds += 1;
                    info!(identity = %self.identity, rounds, "Leader work round");
                }
                _ = token.cancelled() => {
                    info!(identity = %self.identity, rounds, "Leader work cancelled");
                    return Ok(());
                }
            }
        }
    }

    fn on_stopped_leading(&self) {
        warn!(identity = %self.identity, "Stopped leading");
    }
}

struct Replica {
    election: Arc<Election>,
    cancel: CancellationToken,
    handle: JoinHandle<ze_election::Result<()>>,
}

impl Replica {
    async fn stop(self) {
        self.cancel.cancel();
        match self.handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(identity = %self.election.identity(), error = %e, "Election ended with error"),
            Err(e) => error!(identity = %self.election.identity(), error = %e, "Election task failed"),
        }
    }
}

fn identity_for(settings: &ElectionSettings, index: usize) -> String {
    let base = if ze_common::is_blank(&settings.identity) {
        "candidate"
    } else {
        settings.identity.trim()
    };
    format!("{}-{}", base, index)
}

async fn start_replica(
    config: &AppConfig,
    coordinator: &MemoryCoordinator,
    identity: String,
    shutdown: &CancellationToken,
) -> Result<Replica> {
    let settings = &config.election;
    let worker = LeaderWorker {
        identity: identity.clone(),
        interval: Duration::from_millis(config.dev.leader_work_interval_ms.max(1)),
    };

    let election_config = ElectionConfig::new(
        settings.servers.clone(),
        settings.root.clone(),
        settings.election_id.clone(),
        Arc::new(worker),
    )
    .with_identity(identity)
    .with_backoff(settings.backoff())
    .with_connect_timeout(settings.connect_timeout())
    .with_session_timeout(settings.session_timeout());

    let election = Arc::new(Election::new(election_config, coordinator).await?);
    let cancel = shutdown.child_token();
    let handle = tokio::spawn({
        let election = election.clone();
        let cancel = cancel.clone();
        async move { election.run(cancel).await }
    });

    Ok(Replica {
        election,
        cancel,
        handle,
    })
}

/// Crash whichever replica leads and start a replacement with the same identity.
async fn force_failover(
    replicas: &mut [Replica],
    config: &AppConfig,
    coordinator: &MemoryCoordinator,
    shutdown: &CancellationToken,
) -> Result<()> {
    let Some(index) = replicas.iter().position(|r| r.election.is_leader()) else {
        info!("No leader elected yet - skipping forced failover");
        return Ok(());
    };

    let identity = replicas[index].election.identity().to_string();
    let session_id = replicas[index].election.session_id();
    warn!(identity = %identity, session_id, "Simulating leader crash");
    coordinator.expire_session(session_id);

    let replacement = start_replica(config, coordinator, identity, shutdown).await?;
    let crashed = std::mem::replace(&mut replicas[index], replacement);
    crashed.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    ze_common::logging::init_logging("ze-dev");

    info!("Starting zkelect development runner");

    let config = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::with_path(path).load()?,
        None => ConfigLoader::new().load()?,
    };
    info!(
        root = %config.election.root,
        election_id = %config.election.election_id,
        candidates = config.dev.candidates,
        "Configuration loaded"
    );

    let coordinator = MemoryCoordinator::new();
    let shutdown = CancellationToken::new();

    let mut replicas = Vec::with_capacity(config.dev.candidates);
    for index in 0..config.dev.candidates {
        let identity = identity_for(&config.election, index);
        replicas.push(start_replica(&config, &coordinator, identity, &shutdown).await?);
    }
    info!("Started {} candidates", replicas.len());
    info!("Press Ctrl+C to shutdown");

    let failover_every = config.dev.failover_interval_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(failover_every.max(1)));
    ticker.tick().await;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = ticker.tick(), if failover_every > 0 => {
                if let Err(e) = force_failover(&mut replicas, &config, &coordinator, &shutdown).await {
                    error!(error = %e, "Forced failover failed");
                }
            }
        }
    }
    info!("Shutdown signal received...");

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(30), async {
        for replica in replicas {
            replica.stop().await;
        }
    })
    .await;
    if stopped.is_err() {
        warn!("Timed out waiting for candidates to stop");
    }

    info!("zkelect development runner shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_for() {
        let mut settings = ElectionSettings::default();
        assert_eq!(identity_for(&settings, 0), "candidate-0");

        settings.identity = " worker ".to_string();
        assert_eq!(identity_for(&settings, 2), "worker-2");
    }

    #[tokio::test]
    async fn test_forced_failover_moves_leadership() {
        let mut config = AppConfig::default();
        config.election.backoff_ms = 20;
        config.dev.leader_work_interval_ms = 10;

        let coordinator = MemoryCoordinator::new();
        let shutdown = CancellationToken::new();
        let mut replicas = Vec::new();
        for index in 0..2 {
            let identity = identity_for(&config.election, index);
            replicas.push(start_replica(&config, &coordinator, identity, &shutdown).await.unwrap());
        }

        let has_one_leader = |replicas: &[Replica]| {
            replicas.iter().filter(|r| r.election.is_leader()).count() == 1
        };
        for _ in 0..200 {
            if has_one_leader(&replicas) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let first = replicas.iter().position(|r| r.election.is_leader()).unwrap();
        let first_session = replicas[first].election.session_id();

        force_failover(&mut replicas, &config, &coordinator, &shutdown).await.unwrap();
        assert!(!coordinator.session_ids().contains(&first_session));

        let mut leader_session = None;
        for _ in 0..200 {
            if let Some(r) = replicas.iter().find(|r| r.election.is_leader()) {
                leader_session = Some(r.election.session_id());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(leader_session.is_some());
        assert_ne!(leader_session, Some(first_session));

        shutdown.cancel();
        for replica in replicas {
            replica.stop().await;
        }
        assert!(coordinator.session_ids().is_empty());
    }
}
