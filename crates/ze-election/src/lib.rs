//! zkelect Leader Election
//!
//! Exclusive leader election for process replicas coordinated through a
//! ZooKeeper-style service.
//!
//! # Features
//!
//! - **Ephemeral leader slot**: the leader is whoever's resource id is stored
//!   in the ephemeral node at `root/electionId`
//! - **Race-free ownership**: every acquisition re-reads the slot instead of
//!   trusting the create result
//! - **Automatic failover**: the slot disappears with the leader's session and
//!   a standby claims it on its next attempt
//! - **Leadership callbacks**: a cancellable leader task per leadership period
//!   and a synchronous stop hook
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ze_election::{Election, ElectionConfig, FnCallbacks, MemoryCoordinator};
//!
//! async fn example() {
//!     let callbacks = FnCallbacks::new(
//!         |token: CancellationToken| async move {
//!             token.cancelled().await;
//!             Ok::<(), anyhow::Error>(())
//!         },
//!         || println!("no longer leading"),
//!     );
//!     let config = ElectionConfig::new("zk1:2181,zk2:2181", "/election", "leader", Arc::new(callbacks))
//!         .with_identity("worker-1");
//!
//!     let coordinator = MemoryCoordinator::new();
//!     let election = Arc::new(Election::new(config, &coordinator).await.unwrap());
//!
//!     let cancel = CancellationToken::new();
//!     let runner = election.clone();
//!     let handle = tokio::spawn({
//!         let cancel = cancel.clone();
//!         async move { runner.run(cancel).await }
//!     });
//!
//!     if election.wait_for_leadership().await {
//!         println!("leading as {}", election.resource_id());
//!     }
//!
//!     cancel.cancel();
//!     let _ = handle.await;
//! }
//! ```

pub mod client;
mod config;
mod election;
mod error;
mod lock;
pub mod memory;

pub use client::{
    Acl, CoordinationClient, CreateMode, EventKind, Session, SessionEvent, SessionEvents,
    SessionState, WatchEvent, WatchReceiver,
};
pub use config::{ElectionConfig, FnCallbacks, LeaderCallbacks, DEFAULT_BACKOFF};
pub use election::{Election, ElectionState};
pub use error::{ElectionError, Result};
pub use lock::{ResourceLock, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SESSION_TIMEOUT};
pub use memory::MemoryCoordinator;
