//! # Replistore
//!
//! A replica-aware data access layer for task records backed by
//! PostgreSQL: writes go to one authoritative primary, reads are
//! distributed across a pool of read replicas, and a startup gate brings
//! the primary to a known schema state before any traffic is served.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           replistore                             │
//! │                                                                  │
//! │  boot ──► StartupGate ──► wait_until_ready ──► apply_pending     │
//! │           (scoped pool)   (bounded probe)      (migration ledger)│
//! │                │                                                 │
//! │                ▼ ready                                           │
//! │  ┌─────────────┐     ┌───────────────┐     ┌──────────────────┐  │
//! │  │ TaskService │────►│ ReplicaRouter │────►│ primary PgPool   │  │
//! │  │ (facade)    │     │ write / read  │     ├──────────────────┤  │
//! │  └─────────────┘     │ read_from(i)  │────►│ replica PgPools  │  │
//! │                      └───────────────┘     │ (round-robin)    │  │
//! │                                            └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Routing Guarantees
//!
//! - Writes always target the primary; failures surface unchanged and are
//!   never retried (a duplicated write is worse than a failed one).
//! - Distributed reads reflect *some* replica's current state; replica
//!   lag is an accepted property, not hidden by retries.
//! - `read_from(i)` targets one named replica; `read_from_primary()`
//!   gives read-your-write consistency.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replistore::{Config, ConnectionSet, NewTask, TaskService};
//!
//! #[tokio::main]
//! async fn main() -> replistore::Result<()> {
//!     let config = Config::from_env()?;
//!
//!     // Fatal on failure: the process must not serve without a ready,
//!     // fully migrated primary.
//!     replistore::startup::run(&config).await?;
//!
//!     let connections = ConnectionSet::connect(&config);
//!     let tasks = TaskService::new(connections.router());
//!
//!     let created = tasks.create(NewTask::new("write the docs")).await?;
//!     let seen_immediately = tasks.list_from_primary().await?;
//!     let maybe_lagging = tasks.list().await?;
//!     # let _ = (created, seen_immediately, maybe_lagging);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod migrate;
pub mod probe;
pub mod router;
pub mod startup;
pub mod tasks;

// Re-exports for convenience
pub use config::Config;
pub use connection::ConnectionSet;
pub use error::{Result, StoreError};
pub use migrate::{Migration, MigrationSource};
pub use probe::{ProbeConfig, ProbeReport};
pub use router::ReplicaRouter;
pub use tasks::{MemoryTaskStore, NewTask, Task, TaskPatch, TaskService, TaskStore};
