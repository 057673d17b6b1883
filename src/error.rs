// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.

//! Error types for the replica-routed task store.
//!
//! Errors are categorized by the phase they occur in. Startup-phase errors
//! are fatal (the process must not serve traffic); runtime errors are local
//! to one operation and are surfaced to the caller unchanged.
//!
//! # Error Categories
//!
//! | Error Type | Fatal at startup | Description |
//! |------------|------------------|-------------|
//! | `ReadinessTimeout` | Yes | Primary unreachable after the full probe budget |
//! | `Migration` | Yes | A schema change failed to apply |
//! | `Config` | Yes | Configuration missing or malformed |
//! | `Store` | No | Runtime read/write failure from PostgreSQL |
//! | `Backend` | No | Runtime failure from a non-SQL backend |
//! | `InvalidReplica` | No | Direct replica index out of range |
//!
//! # Retry Behavior
//!
//! Nothing is retried automatically except the bounded readiness probe
//! loop itself. A failed replica read is never retried on another replica;
//! the caller decides whether to retry, fall back to the primary, or fail.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Errors that can occur while probing, migrating, or routing.
///
/// Use [`is_startup_fatal()`](Self::is_startup_fatal) to check whether the
/// error must terminate the process before it serves any traffic.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Primary store unreachable after the full retry budget.
    ///
    /// Fatal: the startup gate never signals ready and the process exits.
    #[error("primary store not ready after {attempts} attempts")]
    ReadinessTimeout { attempts: u32 },

    /// A schema migration failed to apply.
    ///
    /// Fatal: the store schema is not at the target version, so no traffic
    /// may be served. Carries the failing migration's identity and the
    /// underlying cause. Migrations before this one remain applied.
    #[error("migration {version} ({name}) failed to apply")]
    Migration {
        version: i64,
        name: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Runtime read/write failure from PostgreSQL.
    ///
    /// Surfaced to the caller unchanged. The router never retries these
    /// across stores; duplicate write side effects are worse than a
    /// failed request.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Runtime failure from a non-SQL backend implementation
    /// (in-memory stores, test doubles).
    #[error("backend error: {0}")]
    Backend(String),

    /// Caller asked for a replica index outside the configured range.
    ///
    /// Surfaced immediately; no store is contacted.
    #[error("invalid replica index {index} (configured replicas: {replicas})")]
    InvalidReplica { index: usize, replicas: usize },

    /// Invalid or missing configuration.
    ///
    /// Fatal: fix the environment and restart.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Check whether this error must abort startup.
    ///
    /// There is no partial-service mode: a fatal error here means the
    /// process exits non-zero without serving a single request.
    pub fn is_startup_fatal(&self) -> bool {
        match self {
            Self::ReadinessTimeout { .. } => true,
            Self::Migration { .. } => true,
            Self::Config(_) => true,
            Self::Store(_) => false,
            Self::Backend(_) => false,
            Self::InvalidReplica { .. } => false,
        }
    }
}
