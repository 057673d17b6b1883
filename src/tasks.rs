// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.

//! Task records and store backends.
//!
//! Defines the [`TaskStore`] trait every backend implements, the PostgreSQL
//! implementation on [`PgPool`], an in-memory implementation for tests and
//! standalone mode, and the [`TaskService`] facade the request layer calls.
//!
//! The record shape itself is deliberately boring (a title, a completion
//! flag, a creation timestamp); the interesting part is that every backend
//! behind the trait can sit on either side of the replica router.
//!
//! # Replica semantics of [`MemoryTaskStore`]
//!
//! - `store.clone()` shares the underlying rows: a clone behaves like a
//!   fully caught-up replica of the original.
//! - `MemoryTaskStore::new()` holds its own empty rows: next to a written
//!   primary it behaves like a replica that has not caught up yet.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BoxFuture, Result, StoreError};
use crate::migrate::{Migration, MigrationLedger};
use crate::router::ReplicaRouter;

/// A task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// Partial update for a task. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

/// Trait defining what the routing layer needs from a task backend.
///
/// The PostgreSQL pools implement this for production; [`MemoryTaskStore`]
/// implements it for tests and standalone mode. The trait is the only
/// seam the router and the startup gate see, which keeps both testable
/// without a running database.
pub trait TaskStore: Send + Sync {
    /// Minimal no-op query used by the readiness probe.
    ///
    /// Succeeds iff the store can currently accept queries.
    fn ping(&self) -> BoxFuture<'_, ()>;

    /// Insert a new task and return the stored record.
    fn insert(&self, task: NewTask) -> BoxFuture<'_, Task>;

    /// List all tasks in creation order.
    fn list(&self) -> BoxFuture<'_, Vec<Task>>;

    /// Fetch a single task by id.
    fn get(&self, id: Uuid) -> BoxFuture<'_, Option<Task>>;

    /// Apply a partial update. Returns the updated record, or `None` if
    /// no task with this id exists.
    fn update(&self, id: Uuid, patch: TaskPatch) -> BoxFuture<'_, Option<Task>>;

    /// Delete a task by id. Returns whether a row was removed.
    fn delete(&self, id: Uuid) -> BoxFuture<'_, bool>;
}

const TASK_COLUMNS: &str = "id, title, completed, created_at";

/// PostgreSQL implementation over a connection pool.
///
/// Errors pass through as [`StoreError::Store`] unchanged; no retries.
impl TaskStore for PgPool {
    fn ping(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(self).await?;
            Ok(())
        })
    }

    fn insert(&self, task: NewTask) -> BoxFuture<'_, Task> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, Task>(&format!(
                "INSERT INTO tasks (title) VALUES ($1) RETURNING {TASK_COLUMNS}"
            ))
            .bind(task.title)
            .fetch_one(self)
            .await?;
            Ok(row)
        })
    }

    fn list(&self) -> BoxFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, Task>(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at, id"
            ))
            .fetch_all(self)
            .await?;
            Ok(rows)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Option<Task>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, Task>(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(self)
            .await?;
            Ok(row)
        })
    }

    fn update(&self, id: Uuid, patch: TaskPatch) -> BoxFuture<'_, Option<Task>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, Task>(&format!(
                "UPDATE tasks \
                 SET title = COALESCE($2, title), completed = COALESCE($3, completed) \
                 WHERE id = $1 RETURNING {TASK_COLUMNS}"
            ))
            .bind(id)
            .bind(patch.title)
            .bind(patch.completed)
            .fetch_optional(self)
            .await?;
            Ok(row)
        })
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
                .bind(id)
                .execute(self)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

/// In-memory task store for tests and standalone mode.
///
/// Clones share state (see module docs for the replica semantics).
/// Failure injection:
/// - [`set_failing`](Self::set_failing) makes every operation fail, as if
///   the store process went down;
/// - [`fail_first_pings`](Self::fail_first_pings) rejects the next `n`
///   pings, modelling a store that is still starting up;
/// - [`fail_migration`](Self::fail_migration) makes one migration version
///   fail to apply.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    rows: Arc<RwLock<Vec<Task>>>,
    applied: Arc<RwLock<Vec<i64>>>,
    failing: Arc<AtomicBool>,
    failing_pings: Arc<AtomicU32>,
    pings: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
    fail_migration: Arc<AtomicI64>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (store down).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reject the next `n` pings before becoming reachable.
    pub fn fail_first_pings(&self, n: u32) {
        self.failing_pings.store(n, Ordering::SeqCst);
    }

    /// Make migration `version` fail when applied.
    pub fn fail_migration(&self, version: i64) {
        self.fail_migration.store(version, Ordering::SeqCst);
    }

    /// Total pings received (successful or not).
    pub fn ping_count(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Total read operations (`list` / `get`) served by this store.
    ///
    /// Distinct stores count independently; clones share the counter
    /// along with the rest of the state.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Snapshot of the migration ledger, ascending.
    pub async fn applied_migrations(&self) -> Vec<i64> {
        self.applied.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TaskStore for MemoryTaskStore {
    fn ping(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pings.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_pings.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_pings.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("connection refused".to_string()));
            }
            self.check_available()
        })
    }

    fn insert(&self, task: NewTask) -> BoxFuture<'_, Task> {
        Box::pin(async move {
            self.check_available()?;
            let task = Task {
                id: Uuid::new_v4(),
                title: task.title,
                completed: false,
                created_at: Utc::now(),
            };
            self.rows.write().await.push(task.clone());
            Ok(task)
        })
    }

    fn list(&self) -> BoxFuture<'_, Vec<Task>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            Ok(self.rows.read().await.clone())
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Option<Task>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            Ok(self.rows.read().await.iter().find(|t| t.id == id).cloned())
        })
    }

    fn update(&self, id: Uuid, patch: TaskPatch) -> BoxFuture<'_, Option<Task>> {
        Box::pin(async move {
            self.check_available()?;
            let mut rows = self.rows.write().await;
            let Some(task) = rows.iter_mut().find(|t| t.id == id) else {
                return Ok(None);
            };
            if let Some(title) = patch.title {
                task.title = title;
            }
            if let Some(completed) = patch.completed {
                task.completed = completed;
            }
            Ok(Some(task.clone()))
        })
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.check_available()?;
            let mut rows = self.rows.write().await;
            let before = rows.len();
            rows.retain(|t| t.id != id);
            Ok(rows.len() < before)
        })
    }
}

impl MigrationLedger for MemoryTaskStore {
    fn ensure_ledger(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }

    fn applied_versions(&self) -> BoxFuture<'_, Vec<i64>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.applied.read().await.clone())
        })
    }

    fn apply(&self, migration: Migration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.check_available()?;
            if self.fail_migration.load(Ordering::SeqCst) == migration.version {
                return Err(StoreError::Backend(format!(
                    "cannot apply: {}",
                    migration.sql
                )));
            }
            self.applied.write().await.push(migration.version);
            Ok(())
        })
    }
}

/// The data-access facade the request layer calls.
///
/// Wraps a [`ReplicaRouter`] and exposes exactly the four routing shapes:
/// writes to the primary, distributed reads, named-replica reads, and
/// read-your-write reads from the primary. The request layer must not
/// reach into individual store handles.
pub struct TaskService<S> {
    router: ReplicaRouter<S>,
}

impl<S: TaskStore> TaskService<S> {
    pub fn new(router: ReplicaRouter<S>) -> Self {
        Self { router }
    }

    /// Number of configured read replicas.
    pub fn replica_count(&self) -> usize {
        self.router.replica_count()
    }

    /// Create a task. Routes to the primary.
    pub async fn create(&self, task: NewTask) -> Result<Task> {
        self.router.write(move |s| s.insert(task)).await
    }

    /// List all tasks from a replica chosen by the distribution policy.
    ///
    /// The result reflects some replica's current state; it may lag the
    /// most recent write.
    pub async fn list(&self) -> Result<Vec<Task>> {
        self.router.read(|s| s.list()).await
    }

    /// Fetch one task from a replica chosen by the distribution policy.
    pub async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        self.router.read(move |s| s.get(id)).await
    }

    /// List all tasks from one named replica, bypassing distribution.
    ///
    /// Fails with [`StoreError::InvalidReplica`] if `replica` is out of
    /// range. Useful for exposing per-replica lag to operators.
    pub async fn list_from(&self, replica: usize) -> Result<Vec<Task>> {
        self.router.read_from(replica, |s| s.list()).await
    }

    /// List all tasks from the primary, for read-your-write callers.
    pub async fn list_from_primary(&self) -> Result<Vec<Task>> {
        self.router.read_from_primary(|s| s.list()).await
    }

    /// Apply a partial update. Routes to the primary.
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Option<Task>> {
        self.router.write(move |s| s.update(id, patch)).await
    }

    /// Delete a task. Routes to the primary.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.router.write(move |s| s.delete(id)).await
    }
}
