// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.

//! Schema migrations for the primary store.
//!
//! A migration is an ordered, idempotently-applicable schema-change unit.
//! The set of applied versions lives in the store itself (the
//! `_migrations` ledger table), so applying the same source twice is a
//! no-op: the second run finds every version already recorded.
//!
//! # Atomicity
//!
//! The PostgreSQL implementation applies each migration and records its
//! ledger row inside one transaction. A migration either fully applies
//! and is recorded, or neither happens; a crash mid-migration leaves the
//! ledger consistent with the schema.
//!
//! # Fail-stop
//!
//! [`apply_pending`] stops at the first failure. Earlier migrations stay
//! recorded as applied, later ones are not attempted, and the error names
//! the failing version.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::{BoxFuture, Result, StoreError};
use crate::metrics;

/// One versioned schema-change unit.
///
/// Versions are assigned by hand in ascending order; `name` is for
/// operators and error messages, `sql` may contain multiple statements.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// An ordered, versioned sequence of migrations.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    migrations: Vec<Migration>,
}

impl MigrationSource {
    /// Build a source from an ordered migration list.
    ///
    /// Versions must be strictly ascending; anything else is a
    /// configuration error, caught before any store is touched.
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        for pair in migrations.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(StoreError::Config(format!(
                    "migration versions must be strictly ascending: {} then {}",
                    pair[0].version, pair[1].version
                )));
            }
        }
        Ok(Self { migrations })
    }

    /// The migration set shipped with this crate, embedded at build time.
    pub fn embedded() -> Self {
        // Known-good ordering, validated by tests
        Self {
            migrations: vec![Migration {
                version: 1,
                name: "create_tasks",
                sql: include_str!("../migrations/0001_create_tasks.sql"),
            }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Trait defining what the applier needs from a store's migration ledger.
///
/// The PostgreSQL pool implements this for production;
/// [`MemoryTaskStore`](crate::tasks::MemoryTaskStore) implements it for
/// tests. `apply` must be atomic: the schema change and its ledger row
/// land together or not at all.
pub trait MigrationLedger: Send + Sync {
    /// Create the ledger table if it does not exist.
    fn ensure_ledger(&self) -> BoxFuture<'_, ()>;

    /// Versions already recorded as applied, ascending.
    fn applied_versions(&self) -> BoxFuture<'_, Vec<i64>>;

    /// Apply one migration and record it, atomically.
    fn apply(&self, migration: Migration) -> BoxFuture<'_, ()>;
}

impl MigrationLedger for PgPool {
    fn ensure_ledger(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS _migrations (
                    version BIGINT PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
            )
            .execute(self)
            .await?;
            Ok(())
        })
    }

    fn applied_versions(&self) -> BoxFuture<'_, Vec<i64>> {
        Box::pin(async move {
            let versions =
                sqlx::query_scalar::<_, i64>("SELECT version FROM _migrations ORDER BY version")
                    .fetch_all(self)
                    .await?;
            Ok(versions)
        })
    }

    fn apply(&self, migration: Migration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // The simple-query protocol runs the whole batch on one
            // connection, so BEGIN/COMMIT bracket the schema change and
            // its ledger row as a single transaction.
            sqlx::raw_sql(&transaction_batch(&migration))
                .execute(self)
                .await?;
            Ok(())
        })
    }
}

/// Wrap a migration's SQL and its ledger row in one BEGIN/COMMIT batch.
///
/// `version` and `name` come from compile-time migration definitions, not
/// user input; the name is still quote-escaped so a literal apostrophe
/// cannot break the statement.
fn transaction_batch(migration: &Migration) -> String {
    format!(
        "BEGIN;\n{};\nINSERT INTO _migrations (version, name) VALUES ({}, '{}');\nCOMMIT;",
        migration.sql.trim_end().trim_end_matches(';'),
        migration.version,
        migration.name.replace('\'', "''"),
    )
}

/// Outcome of an applier run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Versions applied during this run, in order.
    pub applied: Vec<i64>,
    /// Migrations skipped because the ledger already had them.
    pub skipped: usize,
}

/// Apply every migration in `source` not yet recorded on `store`.
///
/// Idempotent: running this against an up-to-date store applies nothing
/// and returns success. Stops at the first failure, wrapping the cause in
/// [`StoreError::Migration`] with the failing version.
pub async fn apply_pending<L>(store: &L, source: &MigrationSource) -> Result<MigrationReport>
where
    L: MigrationLedger + ?Sized,
{
    store.ensure_ledger().await?;
    let applied_before = store.applied_versions().await?;

    let mut report = MigrationReport::default();
    for migration in source.iter() {
        if applied_before.contains(&migration.version) {
            debug!(version = migration.version, name = migration.name, "migration already applied");
            report.skipped += 1;
            continue;
        }

        info!(version = migration.version, name = migration.name, "applying migration");
        store
            .apply(*migration)
            .await
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                name: migration.name.to_string(),
                source: Box::new(e),
            })?;
        metrics::record_migration_applied(migration.version);
        report.applied.push(migration.version);
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped,
        "migrations up to date"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::MemoryTaskStore;

    fn migration(version: i64, name: &'static str) -> Migration {
        Migration {
            version,
            name,
            sql: "CREATE TABLE t ()",
        }
    }

    fn three_migrations() -> MigrationSource {
        MigrationSource::new(vec![
            migration(1, "one"),
            migration(2, "two"),
            migration(3, "three"),
        ])
        .unwrap()
    }

    #[test]
    fn test_source_rejects_unsorted_versions() {
        let err = MigrationSource::new(vec![migration(2, "two"), migration(1, "one")]).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_source_rejects_duplicate_versions() {
        let err = MigrationSource::new(vec![migration(1, "a"), migration(1, "b")]).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_embedded_source_is_valid() {
        let source = MigrationSource::embedded();
        assert!(!source.is_empty());
        // The embedded set must satisfy the same ordering rule
        let revalidated = MigrationSource::new(source.iter().copied().collect());
        assert!(revalidated.is_ok());
        assert!(source.iter().next().unwrap().sql.contains("tasks"));
    }

    #[test]
    fn test_transaction_batch_wraps_sql_and_ledger_row() {
        let batch = transaction_batch(&Migration {
            version: 7,
            name: "add_index",
            sql: "CREATE INDEX idx ON t (c);\n",
        });

        assert!(batch.starts_with("BEGIN;"));
        assert!(batch.trim_end().ends_with("COMMIT;"));
        assert!(batch.contains("CREATE INDEX idx ON t (c)"));
        assert!(batch.contains("INSERT INTO _migrations (version, name) VALUES (7, 'add_index');"));
        // No doubled terminator between the migration and the ledger row
        assert!(!batch.contains(";;"));
    }

    #[test]
    fn test_transaction_batch_escapes_quotes_in_name() {
        let batch = transaction_batch(&Migration {
            version: 1,
            name: "it's",
            sql: "CREATE TABLE t ()",
        });
        assert!(batch.contains("VALUES (1, 'it''s')"));
    }

    #[tokio::test]
    async fn test_apply_all_pending() {
        let store = MemoryTaskStore::new();
        let report = apply_pending(&store, &three_migrations()).await.unwrap();

        assert_eq!(report.applied, vec![1, 2, 3]);
        assert_eq!(report.skipped, 0);
        assert_eq!(store.applied_migrations().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = MemoryTaskStore::new();
        let source = three_migrations();

        apply_pending(&store, &source).await.unwrap();
        let ledger_after_first = store.applied_migrations().await;

        let report = apply_pending(&store, &source).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, 3);
        assert_eq!(store.applied_migrations().await, ledger_after_first);
    }

    #[tokio::test]
    async fn test_fail_stop_names_the_failing_version() {
        let store = MemoryTaskStore::new();
        store.fail_migration(2);

        let err = apply_pending(&store, &three_migrations()).await.unwrap_err();
        match err {
            StoreError::Migration { version, name, .. } => {
                assert_eq!(version, 2);
                assert_eq!(name, "two");
            }
            other => panic!("unexpected error: {other}"),
        }

        // 1 applied, 2 and 3 not
        assert_eq!(store.applied_migrations().await, vec![1]);
    }

    #[tokio::test]
    async fn test_resume_after_failure() {
        let store = MemoryTaskStore::new();
        let source = three_migrations();

        store.fail_migration(2);
        apply_pending(&store, &source).await.unwrap_err();

        // Operator fixes the issue; the next run picks up where it stopped
        store.fail_migration(0);
        let report = apply_pending(&store, &source).await.unwrap();
        assert_eq!(report.applied, vec![2, 3]);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.applied_migrations().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let store = MemoryTaskStore::new();
        let source = MigrationSource::new(Vec::new()).unwrap();

        let report = apply_pending(&store, &source).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, 0);
    }
}
