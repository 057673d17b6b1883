// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.

//! The startup gate: readiness probe, then migrations, then ready.
//!
//! Runs exactly once per process, before the router is exposed to any
//! caller. The guarantee it provides: every operation observed after the
//! gate returns sees a primary whose schema matches the embedded
//! migration set's target state.
//!
//! Any failure here is fatal. There is no partial-service mode; the
//! binary maps a gate error to a non-zero exit.
//!
//! The gate uses its own single-connection pool, acquired at the start
//! and released on every exit path, independent of the long-lived pools
//! the router uses afterwards.

use tracing::{error, info};

use crate::config::Config;
use crate::connection::ConnectionSet;
use crate::error::Result;
use crate::migrate::{apply_pending, MigrationLedger, MigrationReport, MigrationSource};
use crate::probe::{wait_until_ready, ProbeConfig, ProbeReport};
use crate::tasks::TaskStore;

/// What the gate did before signalling ready.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub probe: ProbeReport,
    pub migrations: MigrationReport,
}

/// Probe `store` until ready, then apply pending migrations from `source`.
///
/// This is the gate's whole logic, generic over the backend so it can run
/// against test stores. Resource scoping is the caller's job; [`run`]
/// handles it for the PostgreSQL path.
pub async fn run_with<S>(
    store: &S,
    source: &MigrationSource,
    probe: &ProbeConfig,
) -> Result<StartupReport>
where
    S: TaskStore + MigrationLedger + ?Sized,
{
    let probe_report = wait_until_ready(store, probe).await?;
    let migrations = apply_pending(store, source).await?;
    info!(
        probe_attempts = probe_report.attempts,
        migrations_applied = migrations.applied.len(),
        "startup gate passed, ready to serve"
    );
    Ok(StartupReport {
        probe: probe_report,
        migrations,
    })
}

/// Run the gate against the configured primary with the embedded
/// migration set.
///
/// The migration-scoped pool is closed whether the gate passes or fails.
pub async fn run(config: &Config) -> Result<StartupReport> {
    let pool = ConnectionSet::migration_pool(config);
    let result = run_with(&pool, &MigrationSource::embedded(), &config.probe).await;
    pool.close().await;

    if let Err(e) = &result {
        error!(error = %e, "startup gate failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::migrate::Migration;
    use crate::tasks::MemoryTaskStore;

    fn source() -> MigrationSource {
        MigrationSource::new(vec![
            Migration {
                version: 1,
                name: "one",
                sql: "CREATE TABLE a ()",
            },
            Migration {
                version: 2,
                name: "two",
                sql: "CREATE TABLE b ()",
            },
        ])
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_probes_then_migrates() {
        let store = MemoryTaskStore::new();
        store.fail_first_pings(2);

        let report = run_with(&store, &source(), &ProbeConfig::default())
            .await
            .unwrap();
        assert_eq!(report.probe.attempts, 3);
        assert_eq!(report.migrations.applied, vec![1, 2]);
        assert_eq!(store.applied_migrations().await, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_fatal_on_unreachable_store() {
        let store = MemoryTaskStore::new();
        store.set_failing(true);

        let err = run_with(&store, &source(), &ProbeConfig::testing())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadinessTimeout { attempts: 3 }));
        assert!(err.is_startup_fatal());
        // Migrations were never attempted
        assert!(store.applied_migrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_gate_fatal_on_migration_failure() {
        let store = MemoryTaskStore::new();
        store.fail_migration(2);

        let err = run_with(&store, &source(), &ProbeConfig::testing())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Migration { version: 2, .. }));
        assert!(err.is_startup_fatal());
    }

    #[tokio::test]
    async fn test_gate_idempotent_across_restarts() {
        let store = MemoryTaskStore::new();
        let probe = ProbeConfig::testing();

        run_with(&store, &source(), &probe).await.unwrap();
        let second = run_with(&store, &source(), &probe).await.unwrap();
        assert!(second.migrations.applied.is_empty());
        assert_eq!(second.migrations.skipped, 2);
    }
}
