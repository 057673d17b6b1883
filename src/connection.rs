//! Long-lived store connections.
//!
//! [`ConnectionSet`] holds one pool per configured store: the primary and
//! each replica. It is purely a resource holder constructed once at boot;
//! routing behavior lives in [`ReplicaRouter`](crate::router::ReplicaRouter).
//!
//! Pools are created lazily (no I/O at construction), so a `ConnectionSet`
//! can be built before the stores are reachable; the startup gate is what
//! guarantees readiness before traffic.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::router::ReplicaRouter;

/// Connections per pool. Pool tuning is deliberately not a concern here;
/// this is a sane fixed default.
const POOL_MAX_CONNECTIONS: u32 = 5;

/// One pool per configured store, owned for the process lifetime.
pub struct ConnectionSet {
    primary: PgPool,
    replicas: Vec<PgPool>,
}

impl ConnectionSet {
    /// Build lazily-connected pools for the primary and every replica.
    pub fn connect(config: &Config) -> Self {
        let primary = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect_lazy_with(config.primary_options());

        let replicas = (0..config.replica_hosts.len())
            .filter_map(|index| config.replica_options(index))
            .map(|options| {
                PgPoolOptions::new()
                    .max_connections(POOL_MAX_CONNECTIONS)
                    .connect_lazy_with(options)
            })
            .collect::<Vec<_>>();

        info!(
            primary = %config.primary_host,
            replicas = replicas.len(),
            "connection set created"
        );
        Self { primary, replicas }
    }

    /// A single-connection pool scoped to the startup gate's migration
    /// run, independent of the long-lived pools above. The gate closes it
    /// on every exit path.
    pub fn migration_pool(config: &Config) -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(config.primary_options())
    }

    /// Handle to the authoritative store.
    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Replica handles in identity order.
    pub fn replicas(&self) -> &[PgPool] {
        &self.replicas
    }

    /// Build a router over clones of the held pools. `PgPool` clones share
    /// the underlying pool, so direct-access callers and the router see
    /// the same connections.
    pub fn router(&self) -> ReplicaRouter<PgPool> {
        ReplicaRouter::new(self.primary.clone(), self.replicas.clone())
    }

    /// Close every pool for orderly shutdown.
    pub async fn close(&self) {
        self.primary.close().await;
        for replica in &self.replicas {
            replica.close().await;
        }
        info!("connection set closed");
    }
}
