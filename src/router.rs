//! Replica-aware routing over store handles.
//!
//! [`ReplicaRouter`] wraps one primary handle and an ordered pool of
//! replica handles. Writes go to the primary unconditionally; reads are
//! distributed round-robin over the replicas; callers can also target one
//! named replica or the primary directly.
//!
//! # Routing, not retrying
//!
//! The router selects a handle and runs the caller's operation against it.
//! It never retries a failed operation on another store: a silently
//! retried write could apply twice, and a silently retried read would hide
//! a replica outage the caller may want to know about.
//!
//! # Distribution policy
//!
//! Strict round-robin over the replica pool, driven by a lock-free atomic
//! cursor. With N replicas and k reads, each replica serves either
//! `k / N` or `k / N + 1` of them. When no replicas are configured, reads
//! fall back to the primary so a single-node setup still serves traffic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::{BoxFuture, Result, StoreError};
use crate::metrics;

/// Routes operations to a primary handle and a pool of replica handles.
///
/// Owns no state beyond the handles and the round-robin cursor; handles
/// are typically cheap clones of pooled connections, shared with any
/// direct-access callers.
pub struct ReplicaRouter<S> {
    primary: S,
    replicas: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> ReplicaRouter<S> {
    /// Build a router from a primary handle and an ordered replica pool.
    ///
    /// Replica order is identity: index 0 is "replica 1" to operators.
    pub fn new(primary: S, replicas: Vec<S>) -> Self {
        Self {
            primary,
            replicas,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of configured replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Pick the next replica index, advancing the round-robin cursor.
    ///
    /// Safe for concurrent callers; `fetch_add` wraps on overflow, which
    /// at one read per nanosecond takes centuries to matter.
    fn next_replica(&self) -> Option<usize> {
        if self.replicas.is_empty() {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % self.replicas.len())
    }

    /// Run a write operation against the primary.
    ///
    /// The primary reflects the write upon successful return. Failures
    /// surface the underlying store error unchanged.
    pub async fn write<'a, T, F>(&'a self, op: F) -> Result<T>
    where
        F: FnOnce(&'a S) -> BoxFuture<'a, T>,
    {
        metrics::record_write();
        let started = Instant::now();
        let result = op(&self.primary).await;
        metrics::record_op_latency("write", started.elapsed());
        result
    }

    /// Run a read operation against a replica chosen by the distribution
    /// policy (or the primary when no replicas are configured).
    ///
    /// The result reflects that replica's current state, which may lag
    /// the primary by an unspecified interval.
    pub async fn read<'a, T, F>(&'a self, op: F) -> Result<T>
    where
        F: FnOnce(&'a S) -> BoxFuture<'a, T>,
    {
        let started = Instant::now();
        let result = match self.next_replica() {
            Some(index) => {
                metrics::record_routed_read(&format!("replica-{index}"));
                op(&self.replicas[index]).await
            }
            None => {
                metrics::record_routed_read("primary");
                op(&self.primary).await
            }
        };
        metrics::record_op_latency("read", started.elapsed());
        result
    }

    /// Run a read operation against one named replica, bypassing
    /// distribution.
    ///
    /// Fails with [`StoreError::InvalidReplica`] before contacting any
    /// store if `index` is out of range.
    pub async fn read_from<'a, T, F>(&'a self, index: usize, op: F) -> Result<T>
    where
        F: FnOnce(&'a S) -> BoxFuture<'a, T>,
    {
        let replica = self.replicas.get(index).ok_or(StoreError::InvalidReplica {
            index,
            replicas: self.replicas.len(),
        })?;
        metrics::record_routed_read(&format!("replica-{index}"));
        op(replica).await
    }

    /// Run a read operation against the primary, for callers needing
    /// read-your-write consistency immediately after a write.
    pub async fn read_from_primary<'a, T, F>(&'a self, op: F) -> Result<T>
    where
        F: FnOnce(&'a S) -> BoxFuture<'a, T>,
    {
        metrics::record_routed_read("primary");
        op(&self.primary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{MemoryTaskStore, NewTask, TaskStore};

    fn router_with_replicas(n: usize) -> ReplicaRouter<MemoryTaskStore> {
        let replicas = (0..n).map(|_| MemoryTaskStore::new()).collect();
        ReplicaRouter::new(MemoryTaskStore::new(), replicas)
    }

    #[tokio::test]
    async fn test_write_targets_primary() {
        let router = router_with_replicas(2);

        router
            .write(|s| s.insert(NewTask::new("a")))
            .await
            .unwrap();

        let primary_rows = router
            .read_from_primary(|s| s.list())
            .await
            .unwrap();
        assert_eq!(primary_rows.len(), 1);

        // Replicas never saw the write
        assert!(router.read_from(0, |s| s.list()).await.unwrap().is_empty());
        assert!(router.read_from(1, |s| s.list()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_round_robins() {
        let router = router_with_replicas(2);

        for _ in 0..10 {
            router.read(|s| s.list()).await.unwrap();
        }

        assert_eq!(router.replicas[0].read_count(), 5);
        assert_eq!(router.replicas[1].read_count(), 5);
        assert_eq!(router.primary.read_count(), 0);
    }

    #[tokio::test]
    async fn test_read_single_replica() {
        let router = router_with_replicas(1);

        for _ in 0..4 {
            router.read(|s| s.list()).await.unwrap();
        }
        assert_eq!(router.replicas[0].read_count(), 4);
    }

    #[tokio::test]
    async fn test_read_falls_back_to_primary_without_replicas() {
        let router = router_with_replicas(0);

        router.read(|s| s.list()).await.unwrap();
        assert_eq!(router.primary.read_count(), 1);
    }

    #[tokio::test]
    async fn test_read_from_out_of_range() {
        let router = router_with_replicas(2);

        let err = router.read_from(2, |s| s.list()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidReplica {
                index: 2,
                replicas: 2
            }
        ));

        // No store was contacted
        assert_eq!(router.replicas[0].read_count(), 0);
        assert_eq!(router.replicas[1].read_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_retried_elsewhere() {
        let router = router_with_replicas(2);
        router.replicas[0].set_failing(true);

        // First read lands on replica 0 and fails; replica 1 stays cold.
        let err = router.read(|s| s.list()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(router.replicas[1].read_count(), 0);
        assert_eq!(router.primary.read_count(), 0);

        // The next read moves on per round-robin, not as a retry.
        assert!(router.read(|s| s.list()).await.is_ok());
        assert_eq!(router.replicas[1].read_count(), 1);
    }

    #[tokio::test]
    async fn test_replica_count() {
        assert_eq!(router_with_replicas(0).replica_count(), 0);
        assert_eq!(router_with_replicas(3).replica_count(), 3);
    }
}
