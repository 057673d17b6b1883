//! Metrics for observability.
//!
//! Prometheus-compatible counters and histograms, prefixed `taskstore_`:
//! counters end in `_total`, histograms track durations. Routed reads are
//! labelled by target so operators can see the read distribution and any
//! skew toward `read_from_primary` (a hint that callers distrust replica
//! lag).

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one readiness probe attempt.
pub fn record_probe_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("taskstore_probe_attempts_total", "status" => status).increment(1);
}

/// Record a migration applied during the startup gate.
pub fn record_migration_applied(version: i64) {
    counter!("taskstore_migrations_applied_total", "version" => version.to_string()).increment(1);
}

/// Record a read routed to `target` ("primary" or "replica-N").
pub fn record_routed_read(target: &str) {
    counter!("taskstore_reads_total", "target" => target.to_string()).increment(1);
}

/// Record a write routed to the primary.
pub fn record_write() {
    counter!("taskstore_writes_total").increment(1);
}

/// Record end-to-end latency of one store operation.
pub fn record_op_latency(operation: &str, duration: Duration) {
    histogram!("taskstore_op_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}
