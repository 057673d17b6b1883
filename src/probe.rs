//! Readiness probing for the primary store.
//!
//! Database containers frequently start after or concurrently with the
//! application process. Rather than requiring a hard dependency ordering,
//! the prober polls the store with a minimal no-op query under a fixed
//! attempt budget, sleeping between attempts.
//!
//! The inter-attempt delay is a pure function of the attempt number
//! ([`ProbeConfig::delay_for_attempt`]), so the schedule is unit-testable
//! without real time passing. The default schedule is the fixed
//! 30 x 2000ms budget; the factor/cap fields allow an exponential ramp
//! where an operator wants one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::metrics;
use crate::tasks::TaskStore;

/// Configuration for the readiness probe loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Total attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts, as a humantime string (e.g. "2s").
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Multiplier applied per attempt. 1.0 keeps the interval fixed.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for the per-attempt delay, as a humantime string.
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval() -> String {
    "2s".to_string()
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_delay() -> String {
    "30s".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: "2s".to_string(),
            backoff_factor: 1.0,
            max_delay: "30s".to_string(),
        }
    }
}

impl ProbeConfig {
    /// Fast-fail probe for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            interval: "10ms".to_string(),
            backoff_factor: 1.0,
            max_delay: "100ms".to_string(),
        }
    }

    /// Parse the base interval, falling back to 2 seconds on bad input.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(2))
    }

    /// Parse the delay cap, falling back to 30 seconds on bad input.
    pub fn max_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.max_delay).unwrap_or(Duration::from_secs(30))
    }

    /// Delay to sleep after failed attempt `attempt` (1-indexed).
    ///
    /// Pure: `interval * backoff_factor^(attempt - 1)`, capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.interval_duration();
        if attempt <= 1 {
            return base.min(self.max_delay_duration());
        }
        let cap = self.max_delay_duration();
        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        // Cap in f64 space: base * multiplier overflows Duration long
        // before the cap would kick in (e.g. factor 10 at attempt 25).
        let secs = (base.as_secs_f64() * multiplier).min(cap.as_secs_f64());
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(cap),
            Err(_) => cap,
        }
    }
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Poll `store` until it answers a no-op query or the budget runs out.
///
/// Returns immediately on the first successful attempt. Every attempt is
/// logged with its index so operators can diagnose slow-starting
/// infrastructure. After `max_attempts` failures, fails with
/// [`StoreError::ReadinessTimeout`]; higher layers must treat that as
/// fatal rather than retrying the whole loop.
pub async fn wait_until_ready<S>(store: &S, config: &ProbeConfig) -> Result<ProbeReport>
where
    S: TaskStore + ?Sized,
{
    for attempt in 1..=config.max_attempts {
        match store.ping().await {
            Ok(()) => {
                metrics::record_probe_attempt(true);
                info!(attempt, "store is ready");
                return Ok(ProbeReport { attempts: attempt });
            }
            Err(e) => {
                metrics::record_probe_attempt(false);
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "store not ready"
                );
                if attempt < config.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(StoreError::ReadinessTimeout {
        attempts: config.max_attempts,
    })
}
