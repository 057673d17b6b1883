//! Configuration for the replica-routed task store.
//!
//! Configuration can be constructed programmatically, deserialized from
//! JSON/YAML, or read from the environment with [`Config::from_env`].
//!
//! # Environment contract
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `DB_HOST_MAIN` | Primary host | required |
//! | `DB_HOST_REPLICA1..N` | Replica hosts, scanned ascending until a gap | none |
//! | `DB_USER` | Shared credentials | `postgres` |
//! | `DB_PASSWORD` | Shared credentials | `example` |
//! | `DB_NAME` | Database name | `appdb` |
//! | `DB_PORT` | Store port (all hosts) | `5432` |
//! | `PORT` | Service listening port | `3000` |
//! | `DB_READY_MAX_ATTEMPTS` | Readiness probe budget | `30` |
//! | `DB_READY_INTERVAL` | Probe interval (humantime, e.g. "2s") | `2s` |
//!
//! Replica order is significant: `DB_HOST_REPLICA1` is replica index 0
//! for direct-access callers, and that identity is stable for the process
//! lifetime.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::error::{Result, StoreError};
use crate::probe::ProbeConfig;

/// Top-level configuration, resolved once at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host of the single authoritative store that accepts writes.
    pub primary_host: String,

    /// Replica hosts in identity order (index 0 = "replica 1").
    #[serde(default)]
    pub replica_hosts: Vec<String>,

    /// Credentials shared by primary and replicas.
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,

    /// Port every store listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port the surrounding service listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Readiness probe settings used by the startup gate.
    #[serde(default)]
    pub probe: ProbeConfig,
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_password() -> String {
    "example".to_string()
}

fn default_database() -> String {
    "appdb".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_listen_port() -> u16 {
    3000
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// `DB_HOST_MAIN` is required; replica hosts are scanned from
    /// `DB_HOST_REPLICA1` upward until the first missing variable, so the
    /// numbering defines replica identity.
    pub fn from_env() -> Result<Self> {
        let primary_host = std::env::var("DB_HOST_MAIN")
            .map_err(|_| StoreError::Config("DB_HOST_MAIN not set".to_string()))?;

        let mut replica_hosts = Vec::new();
        for n in 1.. {
            match std::env::var(format!("DB_HOST_REPLICA{n}")) {
                Ok(host) => replica_hosts.push(host),
                Err(_) => break,
            }
        }

        let mut probe = ProbeConfig::default();
        if let Ok(raw) = std::env::var("DB_READY_MAX_ATTEMPTS") {
            probe.max_attempts = raw.parse().map_err(|_| {
                StoreError::Config(format!("DB_READY_MAX_ATTEMPTS is not a number: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var("DB_READY_INTERVAL") {
            humantime::parse_duration(&raw).map_err(|e| {
                StoreError::Config(format!("DB_READY_INTERVAL invalid: {e}"))
            })?;
            probe.interval = raw;
        }

        Ok(Self {
            primary_host,
            replica_hosts,
            user: env_or("DB_USER", default_user),
            password: env_or("DB_PASSWORD", default_password),
            database: env_or("DB_NAME", default_database),
            port: parse_env_or("DB_PORT", default_port)?,
            listen_port: parse_env_or("PORT", default_listen_port)?,
            probe,
        })
    }

    /// Minimal config for tests: localhost primary, two replicas, fast probe.
    pub fn for_testing() -> Self {
        Self {
            primary_host: "localhost".to_string(),
            replica_hosts: vec!["replica1".to_string(), "replica2".to_string()],
            user: default_user(),
            password: default_password(),
            database: default_database(),
            port: default_port(),
            listen_port: default_listen_port(),
            probe: ProbeConfig::testing(),
        }
    }

    /// Connect options for the primary store.
    pub fn primary_options(&self) -> PgConnectOptions {
        self.options_for_host(&self.primary_host)
    }

    /// Connect options for one replica, `None` if out of range.
    pub fn replica_options(&self, index: usize) -> Option<PgConnectOptions> {
        self.replica_hosts
            .get(index)
            .map(|host| self.options_for_host(host))
    }

    fn options_for_host(&self, host: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

fn env_or(key: &str, default: fn() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn parse_env_or(key: &str, default: fn() -> u16) -> Result<u16> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| StoreError::Config(format!("{key} is not a valid port: {raw}"))),
        Err(_) => Ok(default()),
    }
}
