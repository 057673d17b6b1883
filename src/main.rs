//! Demo process wiring for the replica-routed task store.
//!
//! Loads configuration from the environment, runs the startup gate, then
//! holds the connection set open until ctrl-c. The HTTP layer is an
//! external collaborator; this binary only demonstrates the boot
//! sequence and the exit-code contract (0 on orderly shutdown, non-zero
//! on a fatal startup failure).

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use replistore::{Config, ConnectionSet, TaskService};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = replistore::startup::run(&config).await {
        error!(error = %e, "startup failed, refusing to serve");
        std::process::exit(1);
    }

    let connections = ConnectionSet::connect(&config);
    let tasks = TaskService::<sqlx::PgPool>::new(connections.router());
    info!(
        listen_port = config.listen_port,
        replicas = tasks.replica_count(),
        "task store ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    connections.close().await;
}
