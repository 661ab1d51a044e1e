pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod server;
pub mod tracker;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub async fn run(config: ServerConfig) -> AppResult<()> {
    init_tracing(config.log_dir.as_deref())?;
    tracing::info!(
        database = %config.database_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "starting challenge tracker"
    );
    server::run_server(&config).await
}

pub fn init_tracing(log_dir: Option<&Path>) -> AppResult<()> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "challenge-tracker.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| AppError::Internal(error.to_string()))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string())),
    }
}
