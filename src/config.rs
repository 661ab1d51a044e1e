use crate::db::DatabaseOptions;
use crate::errors::{AppError, AppResult};
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration. Every flag can also be supplied through its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "challenge-tracker", version, about = "Group challenge tracker backend")]
pub struct ServerConfig {
    #[arg(long, env = "CHALLENGE_TRACKER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "CHALLENGE_TRACKER_PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "CHALLENGE_TRACKER_DB", default_value = "data/challenges.sqlite")]
    pub database_path: PathBuf,

    /// Milliseconds a write waits on a locked store before the request fails as retryable
    #[arg(long, env = "CHALLENGE_TRACKER_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Directory for daily-rolling JSON logs; logs go to stdout when unset
    #[arg(long, env = "CHALLENGE_TRACKER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "CHALLENGE_TRACKER_CORS", default_value_t = true, action = ArgAction::Set)]
    pub enable_cors: bool,

    /// Insert the default catalog when the store has no categories yet
    #[arg(long, env = "CHALLENGE_TRACKER_SEED_CATALOG", default_value_t = true, action = ArgAction::Set)]
    pub seed_catalog: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_path: PathBuf::from("data/challenges.sqlite"),
            busy_timeout_ms: 5_000,
            log_dir: None,
            enable_cors: true,
            seed_catalog: true,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|error| AppError::Validation(format!("invalid listen address {}:{}: {}", self.host, self.port, error)))
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            seed_catalog: self.seed_catalog,
        }
    }
}
