//! Application configuration
//!
//! Environment-variable surface with defaults, loaded once at startup.
//! `.env` files are honored via dotenvy before this runs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use super::constants::{
    DEFAULT_APP_ENV, DEFAULT_DB_DRIVER, DEFAULT_DB_DSN, DEFAULT_DLQ_PATH,
    DEFAULT_DLQ_REPLAY_INTERVAL, DEFAULT_GRPC_PORT, DEFAULT_HTTP_PORT, DEFAULT_LOG_LEVEL,
    ENV_APP_ENV, ENV_DB_DRIVER, ENV_DB_DSN, ENV_DLQ_PATH, ENV_DLQ_REPLAY_INTERVAL, ENV_GRPC_PORT,
    ENV_HTTP_PORT, ENV_INGEST_ALLOWED_SERVICES, ENV_INGEST_EXCLUDED_SERVICES,
    ENV_INGEST_MIN_SEVERITY, ENV_LOG_LEVEL,
};
use crate::data::records::Severity;
use crate::ingest::filter::FilterConfig;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub driver: String,
    pub dsn: String,
}

/// Dead-letter queue configuration
#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub path: PathBuf,
    pub replay_interval: Duration,
}

/// Ingestion filter configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub min_severity: Severity,
    pub allowed_services: HashSet<String>,
    pub excluded_services: HashSet<String>,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub db: DbConfig,
    pub dlq: DlqConfig,
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn load() -> Result<Self> {
        let env = env_or(ENV_APP_ENV, DEFAULT_APP_ENV);
        let log_level = env_or(ENV_LOG_LEVEL, DEFAULT_LOG_LEVEL);

        let http_port = parse_port(ENV_HTTP_PORT, DEFAULT_HTTP_PORT)?;
        let grpc_port = parse_port(ENV_GRPC_PORT, DEFAULT_GRPC_PORT)?;

        let db = DbConfig {
            driver: env_or(ENV_DB_DRIVER, DEFAULT_DB_DRIVER),
            dsn: env_or(ENV_DB_DSN, DEFAULT_DB_DSN),
        };

        let replay_raw = env_or(ENV_DLQ_REPLAY_INTERVAL, DEFAULT_DLQ_REPLAY_INTERVAL);
        let replay_interval = humantime::parse_duration(&replay_raw)
            .with_context(|| format!("invalid {ENV_DLQ_REPLAY_INTERVAL}: {replay_raw:?}"))?;
        let dlq = DlqConfig {
            path: PathBuf::from(env_or(ENV_DLQ_PATH, DEFAULT_DLQ_PATH)),
            replay_interval,
        };

        let ingest = IngestConfig {
            min_severity: Severity::normalize(&env_or(ENV_INGEST_MIN_SEVERITY, "INFO")),
            allowed_services: parse_service_list(&env_or(ENV_INGEST_ALLOWED_SERVICES, "")),
            excluded_services: parse_service_list(&env_or(ENV_INGEST_EXCLUDED_SERVICES, "")),
        };

        let config = Self {
            env,
            log_level,
            http_port,
            grpc_port,
            db,
            dlq,
            ingest,
        };
        config.validate()?;

        tracing::debug!(
            env = %config.env,
            http_port = config.http_port,
            grpc_port = config.grpc_port,
            db_driver = %config.db.driver,
            db_dsn = %config.db.dsn,
            dlq_path = %config.dlq.path.display(),
            dlq_replay_interval_secs = config.dlq.replay_interval.as_secs(),
            min_severity = %config.ingest.min_severity,
            allowed_services = config.ingest.allowed_services.len(),
            excluded_services = config.ingest.excluded_services.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration for consistency and correctness.
    fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("Configuration error: {ENV_HTTP_PORT} must be greater than 0");
        }
        if self.grpc_port == 0 {
            anyhow::bail!("Configuration error: {ENV_GRPC_PORT} must be greater than 0");
        }
        if self.http_port == self.grpc_port {
            anyhow::bail!(
                "Configuration error: {ENV_HTTP_PORT} ({}) and {ENV_GRPC_PORT} ({}) cannot be the same",
                self.http_port,
                self.grpc_port
            );
        }
        if self.db.driver != "sqlite" {
            anyhow::bail!(
                "Configuration error: unsupported {ENV_DB_DRIVER} {:?} (only \"sqlite\" is available)",
                self.db.driver
            );
        }
        Ok(())
    }

    /// Filter configuration for the ingestion filter engine.
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            min_severity: self.ingest.min_severity,
            allowed_services: self.ingest.allowed_services.clone(),
            excluded_services: self.ingest.excluded_services.clone(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_port(key: &str, default: u16) -> Result<u16> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated service list, trimming whitespace and dropping
/// empty entries.
fn parse_service_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
