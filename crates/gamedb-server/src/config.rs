//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/gamedb";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Import Pipeline Constants
// ============================================================================

/// Delay between enqueueing an import job and its first delivery.
pub const DEFAULT_IMPORT_TASK_DELAY_MS: u64 = 1_000;

pub const DEFAULT_IMPORT_WORKERS: usize = 4;

/// A single job run is abandoned (and redelivered) after this long.
pub const DEFAULT_IMPORT_JOB_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_IMPORT_MAX_ATTEMPTS: i32 = 5;

/// Base delay for exponential retry backoff.
pub const DEFAULT_IMPORT_RETRY_BASE_MS: u64 = 2_000;

/// How long an idle worker waits before polling the queue again.
pub const DEFAULT_IMPORT_POLL_INTERVAL_MS: u64 = 500;

/// Largest accepted upload body (64 MiB).
pub const DEFAULT_IMPORT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Largest accepted single archive entry once decompressed (32 MiB).
pub const DEFAULT_IMPORT_MAX_ENTRY_BYTES: u64 = 32 * 1024 * 1024;

/// Staged payloads older than this with no active job are deleted.
pub const DEFAULT_IMPORT_ORPHAN_TTL_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_IMPORT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub admin: AdminConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Bearer tokens that identify administrators
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    pub tokens: Vec<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("tokens", &format_args!("[{} redacted]", self.tokens.len()))
            .finish()
    }
}

/// Bulk import pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub task_delay_ms: u64,
    pub workers: usize,
    pub job_timeout_secs: u64,
    pub max_attempts: i32,
    pub retry_base_ms: u64,
    pub poll_interval_ms: u64,
    pub max_upload_bytes: usize,
    pub max_entry_bytes: u64,
    pub orphan_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl ImportConfig {
    pub fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            task_delay_ms: DEFAULT_IMPORT_TASK_DELAY_MS,
            workers: DEFAULT_IMPORT_WORKERS,
            job_timeout_secs: DEFAULT_IMPORT_JOB_TIMEOUT_SECS,
            max_attempts: DEFAULT_IMPORT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_IMPORT_RETRY_BASE_MS,
            poll_interval_ms: DEFAULT_IMPORT_POLL_INTERVAL_MS,
            max_upload_bytes: DEFAULT_IMPORT_MAX_UPLOAD_BYTES,
            max_entry_bytes: DEFAULT_IMPORT_MAX_ENTRY_BYTES,
            orphan_ttl_secs: DEFAULT_IMPORT_ORPHAN_TTL_SECS,
            sweep_interval_secs: DEFAULT_IMPORT_SWEEP_INTERVAL_SECS,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("GAMEDB_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("GAMEDB_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "GAMEDB_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: env_list("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|| vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()]),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            admin: AdminConfig {
                tokens: env_list("GAMEDB_ADMIN_TOKENS").unwrap_or_default(),
            },
            import: ImportConfig {
                task_delay_ms: env_or("IMPORT_TASK_DELAY_MS", DEFAULT_IMPORT_TASK_DELAY_MS),
                workers: env_or("IMPORT_WORKERS", DEFAULT_IMPORT_WORKERS),
                job_timeout_secs: env_or(
                    "IMPORT_JOB_TIMEOUT_SECS",
                    DEFAULT_IMPORT_JOB_TIMEOUT_SECS,
                ),
                max_attempts: env_or("IMPORT_MAX_ATTEMPTS", DEFAULT_IMPORT_MAX_ATTEMPTS),
                retry_base_ms: env_or("IMPORT_RETRY_BASE_MS", DEFAULT_IMPORT_RETRY_BASE_MS),
                poll_interval_ms: env_or(
                    "IMPORT_POLL_INTERVAL_MS",
                    DEFAULT_IMPORT_POLL_INTERVAL_MS,
                ),
                max_upload_bytes: env_or(
                    "IMPORT_MAX_UPLOAD_BYTES",
                    DEFAULT_IMPORT_MAX_UPLOAD_BYTES,
                ),
                max_entry_bytes: env_or("IMPORT_MAX_ENTRY_BYTES", DEFAULT_IMPORT_MAX_ENTRY_BYTES),
                orphan_ttl_secs: env_or("IMPORT_ORPHAN_TTL_SECS", DEFAULT_IMPORT_ORPHAN_TTL_SECS),
                sweep_interval_secs: env_or(
                    "IMPORT_SWEEP_INTERVAL_SECS",
                    DEFAULT_IMPORT_SWEEP_INTERVAL_SECS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.import.workers == 0 {
            anyhow::bail!("IMPORT_WORKERS must be greater than 0");
        }

        if self.import.max_attempts < 1 {
            anyhow::bail!("IMPORT_MAX_ATTEMPTS must be at least 1");
        }

        if self.import.job_timeout_secs == 0 {
            anyhow::bail!("IMPORT_JOB_TIMEOUT_SECS must be greater than 0");
        }

        if self.import.max_upload_bytes == 0 || self.import.max_entry_bytes == 0 {
            anyhow::bail!("Import size limits must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        if self.admin.tokens.is_empty() {
            tracing::warn!("GAMEDB_ADMIN_TOKENS is empty - all admin endpoints will reject callers");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            admin: AdminConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::default();
        config.import.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_min_above_max_connections() {
        let mut config = Config::default();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_admin_tokens_redacted_in_debug() {
        let admin = AdminConfig {
            tokens: vec!["super-secret".to_string()],
        };
        let rendered = format!("{:?}", admin);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("1 redacted"));
    }

    #[test]
    #[serial]
    fn test_load_reads_import_settings() {
        std::env::set_var("IMPORT_WORKERS", "7");
        std::env::set_var("IMPORT_TASK_DELAY_MS", "250");
        std::env::set_var("GAMEDB_ADMIN_TOKENS", "alpha, beta,,");

        let config = Config::load().unwrap();

        std::env::remove_var("IMPORT_WORKERS");
        std::env::remove_var("IMPORT_TASK_DELAY_MS");
        std::env::remove_var("GAMEDB_ADMIN_TOKENS");

        assert_eq!(config.import.workers, 7);
        assert_eq!(config.import.task_delay(), Duration::from_millis(250));
        assert_eq!(config.admin.tokens, vec!["alpha", "beta"]);
    }
}
