use serde::{Deserialize, Serialize};
use std::env;

/// Default key prefix for staged payloads
pub const DEFAULT_STAGING_PREFIX: &str = "staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StagingBackend {
    #[default]
    S3,
    /// Process-local map; payloads do not survive a restart
    Memory,
}

impl std::str::FromStr for StagingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StagingBackend::S3),
            "memory" => Ok(StagingBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid staging backend: {}", s)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StagingBackend,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub prefix: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("path_style", &self.path_style)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env::var("STAGING_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => StagingBackend::default(),
        };

        let prefix = env::var("STAGING_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_STAGING_PREFIX.to_string());
        if prefix.is_empty() {
            anyhow::bail!("STAGING_PREFIX cannot be empty");
        }

        Ok(Self {
            backend,
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "gamedb-staging".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            prefix,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StagingBackend::S3,
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            prefix: DEFAULT_STAGING_PREFIX.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StagingBackend::Memory,
            ..Self::for_minio("http://localhost:9000", "unused")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
        assert_eq!(config.prefix, "staging");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let rendered = format!("{:?}", StorageConfig::for_minio("http://s3", "b"));
        assert!(!rendered.contains("minioadmin"));
    }

    #[test]
    #[serial]
    fn test_from_env_trims_prefix() {
        std::env::set_var("STAGING_PREFIX", "/imports/staging/");
        std::env::set_var("STAGING_BACKEND", "memory");
        let config = StorageConfig::from_env().unwrap();
        std::env::remove_var("STAGING_PREFIX");
        std::env::remove_var("STAGING_BACKEND");

        assert_eq!(config.prefix, "imports/staging");
        assert_eq!(config.backend, StagingBackend::Memory);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_backend() {
        std::env::set_var("STAGING_BACKEND", "floppy");
        let result = StorageConfig::from_env();
        std::env::remove_var("STAGING_BACKEND");
        assert!(result.is_err());
    }
}
