use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Environment variable overriding the token secret
pub const ENV_SECRET_KEY: &str = "POOLCAM_SECRET_KEY";
/// Environment variable overriding the database URL
pub const ENV_DATABASE_URL: &str = "POOLCAM_DATABASE_URL";
/// Environment variable overriding the bind address
pub const ENV_BIND: &str = "POOLCAM_BIND";

/// Configuration store backed by an optional TOML file
///
/// Uses `ArcSwap` for lock-free reads, so connection handlers can read
/// the current settings on every accept without contention.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Load configuration from `path` (defaults when `None` or missing),
    /// then apply environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = tokio::fs::read_to_string(p).await?;
                Self::parse(&text)?
            }
            Some(p) => {
                tracing::warn!("Config file {} not found, using defaults", p.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        Ok(Self {
            path: path.map(Path::to_path_buf),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Build a store around an in-memory config
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            path: None,
            cache: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Parse TOML text into a config
    pub fn parse(text: &str) -> Result<AppConfig> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Replace configuration
    pub fn set(&self, config: AppConfig) {
        self.cache.store(Arc::new(config));
    }

    /// Update configuration with a closure
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (*self.cache.load_full()).clone();
        f(&mut config);
        self.cache.store(Arc::new(config));
    }

    /// Path the config was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup(ENV_SECRET_KEY) {
        config.auth.secret_key = secret;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        config.database.url = url;
    }
    if let Some(bind) = lookup(ENV_BIND) {
        config.server.bind_address = bind;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_partial_toml() {
        let config = ConfigStore::parse(
            r#"
            [video]
            jpeg_quality = 70
            max_consecutive_read_failures = 90

            [relay]
            role_timeout_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.video.jpeg_quality, 70);
        assert_eq!(config.video.max_consecutive_read_failures, Some(90));
        assert_eq!(config.video.default_framerate, 30);
        assert_eq!(config.relay.role_timeout_secs, 3);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        let err = ConfigStore::parse("[server]\nport = \"eighty\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SECRET_KEY, "s3cret"),
            (ENV_BIND, "127.0.0.1"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.auth.secret_key, "s3cret");
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.database.url, AppConfig::default().database.url);
    }

    #[tokio::test]
    async fn test_load_and_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poolcam.toml");
        tokio::fs::write(&path, "[server]\nport = 9100\n").await.unwrap();

        let store = ConfigStore::load(Some(&path)).await.unwrap();
        assert_eq!(store.get().server.port, 9100);

        store.update(|c| c.video.worker_threads = 8);
        assert_eq!(store.get().video.worker_threads, 8);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(Some(&dir.path().join("absent.toml")))
            .await
            .unwrap();
        assert_eq!(store.get().relay.outbound_queue, 64);
    }
}
