use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::MAX_PAGE_LIMIT;

/// Root application configuration, loaded from `~/.config/tunecast/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub storage: StorageConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub podcast_base_url: String,
    pub track_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub user_agent: String,
    pub best_podcasts_genre: String,
    pub best_podcasts_region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    /// Overall deadline for one scheduling run. None means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            podcast_base_url: "https://listen-api.listennotes.com/api/v2".to_string(),
            track_base_url: "https://saavnapi-nine.vercel.app/result/".to_string(),
            api_key: None,
            api_key_env: "TUNECAST_PODCAST_API_KEY".to_string(),
            timeout_ms: 7_000,
            user_agent: "tunecast/0.1".to_string(),
            best_podcasts_genre: "93".to_string(),
            best_podcasts_region: "us".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_jitter_ms: 200,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            inter_batch_delay_ms: 500,
            deadline_ms: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("tunecast")
            .join("catalog.db");
        Self {
            database_path: path.to_string_lossy().to_string(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

// ─── Derived values ────────────────────────────────────────

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured key, else the one in the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }
}

impl BatchConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/tunecast/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TUNECAST_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tunecast")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.batch.batch_size == 0 {
            return Err(CoreError::Config("batch.batch_size must be at least 1".to_string()));
        }
        if self.pagination.max_limit == 0
            || self.pagination.default_limit == 0
            || self.pagination.default_limit > self.pagination.max_limit
        {
            return Err(CoreError::Config(
                "pagination limits must satisfy 1 <= default_limit <= max_limit".to_string(),
            ));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(CoreError::Config("upstream.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.upstream.timeout_ms, 7_000);
        assert_eq!(cfg.batch.batch_size, 3);
        assert_eq!(cfg.retry.base_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.batch.deadline_ms = Some(30_000);
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.batch.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(loaded.upstream.podcast_base_url, cfg.upstream.podcast_base_url);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 2\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.retry.max_attempts, 2);
        assert_eq!(loaded.retry.base_delay_ms, 500);
        assert_eq!(loaded.batch.inter_batch_delay_ms, 500);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[batch]\nbatch_size = 0\n").unwrap();

        assert!(matches!(AppConfig::load_from(&path), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_configured_api_key_wins() {
        let cfg = UpstreamConfig {
            api_key: Some("abc".to_string()),
            api_key_env: "TUNECAST_TEST_UNSET_KEY_VAR".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("abc"));

        let blank = UpstreamConfig {
            api_key: Some("  ".to_string()),
            api_key_env: "TUNECAST_TEST_UNSET_KEY_VAR".to_string(),
            ..Default::default()
        };
        assert_eq!(blank.resolve_api_key(), None);
    }
}
