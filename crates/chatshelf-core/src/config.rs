//! Application configuration management.
//!
//! Holds the backend address, cache TTLs, preload tuning and the location
//! of durable storage. Every section defaults when missing, so a config
//! written by an older version keeps loading.
//!
//! Configuration is stored at `~/.config/chatshelf/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::EntityKind;

/// Application name used for config/data directory paths
const APP_NAME: &str = "chatshelf";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Attempts after the first one for transient failures.
    pub max_retries: u32,
    /// Backoff grows linearly: attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Time-to-live per entity type, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub chats_ttl_secs: u64,
    pub chat_counts_ttl_secs: u64,
    pub message_counts_ttl_secs: u64,
    pub personas_ttl_secs: u64,
    pub characters_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chats_ttl_secs: 30,
            chat_counts_ttl_secs: 60,
            message_counts_ttl_secs: 60,
            personas_ttl_secs: 60,
            characters_ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, kind: EntityKind) -> chrono::Duration {
        let secs = match kind {
            EntityKind::Chats => self.chats_ttl_secs,
            EntityKind::ChatCounts => self.chat_counts_ttl_secs,
            EntityKind::MessageCounts => self.message_counts_ttl_secs,
            EntityKind::Personas => self.personas_ttl_secs,
            EntityKind::Characters => self.characters_ttl_secs,
        };
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Wait before warming the cache so startup rendering goes first.
    pub delay_ms: u64,
    /// How many of the most recently used characters get their chats warmed.
    pub recent_chat_limit: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1500,
            recent_chat_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Simulated storage quota; `None` means unbounded.
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub preload: PreloadConfig,
    /// Characters whose chat counts are fetched concurrently per batch.
    pub count_batch_size: usize,
    /// Quiet period before a refresh triggered by an external change runs.
    pub refresh_cooldown_ms: u64,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            preload: PreloadConfig::default(),
            count_batch_size: 5,
            refresh_cooldown_ms: 300,
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage.data_dir {
            return Ok(dir.clone());
        }
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn count_batch_size(&self) -> usize {
        self.count_batch_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_merges_onto_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cache":{"chats_ttl_secs":5},"count_batch_size":0}"#)
                .expect("partial config parses");
        assert_eq!(config.cache.chats_ttl_secs, 5);
        assert_eq!(config.cache.personas_ttl_secs, 60);
        assert_eq!(config.api, ApiConfig::default());
        // Zero would stall batching
        assert_eq!(config.count_batch_size(), 1);
    }

    #[test]
    fn test_ttl_per_kind() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl(EntityKind::Chats), chrono::Duration::seconds(30));
        assert_eq!(cache.ttl(EntityKind::ChatCounts), chrono::Duration::seconds(60));
        assert_eq!(cache.ttl(EntityKind::Characters), chrono::Duration::seconds(30));
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = Config::default();
        config.api.base_url = "http://example.invalid".to_string();
        config.save_to(&path).expect("save");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Config::load_from(&dir.path().join(CONFIG_FILE)).expect("load");
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_data_dir_override() {
        let mut config = Config::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/chatshelf-test"));
        assert_eq!(
            config.data_dir().expect("data dir"),
            PathBuf::from("/tmp/chatshelf-test")
        );
    }
}
