//! Configuration management with file persistence

use crate::locking::LockConfig;
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ledgerlock configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub locking: LockingConfig,
}

/// Tunables of the lock manager, as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub poll_interval_ms: u64,
    pub queue_interval_ms: u64,
    pub deadlock_check_interval_secs: u64,
    pub deadlock_threshold_secs: u64,
    pub heal_interval_secs: u64,
    pub janitor_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub history_capacity: usize,
    pub default_wait_timeout_secs: u64,
    pub deadlock_detection_enabled: bool,
    pub healing_enabled: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            queue_interval_ms: 1000,
            deadlock_check_interval_secs: 5,
            deadlock_threshold_secs: 60,
            heal_interval_secs: 10,
            janitor_interval_secs: 60,
            error_backoff_secs: 5,
            history_capacity: 1000,
            default_wait_timeout_secs: 30,
            deadlock_detection_enabled: true,
            healing_enabled: true,
        }
    }
}

const KEYS: [&str; 11] = [
    "locking.poll_interval_ms",
    "locking.queue_interval_ms",
    "locking.deadlock_check_interval_secs",
    "locking.deadlock_threshold_secs",
    "locking.heal_interval_secs",
    "locking.janitor_interval_secs",
    "locking.error_backoff_secs",
    "locking.history_capacity",
    "locking.default_wait_timeout_secs",
    "locking.deadlock_detection_enabled",
    "locking.healing_enabled",
];

impl LockingConfig {
    /// Runtime configuration for `LockManager`
    pub fn to_lock_config(&self) -> LockConfig {
        LockConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            queue_interval: Duration::from_millis(self.queue_interval_ms),
            deadlock_check_interval: Duration::from_secs(self.deadlock_check_interval_secs),
            deadlock_threshold: Duration::from_secs(self.deadlock_threshold_secs),
            heal_interval: Duration::from_secs(self.heal_interval_secs),
            janitor_interval: Duration::from_secs(self.janitor_interval_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            history_capacity: self.history_capacity,
            default_wait_timeout: Duration::from_secs(self.default_wait_timeout_secs),
            deadlock_detection_enabled: self.deadlock_detection_enabled,
            healing_enabled: self.healing_enabled,
        }
    }

    /// Validate the locking settings
    pub fn validate(&self) -> anyhow::Result<()> {
        let periods = [
            ("locking.poll_interval_ms", self.poll_interval_ms),
            ("locking.queue_interval_ms", self.queue_interval_ms),
            (
                "locking.deadlock_check_interval_secs",
                self.deadlock_check_interval_secs,
            ),
            ("locking.heal_interval_secs", self.heal_interval_secs),
            ("locking.janitor_interval_secs", self.janitor_interval_secs),
            ("locking.error_backoff_secs", self.error_backoff_secs),
            (
                "locking.default_wait_timeout_secs",
                self.default_wait_timeout_secs,
            ),
        ];
        if let Some((key, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(anyhow!("{} must be greater than zero", key));
        }
        if self.history_capacity == 0 {
            return Err(anyhow!("locking.history_capacity must be greater than zero"));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LEDGERLOCK_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("ledgerlock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.locking.validate()
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let l = &self.locking;
        let value = match key {
            "locking.poll_interval_ms" => l.poll_interval_ms.to_string(),
            "locking.queue_interval_ms" => l.queue_interval_ms.to_string(),
            "locking.deadlock_check_interval_secs" => l.deadlock_check_interval_secs.to_string(),
            "locking.deadlock_threshold_secs" => l.deadlock_threshold_secs.to_string(),
            "locking.heal_interval_secs" => l.heal_interval_secs.to_string(),
            "locking.janitor_interval_secs" => l.janitor_interval_secs.to_string(),
            "locking.error_backoff_secs" => l.error_backoff_secs.to_string(),
            "locking.history_capacity" => l.history_capacity.to_string(),
            "locking.default_wait_timeout_secs" => l.default_wait_timeout_secs.to_string(),
            "locking.deadlock_detection_enabled" => l.deadlock_detection_enabled.to_string(),
            "locking.healing_enabled" => l.healing_enabled.to_string(),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Set a configuration value by key
    ///
    /// The value is parsed and the whole configuration re-validated; on
    /// error the configuration is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.locking.clone();
        let l = &mut updated;
        match key {
            "locking.poll_interval_ms" => l.poll_interval_ms = parse(key, value)?,
            "locking.queue_interval_ms" => l.queue_interval_ms = parse(key, value)?,
            "locking.deadlock_check_interval_secs" => {
                l.deadlock_check_interval_secs = parse(key, value)?
            }
            "locking.deadlock_threshold_secs" => l.deadlock_threshold_secs = parse(key, value)?,
            "locking.heal_interval_secs" => l.heal_interval_secs = parse(key, value)?,
            "locking.janitor_interval_secs" => l.janitor_interval_secs = parse(key, value)?,
            "locking.error_backoff_secs" => l.error_backoff_secs = parse(key, value)?,
            "locking.history_capacity" => l.history_capacity = parse(key, value)?,
            "locking.default_wait_timeout_secs" => {
                l.default_wait_timeout_secs = parse(key, value)?
            }
            "locking.deadlock_detection_enabled" => {
                l.deadlock_detection_enabled = parse(key, value)?
            }
            "locking.healing_enabled" => l.healing_enabled = parse(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        updated.validate()?;
        self.locking = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `ledgerlock config list` to see available keys.",
        key
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_matches_lock_config() {
        let config = Config::default();
        let runtime = config.locking.to_lock_config();
        let defaults = LockConfig::default();

        assert_eq!(runtime.poll_interval, defaults.poll_interval);
        assert_eq!(runtime.queue_interval, defaults.queue_interval);
        assert_eq!(runtime.deadlock_check_interval, defaults.deadlock_check_interval);
        assert_eq!(runtime.deadlock_threshold, defaults.deadlock_threshold);
        assert_eq!(runtime.heal_interval, defaults.heal_interval);
        assert_eq!(runtime.janitor_interval, defaults.janitor_interval);
        assert_eq!(runtime.error_backoff, defaults.error_backoff);
        assert_eq!(runtime.history_capacity, defaults.history_capacity);
        assert_eq!(runtime.default_wait_timeout, defaults.default_wait_timeout);
        assert!(runtime.deadlock_detection_enabled);
        assert!(runtime.healing_enabled);
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();
        assert_eq!(config.get("locking.poll_interval_ms").unwrap(), "100");

        config.set("locking.poll_interval_ms", "250").unwrap();
        config.set("locking.healing_enabled", "false").unwrap();

        assert_eq!(config.get("locking.poll_interval_ms").unwrap(), "250");
        assert_eq!(config.get("locking.healing_enabled").unwrap(), "false");
        assert_eq!(
            config.locking.to_lock_config().poll_interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("locking.poll_interval_ms", "soon").is_err());
        assert!(config.set("locking.heal_interval_secs", "0").is_err());
        assert!(config.set("locking.history_capacity", "-1").is_err());
        assert!(config.set("locking.healing_enabled", "maybe").is_err());
        assert!(config.set("locking.unknown", "1").is_err());
        assert!(config.get("nope").is_err());

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_covers_all_keys() {
        let items = Config::default().list().unwrap();
        assert_eq!(items.len(), KEYS.len());
        assert!(items.contains(&("locking.history_capacity".to_string(), "1000".to_string())));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("locking.deadlock_threshold_secs", "120").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let loaded = Config::load_from(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[locking]\nheal_interval_secs = 3\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.locking.heal_interval_secs, 3);
        assert_eq!(loaded.locking.poll_interval_ms, 100);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[locking]\nhistory_capacity = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
