//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::locking::LockConfig;
use crate::domain::locking::server::WORKER_LOCK_ATTEMPTS;
use crate::domain::project::{CommandStatsConverter, DEFAULT_STATS_PROGRAM, ResourceTree};

/// Logvault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub lock: LockSettings,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    pub socket_path: PathBuf,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub lock_timeout_ms: u64,
    pub unlock_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let lock = LockConfig::default();
        Self {
            storage: StorageConfig {
                root: dirs::data_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("logvault")
                    .join("storage"),
                domains: vec!["private".to_string(), "public".to_string()],
            },
            lock: LockSettings {
                socket_path: lock.socket_path,
                max_attempts: lock.max_attempts,
                retry_interval_ms: lock.retry_interval.as_millis() as u64,
                lock_timeout_ms: lock.lock_timeout.as_millis() as u64,
                unlock_timeout_ms: lock.unlock_timeout.as_millis() as u64,
            },
            stats: StatsConfig {
                program: DEFAULT_STATS_PROGRAM.to_string(),
                args: Vec::new(),
            },
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOGVAULT_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("logvault")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.domains.is_empty() {
            return Err(anyhow!("storage.domains must name at least one domain"));
        }
        if let Some(bad) = self
            .storage
            .domains
            .iter()
            .find(|d| !ResourceTree::is_safe_entry_name(d))
        {
            return Err(anyhow!("Invalid domain name: {:?}", bad));
        }
        if self.lock.max_attempts < 1 {
            return Err(anyhow!("lock.max_attempts must be at least 1"));
        }
        if self.lock.lock_timeout_ms == 0 || self.lock.unlock_timeout_ms == 0 {
            return Err(anyhow!("Lock timeouts must be greater than zero"));
        }
        // The coordinator retries a worker's lock this long before answering
        let worker_wait = u64::from(WORKER_LOCK_ATTEMPTS - 1) * self.lock.retry_interval_ms;
        if self.lock.lock_timeout_ms <= worker_wait {
            return Err(anyhow!(
                "lock.lock_timeout_ms ({}) must exceed {} ms, the time the coordinator spends on {} attempts {} ms apart",
                self.lock.lock_timeout_ms,
                worker_wait,
                WORKER_LOCK_ATTEMPTS,
                self.lock.retry_interval_ms
            ));
        }
        if self.stats.program.trim().is_empty() {
            return Err(anyhow!("stats.program must not be empty"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "storage.root" => Ok(self.storage.root.display().to_string()),
            "storage.domains" => Ok(self.storage.domains.join(", ")),

            "lock.socket_path" => Ok(self.lock.socket_path.display().to_string()),
            "lock.max_attempts" => Ok(self.lock.max_attempts.to_string()),
            "lock.retry_interval_ms" => Ok(self.lock.retry_interval_ms.to_string()),
            "lock.lock_timeout_ms" => Ok(self.lock.lock_timeout_ms.to_string()),
            "lock.unlock_timeout_ms" => Ok(self.lock.unlock_timeout_ms.to_string()),

            "stats.program" => Ok(self.stats.program.clone()),
            "stats.args" => Ok(self.stats.args.join(" ")),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `logvault config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "storage.root" => {
                self.storage.root = PathBuf::from(value);
            }
            "storage.domains" => {
                self.storage.domains = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }

            "lock.socket_path" => {
                self.lock.socket_path = PathBuf::from(value);
            }
            "lock.max_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_attempts value: {}", value))?;
                if attempts < 1 {
                    return Err(anyhow!("max_attempts must be at least 1"));
                }
                self.lock.max_attempts = attempts;
            }
            "lock.retry_interval_ms" => {
                self.lock.retry_interval_ms = value
                    .parse()
                    .with_context(|| format!("Invalid retry_interval_ms value: {}", value))?;
            }
            "lock.lock_timeout_ms" => {
                self.lock.lock_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid lock_timeout_ms value: {}", value))?;
            }
            "lock.unlock_timeout_ms" => {
                self.lock.unlock_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid unlock_timeout_ms value: {}", value))?;
            }

            "stats.program" => {
                self.stats.program = value.to_string();
            }
            "stats.args" => {
                self.stats.args = value.split_whitespace().map(str::to_string).collect();
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `logvault config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "storage.root",
            "storage.domains",
            "lock.socket_path",
            "lock.max_attempts",
            "lock.retry_interval_ms",
            "lock.lock_timeout_ms",
            "lock.unlock_timeout_ms",
            "stats.program",
            "stats.args",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
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

    /// Lock settings in the form the locking module takes
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_socket_path(self.lock.socket_path.clone())
            .with_max_attempts(self.lock.max_attempts)
            .with_retry_interval(Duration::from_millis(self.lock.retry_interval_ms))
            .with_timeouts(
                Duration::from_millis(self.lock.lock_timeout_ms),
                Duration::from_millis(self.lock.unlock_timeout_ms),
            )
    }

    pub fn resource_tree(&self) -> ResourceTree {
        ResourceTree::new(self.storage.root.clone(), self.storage.domains.clone())
    }

    pub fn stats_converter(&self) -> CommandStatsConverter {
        CommandStatsConverter::new(self.stats.program.clone(), self.stats.args.clone())
    }
}
