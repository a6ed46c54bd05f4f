use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use quill::CounterMode;
use quill::janitor::RetentionPolicy;
use quill::push::DEFAULT_PUSH_ENDPOINT;

/// Default location of the config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = ".quill/config.toml";

/// Resolved configuration for quill commands
pub struct ConfigContext {
    /// Path the config was (or would be) loaded from
    pub config_path: PathBuf,
    /// Whether the file existed; defaults are used otherwise
    pub loaded: bool,
    pub config: QuillConfig,
}

/// Configuration stored in .quill/config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub push: PushSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// `best_effort` or `atomic`
    #[serde(default = "default_counter_mode")]
    pub counter_mode: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
            counter_mode: default_counter_mode(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "quill".to_string()
}

fn default_counter_mode() -> String {
    "best_effort".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            endpoint: default_push_endpoint(),
            timeout_secs: default_push_timeout(),
        }
    }
}

fn default_push_endpoint() -> String {
    DEFAULT_PUSH_ENDPOINT.to_string()
}

fn default_push_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_notification_days")]
    pub read_notification_days: i64,
    #[serde(default = "default_unverified_minutes")]
    pub unverified_grace_minutes: i64,
    #[serde(default = "default_receipt_days")]
    pub receipt_days: i64,
    /// How often the unverified-account sweep runs
    #[serde(default = "default_unverified_minutes")]
    pub unverified_sweep_minutes: i64,
    /// UTC `HH:MM` of the daily notification and receipt purges
    #[serde(default = "default_daily_purge_at")]
    pub daily_purge_at: String,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            read_notification_days: default_notification_days(),
            unverified_grace_minutes: default_unverified_minutes(),
            receipt_days: default_receipt_days(),
            unverified_sweep_minutes: default_unverified_minutes(),
            daily_purge_at: default_daily_purge_at(),
        }
    }
}

fn default_notification_days() -> i64 {
    3
}

fn default_unverified_minutes() -> i64 {
    10
}

fn default_receipt_days() -> i64 {
    7
}

fn default_daily_purge_at() -> String {
    "00:00".to_string()
}

impl RetentionSettings {
    pub fn policy(&self) -> Result<RetentionPolicy> {
        for (name, value) in [
            ("read_notification_days", self.read_notification_days),
            ("unverified_grace_minutes", self.unverified_grace_minutes),
            ("receipt_days", self.receipt_days),
        ] {
            if value <= 0 {
                anyhow::bail!("retention.{name} must be positive, got {value}");
            }
        }
        Ok(RetentionPolicy {
            read_notification_ttl: TimeDelta::days(self.read_notification_days),
            unverified_grace: TimeDelta::minutes(self.unverified_grace_minutes),
            receipt_ttl: TimeDelta::days(self.receipt_days),
        })
    }

    pub fn unverified_sweep(&self) -> Result<std::time::Duration> {
        let minutes = u64::try_from(self.unverified_sweep_minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .with_context(|| {
                format!(
                    "retention.unverified_sweep_minutes must be positive, got {}",
                    self.unverified_sweep_minutes
                )
            })?;
        Ok(std::time::Duration::from_secs(minutes * 60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory of stored objects (profile images live under `profile_images/`)
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> String {
    ".quill/objects".to_string()
}

impl ConfigContext {
    /// Load the config from `path`, or from [`DEFAULT_CONFIG_PATH`] when none is given.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !config_path.exists() {
            return Ok(Self {
                config_path,
                loaded: false,
                config: QuillConfig::default(),
            });
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: QuillConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(Self {
            config_path,
            loaded: true,
            config,
        })
    }

    /// Get the Redis URL, expanding environment variables
    pub fn redis_url(&self) -> Result<String> {
        expand_env(&self.config.store.url)
    }

    pub fn push_endpoint(&self) -> Result<String> {
        expand_env(&self.config.push.endpoint)
    }

    pub fn counter_mode(&self) -> Result<CounterMode> {
        match self.config.store.counter_mode.as_str() {
            "best_effort" => Ok(CounterMode::BestEffort),
            "atomic" => Ok(CounterMode::Atomic),
            other => anyhow::bail!("store.counter_mode must be `best_effort` or `atomic`, got `{other}`"),
        }
    }
}

/// Expand a whole-value `${VAR}` reference; other values pass through unchanged.
pub fn expand_env(value: &str) -> Result<String> {
    if let Some(var_name) = value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        std::env::var(var_name).with_context(|| format!("Environment variable {var_name} not set"))
    } else {
        Ok(value.to_string())
    }
}
