use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    calculator::CalculatorVariant, http::DEFAULT_REQUEST_TIMEOUT, provider::ProviderId,
    retry::RetryPolicy,
};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// Credentials for the outbound messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagingConfig {
    pub channel_access_token: Option<String>,
}

/// How a broadcast run behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub variant: CalculatorVariant,
    /// IANA zone name used to place hourly records on the local clock.
    pub timezone: String,
    /// Location groups processed at once.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Stop starting new groups after this many seconds.
    pub run_deadline_secs: Option<u64>,
    /// Defaults to `users.json` under the platform data directory.
    pub users_file: Option<PathBuf>,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            variant: CalculatorVariant::default(),
            timezone: "Asia/Tokyo".to_string(),
            concurrency: 1,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            run_deadline_secs: None,
            users_file: None,
        }
    }
}

impl BroadcastSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid timezone '{}' in [broadcast]: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_secs: Vec<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_secs: vec![1, 2, 4] }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        )
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Example TOML:
    /// [providers.weatherapi]
    /// api_key = "..."
    pub providers: HashMap<String, ProviderConfig>,

    pub messaging: MessagingConfig,

    pub broadcast: BroadcastSettings,

    pub retry: RetrySettings,
}

impl Config {
    /// The hourly data source the configured variant reads from.
    pub fn data_source_id(&self) -> ProviderId {
        match self.broadcast.variant {
            CalculatorVariant::SplitSource | CalculatorVariant::CombinedLocal => {
                ProviderId::WeatherApi
            }
            CalculatorVariant::CombinedEpoch => ProviderId::OpenWeather,
        }
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-broadcast", "weather-broadcast")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Path to the subscriber file: `[broadcast] users_file`, or the platform data dir.
    pub fn users_file_path(&self) -> Result<PathBuf> {
        match &self.broadcast.users_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("users.json")),
        }
    }

    /// Set or replace a provider API key.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    pub fn set_channel_access_token(&mut self, token: String) {
        self.messaging.channel_access_token = Some(token);
    }

    pub fn channel_access_token(&self) -> Result<&str> {
        self.messaging.channel_access_token.as_deref().ok_or_else(|| {
            anyhow!(
                "No LINE channel access token configured.\n\
                 Hint: run `weather-broadcast configure line` first."
            )
        })
    }
}
