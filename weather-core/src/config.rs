use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::breaker::{BreakerConfig, FailureThreshold};
use crate::provider::ProviderId;

pub const PRIMARY: &str = "primary";
pub const SECONDARY: &str = "secondary";

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Overrides the provider's public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// ISO country code appended to city queries, where the provider supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

/// On-disk form of a breaker's settings.
///
/// Example TOML:
/// [breakers.primary]
/// failure_threshold = 5      # or a ratio such as 0.5
/// sliding_window_size = 10
/// open_cooldown_secs = 30
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: FailureThreshold,
    pub sliding_window_size: u32,
    pub open_cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerConfig::default().into()
    }
}

impl From<BreakerConfig> for BreakerSettings {
    fn from(cfg: BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            sliding_window_size: cfg.sliding_window_size,
            open_cooldown_secs: cfg.open_cooldown.as_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            sliding_window_size: self.sliding_window_size,
            open_cooldown: Duration::from_secs(self.open_cooldown_secs),
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// City used when a request does not name one.
    pub default_city: String,

    /// Listen address for `weather serve`.
    pub bind_address: String,

    /// Provider ids, e.g. "weatherstack" or "openweather".
    pub primary_provider: Option<String>,
    pub secondary_provider: Option<String>,

    /// Per-request deadline applied to every provider call.
    pub request_timeout_secs: u64,

    /// Example TOML:
    /// [providers.weatherstack]
    /// api_key = "..."
    pub providers: HashMap<String, ProviderConfig>,

    /// Keyed by "primary" / "secondary".
    pub breakers: HashMap<String, BreakerSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_city: "melbourne".to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            primary_provider: None,
            secondary_provider: None,
            request_timeout_secs: 10,
            providers: HashMap::new(),
            breakers: HashMap::new(),
        }
    }
}

impl Config {
    /// Primary provider id, defaulting to weatherstack.
    pub fn primary_provider_id(&self) -> Result<ProviderId> {
        match &self.primary_provider {
            Some(s) => ProviderId::try_from(s.as_str()),
            None => Ok(ProviderId::WeatherStack),
        }
    }

    /// Secondary provider id, defaulting to openweather.
    pub fn secondary_provider_id(&self) -> Result<ProviderId> {
        match &self.secondary_provider {
            Some(s) => ProviderId::try_from(s.as_str()),
            None => Ok(ProviderId::OpenWeather),
        }
    }

    /// Both provider roles, checked to be distinct.
    pub fn provider_roles(&self) -> Result<(ProviderId, ProviderId)> {
        let primary = self.primary_provider_id()?;
        let secondary = self.secondary_provider_id()?;
        if primary == secondary {
            return Err(anyhow!(
                "Primary and secondary provider are both '{primary}'; they must differ."
            ));
        }
        Ok((primary, secondary))
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Validated breaker settings for a role, falling back to defaults.
    pub fn breaker_config(&self, role: &str) -> Result<BreakerConfig> {
        let cfg = self
            .breakers
            .get(role)
            .map(BreakerSettings::to_breaker_config)
            .unwrap_or_default();

        cfg.validate()
            .map_err(|e| anyhow!("Invalid breaker settings for '{role}': {e}"))?;

        Ok(cfg)
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    /// Environment overrides are applied on top.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        let mut cfg = Self::load_from(&path)?;
        cfg.apply_env_overrides(std::env::vars());
        Ok(cfg)
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
        let path = Self::config_file_path()?;
        self.save_to(&path)
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

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-task", "weather-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// `WEATHER_<PROVIDER>_API_KEY` sets or replaces that provider's key.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            for id in ProviderId::all() {
                let expected = format!("WEATHER_{}_API_KEY", id.as_str().to_uppercase());
                if name == expected && !value.is_empty() {
                    self.upsert_provider_api_key(*id, value.clone());
                }
            }
        }
    }

    /// Set/replace a provider API key, keeping any other provider settings.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert(ProviderConfig { api_key, base_url: None, country_code: None });
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}
