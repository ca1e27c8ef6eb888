use crate::{
    Config, WeatherReading,
    error::ProviderError,
    provider::{openweather::OpenWeatherProvider, weatherstack::WeatherStackProvider},
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod openweather;
pub mod weatherstack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    WeatherStack,
    OpenWeather,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::WeatherStack => "weatherstack",
            ProviderId::OpenWeather => "openweather",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::WeatherStack, ProviderId::OpenWeather]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "weatherstack" => Ok(ProviderId::WeatherStack),
            "openweather" => Ok(ProviderId::OpenWeather),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: weatherstack, openweather."
            )),
        }
    }
}

/// A remote source of current weather for a city.
///
/// Implementations do not retry; a failed call is reported as-is so the
/// caller's circuit breaker sees it.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, city: &str) -> Result<WeatherReading, ProviderError>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let provider_cfg = config.provider_config(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;

    if config.request_timeout_secs == 0 {
        anyhow::bail!("request_timeout_secs must be greater than 0");
    }
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let api_key = provider_cfg.api_key.clone();
    let base_url = provider_cfg.base_url.clone();

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::WeatherStack => {
            Box::new(WeatherStackProvider::new(api_key, base_url, timeout)?)
        }
        ProviderId::OpenWeather => Box::new(
            OpenWeatherProvider::new(api_key, base_url, timeout)?
                .with_country_code(provider_cfg.country_code.clone()),
        ),
    };

    Ok(boxed)
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
