use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    error::ProviderError,
    model::WeatherReading,
    provider::{ProviderId, build_http_client, truncate_body},
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "http://api.weatherstack.com";
const ID: ProviderId = ProviderId::WeatherStack;

/// weatherstack.com current-conditions API. Reports wind in km/h.
#[derive(Debug, Clone)]
pub struct WeatherStackProvider {
    access_key: String,
    base_url: String,
    http: Client,
}

impl WeatherStackProvider {
    pub fn new(
        access_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            access_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_http_client(timeout)?,
        })
    }

    async fn fetch_current(&self, city: &str) -> Result<WeatherReading, ProviderError> {
        let url = format!("{}/current", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("access_key", self.access_key.as_str()), ("query", city), ("units", "m")])
            .send()
            .await
            .map_err(ProviderError::transport(ID))?;

        let status = res.status();
        let body = res.text().await.map_err(ProviderError::transport(ID))?;

        if !status.is_success() {
            return Err(ProviderError::data(
                ID,
                format!("request failed with status {}: {}", status, truncate_body(&body)),
            ));
        }

        let parsed: WsResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::data(ID, format!("failed to parse response JSON: {e}")))?;

        if let Some(error) = parsed.error {
            let info = error.info.unwrap_or_else(|| "unknown error".to_string());
            return Err(ProviderError::data(ID, format!("API error: {info}")));
        }

        let current = parsed
            .current
            .ok_or_else(|| ProviderError::data(ID, "invalid response format: missing current data"))?;

        match (current.temperature, current.wind_speed) {
            (Some(temperature), Some(wind_speed)) => Ok(WeatherReading::new(temperature, wind_speed)),
            _ => Err(ProviderError::data(ID, "missing temperature or wind speed data")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsError {
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsCurrent {
    temperature: Option<f64>,
    wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    error: Option<WsError>,
    current: Option<WsCurrent>,
}

#[async_trait]
impl WeatherProvider for WeatherStackProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn fetch(&self, city: &str) -> Result<WeatherReading, ProviderError> {
        debug!(provider = %ID, city, "Fetching current weather");

        let result = self.fetch_current(city).await;
        match &result {
            Ok(reading) => debug!(provider = %ID, city, ?reading, "Fetched current weather"),
            Err(err) => warn!(provider = %ID, city, error = %err, "Fetch failed"),
        }
        result
    }
}
