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

const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org";
const ID: ProviderId = ProviderId::OpenWeather;
const MPS_TO_KMH: f64 = 3.6;

/// openweathermap.org current weather API, queried in metric units.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    app_id: String,
    base_url: String,
    country_code: Option<String>,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(app_id: String, base_url: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            app_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            country_code: None,
            http: build_http_client(timeout)?,
        })
    }

    /// Narrow city lookups to one country, e.g. `AU` queries `Sydney,AU`.
    pub fn with_country_code(mut self, country_code: Option<String>) -> Self {
        self.country_code = country_code.filter(|c| !c.trim().is_empty());
        self
    }

    fn query_for(&self, city: &str) -> String {
        match &self.country_code {
            Some(code) => format!("{city},{code}"),
            None => city.to_string(),
        }
    }

    async fn fetch_current(&self, city: &str) -> Result<WeatherReading, ProviderError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let q = self.query_for(city);

        let res = self
            .http
            .get(&url)
            .query(&[("q", q.as_str()), ("appid", self.app_id.as_str()), ("units", "metric")])
            .send()
            .await
            .map_err(ProviderError::transport(ID))?;

        let status = res.status();
        let body = res.text().await.map_err(ProviderError::transport(ID))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<OwResponse>(&body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| truncate_body(&body));
            return Err(ProviderError::data(
                ID,
                format!("request failed with status {status}: {detail}"),
            ));
        }

        let parsed: OwResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::data(ID, format!("failed to parse response JSON: {e}")))?;

        if let Some(cod) = &parsed.cod {
            if !is_success_code(cod) {
                let message = parsed.message.as_deref().unwrap_or("unknown error");
                return Err(ProviderError::data(ID, format!("API error {cod}: {message}")));
            }
        }

        let (Some(main), Some(wind)) = (parsed.main, parsed.wind) else {
            return Err(ProviderError::data(ID, "invalid response format: missing main or wind"));
        };

        match (main.temp, wind.speed) {
            (Some(temp), Some(speed_mps)) => Ok(WeatherReading::new(temp, speed_mps * MPS_TO_KMH)),
            _ => Err(ProviderError::data(ID, "missing temperature or wind speed data")),
        }
    }
}

/// `cod` arrives as a number on success and as a string on most errors.
fn is_success_code(cod: &serde_json::Value) -> bool {
    match cod {
        serde_json::Value::Number(n) => n.as_u64() == Some(200),
        serde_json::Value::String(s) => s == "200",
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwResponse {
    cod: Option<serde_json::Value>,
    message: Option<String>,
    main: Option<OwMain>,
    wind: Option<OwWind>,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
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
