use serde::{Deserialize, Serialize};

/// A single observation returned by a provider (or replayed from cache).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReading {
    pub temperature_degrees: f64,
    pub wind_speed_kmh: f64,
}

impl WeatherReading {
    pub fn new(temperature_degrees: f64, wind_speed_kmh: f64) -> Self {
        Self { temperature_degrees, wind_speed_kmh }
    }
}

/// Which layer of the fallback chain produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Primary,
    Secondary,
    Cache,
}

impl ReadingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingSource::Primary => "primary",
            ReadingSource::Secondary => "secondary",
            ReadingSource::Cache => "cache",
        }
    }
}

impl std::fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcedReading {
    pub reading: WeatherReading,
    pub source: ReadingSource,
}
