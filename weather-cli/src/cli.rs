use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use std::sync::Arc;
use weather_core::{Config, ProviderId, SourcedReading, WeatherOrchestrator};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "weatherstack" or "openweather".
        provider: String,
    },

    /// Show current weather for a city.
    Show {
        /// City name; defaults to the configured default city.
        city: Option<String>,
    },

    /// Serve `GET /v1/weather?city=...` over HTTP.
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080. Defaults to the configured address.
        #[arg(long)]
        bind: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Show { city } => show(city).await,
            Command::Serve { bind } => serve(bind).await,
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let current_base = config
        .provider_config(id)
        .and_then(|p| p.base_url.clone())
        .unwrap_or_default();
    let base_url = Text::new("Base URL (leave empty for the public endpoint):")
        .with_initial_value(&current_base)
        .prompt()
        .context("Failed to read base URL")?;

    config.upsert_provider_api_key(id, api_key.trim().to_string());
    if let Some(provider_cfg) = config.providers.get_mut(id.as_str()) {
        let base_url = base_url.trim();
        provider_cfg.base_url = (!base_url.is_empty()).then(|| base_url.to_string());
    }

    config.save()?;
    println!(
        "Saved credentials for {id} to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}

async fn show(city: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let city = city.unwrap_or_else(|| config.default_city.clone());
    let orchestrator = WeatherOrchestrator::from_config(&config)?;

    let sourced = orchestrator.get_weather_with_source(&city).await?;
    println!("{}", format_reading(&city, &sourced));
    Ok(())
}

async fn serve(bind: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let bind = bind.unwrap_or_else(|| config.bind_address.clone());
    let orchestrator = Arc::new(WeatherOrchestrator::from_config(&config)?);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    server::run(listener, orchestrator, config.default_city).await
}

fn format_reading(city: &str, sourced: &SourcedReading) -> String {
    format!(
        "Weather for {city} (source: {})\n  Temperature: {:.1} °C\n  Wind speed:  {:.1} km/h",
        sourced.source, sourced.reading.temperature_degrees, sourced.reading.wind_speed_kmh
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_core::{ReadingSource, WeatherReading};

    #[test]
    fn show_command_city_is_optional() {
        let cli = Cli::try_parse_from(["weather", "show"]).unwrap();
        assert!(matches!(cli.command, Command::Show { city: None }));

        let cli = Cli::try_parse_from(["weather", "show", "Sydney"]).unwrap();
        assert!(matches!(cli.command, Command::Show { city: Some(ref c) } if c == "Sydney"));
    }

    #[test]
    fn serve_accepts_bind_flag() {
        let cli = Cli::try_parse_from(["weather", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { bind: Some(ref b) } if b == "0.0.0.0:9000"));
    }

    #[test]
    fn format_reading_names_the_source() {
        let sourced = SourcedReading {
            reading: WeatherReading::new(15.0, 3.0),
            source: ReadingSource::Cache,
        };
        let text = format_reading("Sydney", &sourced);

        assert!(text.contains("Weather for Sydney (source: cache)"));
        assert!(text.contains("15.0 °C"));
        assert!(text.contains("3.0 km/h"));
    }
}
