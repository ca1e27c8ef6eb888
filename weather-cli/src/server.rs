//! HTTP surface over the weather orchestrator.
//!
//! - `GET /v1/weather?city=..` returns `{"temperatureDegrees", "windSpeed"}`
//! - `GET /v1/health` returns the state of both circuit breakers
//!
//! Exhausting the fallback chain maps to 503. Anything else that goes wrong
//! while serving a request (a panic in the request task) maps to 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use weather_core::{BreakerSnapshot, WeatherError, WeatherOrchestrator, WeatherReading};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WeatherOrchestrator>,
    pub default_city: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    city: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeatherPayload {
    pub temperature_degrees: f64,
    pub wind_speed: f64,
}

impl From<WeatherReading> for WeatherPayload {
    fn from(reading: WeatherReading) -> Self {
        Self {
            temperature_degrees: reading.temperature_degrees,
            wind_speed: reading.wind_speed_kmh,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthPayload {
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug)]
pub enum ApiError {
    Unavailable(WeatherError),
    Internal(String),
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        ApiError::Unavailable(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Service temporarily unavailable: {err}"),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {msg}"))
                    .into_response()
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/weather", get(weather_handler))
        .route("/v1/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(
    listener: TcpListener,
    orchestrator: Arc<WeatherOrchestrator>,
    default_city: String,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, default_city = %default_city, "HTTP server starting");

    let app = router(AppState { orchestrator, default_city: default_city.into() });

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn weather_handler(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherPayload>, ApiError> {
    let city = query
        .city
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| state.default_city.to_string());
    tracing::info!(city = %city, "Weather requested");

    // Run in its own task so a defect in the chain surfaces as a JoinError
    // rather than tearing down the connection.
    let orchestrator = state.orchestrator.clone();
    let reading = tokio::spawn(async move { orchestrator.get_weather(&city).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Weather request task failed");
            ApiError::Internal(e.to_string())
        })??;

    Ok(Json(reading.into()))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthPayload> {
    Json(HealthPayload { breakers: state.orchestrator.breaker_snapshots() })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
