//! Core library for the `weather` CLI and HTTP endpoint.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers, with two concrete providers
//! - Per-provider circuit breakers
//! - The fallback orchestrator: primary, then secondary, then last known reading
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;

pub use breaker::{BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, FailureThreshold};
pub use cache::{InMemoryCache, ReadingCache};
pub use config::{BreakerSettings, Config, ProviderConfig};
pub use error::{ProviderError, WeatherError};
pub use model::{ReadingSource, SourcedReading, WeatherReading};
pub use orchestrator::{GuardedProvider, WeatherOrchestrator};
pub use provider::{ProviderId, WeatherProvider};
