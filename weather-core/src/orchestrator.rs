//! Layered fallback: primary provider, then secondary, then the last
//! successful reading for the city.
//!
//! Each provider sits behind its own circuit breaker. A breaker that is open
//! counts as a failed attempt, so the next layer is tried exactly as if the
//! provider had errored. The cache is consulted only after both providers
//! have failed; a live answer always wins over a cached one.
//!
//! Cached readings are served with no age check. A stale entry survives
//! until a provider succeeds for the same city.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{info, warn};

use crate::{
    Config, WeatherReading,
    breaker::{BreakerError, BreakerSnapshot, CircuitBreaker},
    cache::{InMemoryCache, ReadingCache},
    config::{PRIMARY, SECONDARY},
    error::{ProviderError, WeatherError},
    model::{ReadingSource, SourcedReading},
    provider::{WeatherProvider, provider_from_config},
};

/// A provider paired with the breaker that guards it.
#[derive(Debug, Clone)]
pub struct GuardedProvider {
    provider: Arc<dyn WeatherProvider>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedProvider {
    pub fn new(provider: Arc<dyn WeatherProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { provider, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn fetch(&self, city: &str) -> Result<WeatherReading, BreakerError<ProviderError>> {
        self.breaker.execute(|| self.provider.fetch(city)).await
    }
}

#[derive(Debug, Clone)]
pub struct WeatherOrchestrator {
    primary: GuardedProvider,
    secondary: GuardedProvider,
    cache: Arc<dyn ReadingCache>,
}

impl WeatherOrchestrator {
    pub fn new(
        primary: GuardedProvider,
        secondary: GuardedProvider,
        cache: Arc<dyn ReadingCache>,
    ) -> Self {
        Self { primary, secondary, cache }
    }

    /// Wire providers, breakers and an empty in-memory cache from config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (primary_id, secondary_id) = config.provider_roles()?;

        let primary = GuardedProvider::new(
            Arc::from(
                provider_from_config(primary_id, config)
                    .with_context(|| format!("Failed to set up primary provider '{primary_id}'"))?,
            ),
            Arc::new(
                CircuitBreaker::new(PRIMARY, config.breaker_config(PRIMARY)?)
                    .map_err(|e| anyhow!(e))?,
            ),
        );
        let secondary = GuardedProvider::new(
            Arc::from(provider_from_config(secondary_id, config).with_context(|| {
                format!("Failed to set up secondary provider '{secondary_id}'")
            })?),
            Arc::new(
                CircuitBreaker::new(SECONDARY, config.breaker_config(SECONDARY)?)
                    .map_err(|e| anyhow!(e))?,
            ),
        );

        info!(primary = %primary_id, secondary = %secondary_id, "Weather orchestrator ready");

        Ok(Self::new(primary, secondary, Arc::new(InMemoryCache::new())))
    }

    pub async fn get_weather(&self, city: &str) -> Result<WeatherReading, WeatherError> {
        self.get_weather_with_source(city).await.map(|sourced| sourced.reading)
    }

    pub async fn get_weather_with_source(&self, city: &str) -> Result<SourcedReading, WeatherError> {
        match self.primary.fetch(city).await {
            Ok(reading) => return Ok(self.store(city, reading, ReadingSource::Primary)),
            Err(err) => log_attempt_failure(ReadingSource::Primary, city, &err),
        }

        info!(city, "Falling back to secondary provider");
        match self.secondary.fetch(city).await {
            Ok(reading) => return Ok(self.store(city, reading, ReadingSource::Secondary)),
            Err(err) => log_attempt_failure(ReadingSource::Secondary, city, &err),
        }

        match self.cache.get(city) {
            Some(reading) => {
                warn!(city, ?reading, "Both providers failed, serving cached reading");
                Ok(SourcedReading { reading, source: ReadingSource::Cache })
            }
            None => {
                warn!(city, "All weather providers are down and no cached reading exists");
                Err(WeatherError::AllProvidersUnavailable { city: city.to_string() })
            }
        }
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        vec![self.primary.breaker().snapshot(), self.secondary.breaker().snapshot()]
    }

    fn store(&self, city: &str, reading: WeatherReading, source: ReadingSource) -> SourcedReading {
        self.cache.put(city, reading);
        info!(city, %source, ?reading, "Weather served");
        SourcedReading { reading, source }
    }
}

fn log_attempt_failure(source: ReadingSource, city: &str, err: &BreakerError<ProviderError>) {
    match err {
        BreakerError::CircuitOpen { .. } => {
            info!(city, %source, "Skipped provider, circuit open");
        }
        BreakerError::Failed(err) => {
            warn!(city, %source, provider = %err.provider(), error = %err, "Provider attempt failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitState, FailureThreshold};
    use crate::provider::ProviderId;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CITY: &str = "Sydney";

    /// Returns whatever it is currently told to, counting calls.
    #[derive(Debug)]
    struct StubProvider {
        id: ProviderId,
        reading: Mutex<Option<WeatherReading>>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn ok(id: ProviderId, temperature: f64, wind: f64) -> Arc<Self> {
            Arc::new(Self {
                id,
                reading: Mutex::new(Some(WeatherReading::new(temperature, wind))),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: ProviderId) -> Arc<Self> {
            Arc::new(Self { id, reading: Mutex::new(None), calls: AtomicUsize::new(0) })
        }

        fn set(&self, reading: Option<WeatherReading>) {
            *self.reading.lock() = reading;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for StubProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn fetch(&self, _city: &str) -> Result<WeatherReading, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reading = *self.reading.lock();
            reading.ok_or_else(|| ProviderError::data(self.id, "stubbed failure"))
        }
    }

    struct Harness {
        primary: Arc<StubProvider>,
        secondary: Arc<StubProvider>,
        cache: Arc<InMemoryCache>,
        orchestrator: WeatherOrchestrator,
    }

    fn harness(
        primary: Arc<StubProvider>,
        secondary: Arc<StubProvider>,
        breaker: BreakerConfig,
    ) -> Harness {
        let cache = Arc::new(InMemoryCache::new());
        let orchestrator = WeatherOrchestrator::new(
            GuardedProvider::new(
                primary.clone(),
                Arc::new(CircuitBreaker::new(PRIMARY, breaker.clone()).unwrap()),
            ),
            GuardedProvider::new(secondary.clone(), Arc::new(CircuitBreaker::new(SECONDARY, breaker).unwrap())),
            cache.clone(),
        );
        Harness { primary, secondary, cache, orchestrator }
    }

    fn lenient() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: FailureThreshold::Count(100),
            sliding_window_size: 100,
            open_cooldown: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn primary_success_returns_primary_reading() {
        let h = harness(
            StubProvider::ok(ProviderId::WeatherStack, 25.0, 10.0),
            StubProvider::ok(ProviderId::OpenWeather, 20.0, 5.0),
            lenient(),
        );

        let sourced = h.orchestrator.get_weather_with_source(CITY).await.unwrap();

        assert_eq!(sourced.reading, WeatherReading::new(25.0, 10.0));
        assert_eq!(sourced.source, ReadingSource::Primary);
        assert_eq!(h.primary.calls(), 1);
        assert_eq!(h.secondary.calls(), 0);
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(25.0, 10.0)));
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_secondary_and_caches_it() {
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::ok(ProviderId::OpenWeather, 20.0, 5.0),
            lenient(),
        );

        let sourced = h.orchestrator.get_weather_with_source(CITY).await.unwrap();

        assert_eq!(sourced.reading, WeatherReading::new(20.0, 5.0));
        assert_eq!(sourced.source, ReadingSource::Secondary);
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(20.0, 5.0)));
    }

    #[tokio::test]
    async fn both_failing_serves_cached_reading_unchanged() {
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );
        h.cache.put(CITY, WeatherReading::new(15.0, 3.0));

        let sourced = h.orchestrator.get_weather_with_source(CITY).await.unwrap();

        assert_eq!(sourced.reading, WeatherReading::new(15.0, 3.0));
        assert_eq!(sourced.source, ReadingSource::Cache);
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(15.0, 3.0)));
        assert_eq!(h.primary.calls(), 1);
        assert_eq!(h.secondary.calls(), 1);
    }

    #[tokio::test]
    async fn both_failing_without_cache_is_all_providers_unavailable() {
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );

        let err = h.orchestrator.get_weather(CITY).await.unwrap_err();

        match &err {
            WeatherError::AllProvidersUnavailable { city } => assert_eq!(city, CITY),
        }
        assert_eq!(err.to_string(), "All weather providers are down");
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn live_data_wins_over_cached_data() {
        let h = harness(
            StubProvider::ok(ProviderId::WeatherStack, 25.0, 10.0),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );
        h.cache.put(CITY, WeatherReading::new(15.0, 3.0));

        let reading = h.orchestrator.get_weather(CITY).await.unwrap();

        assert_eq!(reading, WeatherReading::new(25.0, 10.0));
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(25.0, 10.0)));
    }

    #[tokio::test]
    async fn stale_entry_survives_repeated_outages() {
        let h = harness(
            StubProvider::ok(ProviderId::WeatherStack, 25.0, 10.0),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );
        h.orchestrator.get_weather(CITY).await.unwrap();

        h.primary.set(None);
        for _ in 0..3 {
            let sourced = h.orchestrator.get_weather_with_source(CITY).await.unwrap();
            assert_eq!(sourced.source, ReadingSource::Cache);
            assert_eq!(sourced.reading, WeatherReading::new(25.0, 10.0));
        }

        h.primary.set(Some(WeatherReading::new(30.0, 12.0)));
        let fresh = h.orchestrator.get_weather(CITY).await.unwrap();
        assert_eq!(fresh, WeatherReading::new(30.0, 12.0));
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(30.0, 12.0)));
    }

    #[tokio::test]
    async fn open_primary_breaker_skips_primary_but_still_tries_secondary() {
        let tripping = BreakerConfig {
            failure_threshold: FailureThreshold::Count(2),
            sliding_window_size: 2,
            open_cooldown: Duration::from_secs(60),
        };
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::ok(ProviderId::OpenWeather, 20.0, 5.0),
            tripping,
        );

        h.orchestrator.get_weather(CITY).await.unwrap();
        h.orchestrator.get_weather(CITY).await.unwrap();
        assert_eq!(h.primary.calls(), 2);

        let sourced = h.orchestrator.get_weather_with_source(CITY).await.unwrap();

        assert_eq!(sourced.source, ReadingSource::Secondary);
        assert_eq!(h.primary.calls(), 2, "open breaker must not invoke the provider");
        assert_eq!(h.secondary.calls(), 3);

        let snapshots = h.orchestrator.breaker_snapshots();
        assert_eq!(snapshots[0].name, PRIMARY);
        assert_eq!(snapshots[0].state, CircuitState::Open);
        assert_eq!(snapshots[1].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn both_breakers_open_falls_through_to_cache() {
        let tripping = BreakerConfig {
            failure_threshold: FailureThreshold::Count(1),
            sliding_window_size: 1,
            open_cooldown: Duration::from_secs(60),
        };
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::failing(ProviderId::OpenWeather),
            tripping,
        );
        h.cache.put(CITY, WeatherReading::new(15.0, 3.0));

        h.orchestrator.get_weather(CITY).await.unwrap();
        let reading = h.orchestrator.get_weather(CITY).await.unwrap();

        assert_eq!(reading, WeatherReading::new(15.0, 3.0));
        assert_eq!(h.primary.calls(), 1);
        assert_eq!(h.secondary.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_identical_successes_leave_cache_unchanged() {
        let h = harness(
            StubProvider::ok(ProviderId::WeatherStack, 25.0, 10.0),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );

        for _ in 0..3 {
            h.orchestrator.get_weather(CITY).await.unwrap();
        }

        assert_eq!(h.cache.len(), 1);
        assert_eq!(h.cache.get(CITY), Some(WeatherReading::new(25.0, 10.0)));
    }

    #[tokio::test]
    async fn cache_fallback_is_per_city() {
        let h = harness(
            StubProvider::failing(ProviderId::WeatherStack),
            StubProvider::failing(ProviderId::OpenWeather),
            lenient(),
        );
        h.cache.put("Perth", WeatherReading::new(30.0, 20.0));

        assert!(h.orchestrator.get_weather(CITY).await.is_err());
        assert!(h.orchestrator.get_weather("perth").await.is_err());
        assert!(h.orchestrator.get_weather("Perth").await.is_ok());
    }
}
