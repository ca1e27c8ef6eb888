use crate::provider::ProviderId;

/// Failure of a single provider call. Every variant is recorded by the
/// provider's circuit breaker and moves the request to the next layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The remote call could not be completed (connect, timeout, body read).
    #[error("{provider}: request failed: {source}")]
    Transport {
        provider: ProviderId,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered, but with an error or an unusable payload.
    #[error("{provider}: {reason}")]
    Data { provider: ProviderId, reason: String },
}

impl ProviderError {
    pub fn data(provider: ProviderId, reason: impl Into<String>) -> Self {
        ProviderError::Data { provider, reason: reason.into() }
    }

    pub fn transport(provider: ProviderId) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| ProviderError::Transport { provider, source }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::Transport { provider, .. } | ProviderError::Data { provider, .. } => {
                *provider
            }
        }
    }
}

/// Terminal failure of the fallback chain.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("All weather providers are down")]
    AllProvidersUnavailable { city: String },
}
