//! Application state shared across handlers.
//!
//! The SQLite backend is opened once at startup. The Fitbit client is built
//! lazily on the first request that needs it; concurrent first requests
//! share a single initialization.

use std::sync::Arc;

use tokio::sync::OnceCell;

use weighin_core::{
    CredentialVault, EnergySync, FitbitClient, SqliteBackend, WeightProvider, WeightSync,
};
use weighin_types::{ParseError, TimezonePolicy};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Configuration as loaded at startup.
    pub config: Config,
    /// SQLite-backed record and secret stores.
    pub backend: Arc<SqliteBackend>,
    /// The versioned OAuth token.
    pub vault: Arc<CredentialVault>,
    /// Energy ingestion over `backend`.
    pub energy: EnergySync,
    /// Timezone applied to weight timestamps.
    pub timezone: TimezonePolicy,
    provider: OnceCell<Arc<dyn WeightProvider>>,
}

impl AppState {
    /// Create new application state.
    ///
    /// Fails only if the configured UTC offset cannot be parsed.
    pub fn new(config: Config, backend: Arc<SqliteBackend>) -> Result<Arc<Self>, ParseError> {
        Ok(Arc::new(Self::build(config, backend)?))
    }

    /// Create state with an already constructed weight provider.
    pub fn with_provider(
        config: Config,
        backend: Arc<SqliteBackend>,
        provider: Arc<dyn WeightProvider>,
    ) -> Result<Arc<Self>, ParseError> {
        let state = Self::build(config, backend)?;
        let _ = state.provider.set(provider);
        Ok(Arc::new(state))
    }

    fn build(config: Config, backend: Arc<SqliteBackend>) -> Result<Self, ParseError> {
        let timezone = config.fitbit.timezone()?;
        let vault = Arc::new(CredentialVault::new(
            backend.clone(),
            config.secrets.token_name.clone(),
        ));
        Ok(Self {
            energy: EnergySync::new(backend.clone()),
            config,
            backend,
            vault,
            timezone,
            provider: OnceCell::new(),
        })
    }

    /// The weight provider, built on first use.
    pub async fn provider(&self) -> weighin_core::Result<Arc<dyn WeightProvider>> {
        let provider = self
            .provider
            .get_or_try_init(|| async {
                if !self.config.fitbit.has_credentials() {
                    return Err(weighin_core::Error::provider(
                        "Fitbit client credentials are not configured",
                    ));
                }
                let config = self.config.fitbit.client_config(self.config.sync.retries);
                let client = FitbitClient::new(config, self.vault.clone())?;
                tracing::info!("Fitbit client initialized for {}", self.config.fitbit.api_base);
                Ok(Arc::new(client) as Arc<dyn WeightProvider>)
            })
            .await?;
        Ok(provider.clone())
    }

    /// A weight sync over the provider and the SQLite backend.
    pub async fn weight_sync(&self) -> weighin_core::Result<WeightSync> {
        let provider = self.provider().await?;
        Ok(WeightSync::new(provider, self.backend.clone())
            .with_policy(self.timezone)
            .with_max_concurrent(self.config.sync.max_concurrent_ranges))
    }
}
