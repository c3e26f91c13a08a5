//! HTTP client for the Fitbit body-weight API.
//!
//! The client reads its OAuth token from a [`CredentialVault`] on first use
//! and keeps it in memory afterwards. When the API rejects the access token
//! (HTTP 401), or the token is known to be expired, it is refreshed through
//! the token endpoint, the refreshed token is rotated into the vault, and
//! the request is retried once. Concurrent requests that hit a 401 together
//! refresh only once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weighin_core::{CredentialVault, FitbitClient, FitbitConfig, WeightProvider};
//! use weighin_core::mock::MemorySecretStore;
//! use time::macros::date;
//!
//! # async fn example() -> Result<(), weighin_core::Error> {
//! let vault = Arc::new(CredentialVault::new(Arc::new(MemorySecretStore::new()), "fitbit-token"));
//! let config = FitbitConfig::new("client-id", "client-secret");
//! let client = FitbitClient::new(config, vault)?;
//!
//! let logs = client.fetch_day(date!(2024 - 01 - 15)).await?;
//! println!("{} weight logs", logs.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use time::{Date, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use weighin_types::{WeightLogResponse, WeightObservation, format_date};

use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::rotation::CredentialVault;
use crate::token::{OAuthToken, TokenResponse};
use crate::traits::WeightProvider;

/// Production API host.
pub const DEFAULT_API_BASE: &str = "https://api.fitbit.com";

/// Production OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// Connection settings for [`FitbitClient`].
#[derive(Clone)]
pub struct FitbitConfig {
    /// API host, without trailing slash.
    pub api_base: String,
    /// OAuth token endpoint used for refreshes.
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl std::fmt::Debug for FitbitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitbitConfig")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl FitbitConfig {
    /// Production endpoints with the given OAuth client credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Point the client at another API host (and its `/oauth2/token`).
    #[must_use]
    pub fn api_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = base.to_string();
        self.token_url = format!("{}/oauth2/token", base);
        self
    }

    #[must_use]
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Weight provider backed by the Fitbit Web API.
pub struct FitbitClient {
    http: Client,
    config: FitbitConfig,
    vault: Arc<CredentialVault>,
    token: RwLock<Option<OAuthToken>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for FitbitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitbitClient")
            .field("config", &self.config)
            .field("vault", &self.vault)
            .finish()
    }
}

impl FitbitClient {
    /// Create a client with its own connection pool.
    pub fn new(config: FitbitConfig, vault: Arc<CredentialVault>) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(http, config, vault))
    }

    /// Create a client sharing an existing reqwest `Client`.
    pub fn with_client(http: Client, config: FitbitConfig, vault: Arc<CredentialVault>) -> Self {
        Self {
            http,
            config,
            vault,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &FitbitConfig {
        &self.config
    }

    /// The in-memory token, loading it from the vault on first use.
    async fn current_token(&self) -> Result<OAuthToken> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.clone() {
            return Ok(token);
        }
        let token = self.vault.get_token().await?;
        debug!("Loaded provider token from {}", self.vault.name());
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a working token.
    ///
    /// If another task already replaced `stale` while this one waited for
    /// the refresh lock, its token is returned without a second refresh.
    /// A newer token in the vault (for example one imported while the
    /// service runs) is adopted the same way. Otherwise the vault's refresh
    /// token is exchanged at the token endpoint.
    async fn refresh(&self, stale: &OAuthToken) -> Result<OAuthToken> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.token.read().await.clone();
        if let Some(current) = current
            && current.access_token != stale.access_token
        {
            debug!("Token already refreshed by a concurrent request");
            return Ok(current);
        }

        let stored = self.vault.get_token().await?;
        if stored.access_token != stale.access_token {
            info!("Adopting newer token from {}", self.vault.name());
            *self.token.write().await = Some(stored.clone());
            return Ok(stored);
        }
        let stale = &stored;

        info!("Refreshing provider access token");
        let issued_at = OffsetDateTime::now_utc();
        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", stale.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Token refresh rejected with HTTP {}", status.as_u16());
            return Err(Error::ProviderStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = body.into_token(issued_at, stale);

        // The old refresh token is spent now, so keep the new one in memory
        // even if persisting it fails.
        *self.token.write().await = Some(token.clone());

        match self.vault.rotate_token(&token).await {
            Ok(version) => info!("Refreshed token stored as version {}", version),
            Err(e @ Error::CleanupIncomplete { .. }) => {
                warn!("Refreshed token stored, old versions remain: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(token)
    }

    /// GET a weight log endpoint with the given token, retrying transient failures.
    async fn send(&self, url: &str, token: &OAuthToken) -> Result<Vec<WeightObservation>> {
        let access_token = token.access_token.as_str();
        with_retry(&self.config.retry, url, move || async move {
            let response = self.http.get(url).bearer_auth(access_token).send().await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthorized);
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::ProviderStatus {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: WeightLogResponse = response.json().await?;
            Ok(body.weight)
        })
        .await
    }

    /// GET with token refresh on expiry or 401.
    async fn get_weights(&self, url: &str) -> Result<Vec<WeightObservation>> {
        let mut token = self.current_token().await?;
        if token.is_expired() {
            debug!("Access token expired, refreshing before request");
            token = self.refresh(&token).await?;
        }

        match self.send(url, &token).await {
            Err(Error::Unauthorized) => {
                debug!("Access token rejected, refreshing");
                let token = self.refresh(&token).await?;
                self.send(url, &token).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl WeightProvider for FitbitClient {
    async fn fetch_day(&self, date: Date) -> Result<Vec<WeightObservation>> {
        let url = format!(
            "{}/1/user/-/body/log/weight/date/{}.json",
            self.config.api_base,
            format_date(date)
        );
        let weights = self.get_weights(&url).await?;
        debug!("Fetched {} weight logs for {}", weights.len(), format_date(date));
        Ok(weights)
    }

    async fn fetch_range(&self, start: Date, end: Date) -> Result<Vec<WeightObservation>> {
        if start.year() != end.year() || start.month() != end.month() || start > end {
            return Err(Error::CrossMonthRange {
                start: format_date(start),
                end: format_date(end),
            });
        }

        let url = format!(
            "{}/1/user/-/body/log/weight/date/{}/{}.json",
            self.config.api_base,
            format_date(start),
            format_date(end)
        );
        let weights = self.get_weights(&url).await?;
        debug!(
            "Fetched {} weight logs for {}..{}",
            weights.len(),
            format_date(start),
            format_date(end)
        );
        Ok(weights)
    }
}
