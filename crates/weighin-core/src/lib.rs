//! Reconciliation engine for weighin.
//!
//! This crate keeps a local store of weight and energy samples identical to
//! what the upstream sources currently report, and keeps the long-lived
//! provider credential rotated safely.
//!
//! # Features
//!
//! - **Reconciliation**: diff a fetched set against the stored set for a
//!   scope and apply the minimal deletes and upserts ([`Reconciler`])
//! - **Range backfill**: split a date range into calendar months and
//!   reconcile them concurrently ([`partition`], [`WeightSync::sync_range`])
//! - **Webhook sync**: re-fetch and reconcile each day named by a
//!   notification ([`WeightSync::sync_notifications`])
//! - **Energy ingestion**: validate and store health-metrics payloads
//!   ([`EnergySync`])
//! - **Credential rotation**: write-then-destroy rotation over a versioned
//!   secret store ([`CredentialVault`])
//! - **Fitbit client**: weight log fetches with token refresh and retries
//!   ([`FitbitClient`])
//!
//! Every step is idempotent. After any failure, re-running the same scope
//! converges to the state an uninterrupted run would have produced.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use weighin_core::{CredentialVault, FitbitClient, FitbitConfig, SqliteBackend, WeightSync};
//! use time::macros::date;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(SqliteBackend::open("weighin.db")?);
//!     let vault = Arc::new(CredentialVault::new(backend.clone(), "fitbit-token"));
//!     let provider = Arc::new(FitbitClient::new(FitbitConfig::new("id", "secret"), vault)?);
//!
//!     let sync = WeightSync::new(provider, backend);
//!     let written = sync.sync_range(date!(2024 - 01 - 01), date!(2024 - 06 - 30)).await?;
//!     println!("{} weights loaded", written);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fitbit;
pub mod mock;
pub mod partition;
pub mod reconcile;
pub mod retry;
pub mod rotation;
pub mod sqlite;
pub mod sync;
pub mod token;
pub mod traits;

pub use error::{Error, Result};
pub use fitbit::{FitbitClient, FitbitConfig};
pub use partition::{end_of_month, partition};
pub use reconcile::{Delta, ReconcileMode, Reconciler};
pub use retry::{RetryConfig, with_retry};
pub use rotation::CredentialVault;
pub use sqlite::SqliteBackend;
pub use sync::{EnergySync, WeightSync};
pub use token::{OAuthToken, TokenResponse};
pub use traits::{RecordStore, SecretStore, SecretVersion, WeightProvider};

// Re-export from weighin-types
pub use weighin_types::{
    DateRange, EnergyKind, EnergySample, Granularity, Notification, TimezonePolicy,
    WeightSample,
};
