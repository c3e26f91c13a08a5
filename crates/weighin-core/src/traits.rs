//! Collaborator interfaces used by the reconciliation engine.
//!
//! The engine never talks to SQLite, the secret store, or the provider API
//! directly. It goes through these traits, which are implemented by
//! [`SqliteBackend`](crate::SqliteBackend), [`FitbitClient`](crate::FitbitClient),
//! and the in-memory mocks in [`mock`](crate::mock).

use async_trait::async_trait;
use time::Date;

use weighin_types::{Record, WeightObservation};

use crate::error::Result;

/// Persistence for one record kind.
///
/// `put` is an upsert keyed by the record's identity, so writing a record
/// that is already present replaces it rather than duplicating it.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// All persisted records belonging to `scope`.
    async fn get_by_scope(&self, scope: &R::Scope) -> Result<Vec<R>>;

    /// Insert or replace the record with this identity.
    async fn put(&self, record: &R) -> Result<()>;

    /// Remove every record carrying `identity`. Removing an absent identity succeeds.
    async fn delete(&self, identity: &R::Identity) -> Result<()>;

    /// Upsert several records, stopping at the first failure.
    async fn put_many(&self, records: &[R]) -> Result<()> {
        for record in records {
            self.put(record).await?;
        }
        Ok(())
    }

    /// Delete several identities, stopping at the first failure.
    async fn delete_many(&self, identities: &[R::Identity]) -> Result<()> {
        for identity in identities {
            self.delete(identity).await?;
        }
        Ok(())
    }
}

/// Source of truth for weight observations.
#[async_trait]
pub trait WeightProvider: Send + Sync {
    /// Every observation logged on `date`.
    async fn fetch_day(&self, date: Date) -> Result<Vec<WeightObservation>>;

    /// Every observation logged within `start..=end`.
    ///
    /// Both ends must fall in the same calendar month; implementations
    /// return [`Error::CrossMonthRange`](crate::Error::CrossMonthRange) otherwise.
    async fn fetch_range(&self, start: Date, end: Date) -> Result<Vec<WeightObservation>>;
}

/// A readable version of a named secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretVersion {
    pub version: i64,
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for SecretVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVersion")
            .field("version", &self.version)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// Versioned secret storage.
///
/// Versions are numbered per name, increase monotonically, and are never
/// reused. A destroyed version is never readable again.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The highest-numbered version that has not been destroyed.
    async fn latest_version(&self, name: &str) -> Result<Option<SecretVersion>>;

    /// Store `payload` as a new version and return its number.
    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<i64>;

    /// Version numbers in ascending order.
    async fn list_versions(&self, name: &str, include_destroyed: bool) -> Result<Vec<i64>>;

    /// Destroy one version.
    async fn destroy_version(&self, name: &str, version: i64) -> Result<()>;
}
