//! SQLite-backed implementations of the collaborator traits.
//!
//! A single [`SqliteBackend`] serves weights, energy and secrets from one
//! database file. The synchronous [`Store`] sits behind an async mutex, so
//! every trait call holds the connection for the duration of one statement
//! or one batch transaction.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use weighin_store::Store;
use weighin_types::{
    EnergyIdentity, EnergySample, EnergyScope, EnergyWindow, WeightSample, WeightScope,
};

use crate::error::Result;
use crate::traits::{RecordStore, SecretStore, SecretVersion};

/// Record and secret storage over one SQLite database.
pub struct SqliteBackend {
    store: Mutex<Store>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Direct access to the store, for queries outside the traits.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }
}

#[async_trait]
impl RecordStore<WeightSample> for SqliteBackend {
    async fn get_by_scope(&self, scope: &WeightScope) -> Result<Vec<WeightSample>> {
        let (start, end) = scope.bounds();
        let rows = self.store.lock().await.weights_between(start, end)?;
        let samples = rows
            .iter()
            .map(|row| row.to_sample())
            .collect::<weighin_store::Result<Vec<_>>>()?;
        Ok(samples)
    }

    async fn put(&self, record: &WeightSample) -> Result<()> {
        self.store.lock().await.upsert_weight(record)?;
        Ok(())
    }

    async fn delete(&self, identity: &i64) -> Result<()> {
        self.store.lock().await.delete_weight(*identity)?;
        Ok(())
    }

    async fn put_many(&self, records: &[WeightSample]) -> Result<()> {
        self.store.lock().await.upsert_weights(records)?;
        Ok(())
    }

    async fn delete_many(&self, identities: &[i64]) -> Result<()> {
        self.store.lock().await.delete_weights(identities)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore<EnergySample> for SqliteBackend {
    async fn get_by_scope(&self, scope: &EnergyScope) -> Result<Vec<EnergySample>> {
        let store = self.store.lock().await;
        let rows = match scope.window {
            EnergyWindow::Day(day) => store.energy_for_day(scope.kind, scope.granularity, day)?,
            EnergyWindow::Between { start, end } => {
                store.energy_between(scope.kind, scope.granularity, start, end)?
            }
        };
        // The day column and the sample's own offset agree, but filter on
        // the scope anyway so a row never leaks across scopes.
        Ok(rows
            .iter()
            .map(|row| row.to_sample())
            .filter(|sample| scope.contains(sample))
            .collect())
    }

    async fn put(&self, record: &EnergySample) -> Result<()> {
        self.store.lock().await.upsert_energy(record)?;
        Ok(())
    }

    async fn delete(&self, identity: &EnergyIdentity) -> Result<()> {
        self.store.lock().await.delete_energy_identity(identity)?;
        Ok(())
    }

    async fn put_many(&self, records: &[EnergySample]) -> Result<()> {
        self.store.lock().await.upsert_energy_many(records)?;
        Ok(())
    }

    async fn delete_many(&self, identities: &[EnergyIdentity]) -> Result<()> {
        self.store.lock().await.delete_energy_identities(identities)?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for SqliteBackend {
    async fn latest_version(&self, name: &str) -> Result<Option<SecretVersion>> {
        let secret = self.store.lock().await.latest_secret_version(name)?;
        Ok(secret.map(|s| SecretVersion {
            version: s.version,
            payload: s.payload,
        }))
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<i64> {
        Ok(self.store.lock().await.add_secret_version(name, payload)?)
    }

    async fn list_versions(&self, name: &str, include_destroyed: bool) -> Result<Vec<i64>> {
        let versions = self
            .store
            .lock()
            .await
            .list_secret_versions(name, include_destroyed)?;
        Ok(versions.into_iter().map(|v| v.version).collect())
    }

    async fn destroy_version(&self, name: &str, version: i64) -> Result<()> {
        self.store.lock().await.destroy_secret_version(name, version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{ReconcileMode, Reconciler};
    use crate::rotation::CredentialVault;
    use std::sync::Arc;
    use time::macros::{date, datetime, time};
    use weighin_types::{EnergyKind, Granularity};

    fn weight(log_id: i64) -> WeightSample {
        WeightSample {
            log_id,
            date: date!(2024 - 01 - 15),
            time: time!(07:30),
            weight: 80.5,
            measured_at: datetime!(2024-01-15 07:30 UTC),
        }
    }

    fn active(kj: f64) -> EnergySample {
        EnergySample {
            kind: EnergyKind::Active,
            granularity: Granularity::Daily,
            kilojoules: kj,
            measured_at: datetime!(2024-05-01 00:00 +10),
        }
    }

    #[tokio::test]
    async fn test_weight_redelivery_leaves_one_row() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let scope = WeightScope::Day(date!(2024 - 01 - 15));
        let reconciler = Reconciler::new(ReconcileMode::Additive);

        reconciler.reconcile(&backend, &scope, &[weight(12345)]).await.unwrap();
        reconciler.reconcile(&backend, &scope, &[weight(12345)]).await.unwrap();

        let stored: Vec<WeightSample> = backend.get_by_scope(&scope).await.unwrap();
        assert_eq!(stored, vec![weight(12345)]);
        assert_eq!(backend.lock().await.count_weights().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_daily_energy_overwrite() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.lock().await.insert_energy(&active(500.0)).unwrap();
        backend.lock().await.insert_energy(&active(500.0)).unwrap();

        let scope = EnergyScope::daily(EnergyKind::Active, date!(2024 - 05 - 01));
        Reconciler::new(ReconcileMode::Exclusive)
            .reconcile(&backend, &scope, &[active(650.0)])
            .await
            .unwrap();

        let stored: Vec<EnergySample> = backend.get_by_scope(&scope).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kilojoules, 650.0);
    }

    #[tokio::test]
    async fn test_rotation_over_sqlite() {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let vault = CredentialVault::new(backend.clone(), "fitbit-token");

        vault.rotate(b"one").await.unwrap();
        vault.rotate(b"two").await.unwrap();

        assert_eq!(vault.get().await.unwrap(), b"two");
        assert_eq!(backend.list_versions("fitbit-token", false).await.unwrap(), vec![2]);
        assert_eq!(
            backend.list_versions("fitbit-token", true).await.unwrap(),
            vec![1, 2]
        );
    }
}
