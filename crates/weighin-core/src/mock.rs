//! In-memory collaborators for testing.
//!
//! [`MemoryStore`], [`MockProvider`] and [`MemorySecretStore`] implement the
//! collaborator traits without SQLite or network access.
//!
//! # Features
//!
//! - **Failure injection**: fail after N successful writes, fail specific
//!   fetches, fail destroys of specific secret versions
//! - **Call counting**: observe how many operations reached the collaborator
//! - **Latency simulation**: delay provider fetches to exercise concurrency

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::Date;
use tokio::sync::RwLock;

use weighin_types::{Record, WeightObservation, format_date, parse_date};

use crate::error::{Error, Result};
use crate::traits::{RecordStore, SecretStore, SecretVersion, WeightProvider};

/// An in-memory record store.
///
/// `put` replaces every stored record with the same identity. Records seeded
/// through [`with_records`](Self::with_records) are kept verbatim, duplicates
/// included.
///
/// ```
/// use weighin_core::mock::MemoryStore;
/// use weighin_core::RecordStore;
/// use weighin_types::{WeightSample, WeightScope};
/// use time::macros::{date, datetime, time};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store: MemoryStore<WeightSample> = MemoryStore::new();
/// let sample = WeightSample {
///     log_id: 1,
///     date: date!(2024 - 01 - 15),
///     time: time!(07:00),
///     weight: 80.0,
///     measured_at: datetime!(2024-01-15 07:00 UTC),
/// };
/// store.put(&sample).await.unwrap();
/// store.put(&sample).await.unwrap();
///
/// let day = store.get_by_scope(&WeightScope::Day(date!(2024 - 01 - 15))).await.unwrap();
/// assert_eq!(day.len(), 1);
/// # }
/// ```
pub struct MemoryStore<R: Record> {
    records: RwLock<Vec<R>>,
    put_count: AtomicU32,
    delete_count: AtomicU32,
    /// Remaining successful puts before failing (u32::MAX = never fail).
    puts_before_failure: AtomicU32,
    fail_deletes: AtomicBool,
    fail_reads: AtomicBool,
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> std::fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("put_count", &self.put_count.load(Ordering::Relaxed))
            .field("delete_count", &self.delete_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R: Record> MemoryStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Create a store holding `records` as-is.
    pub fn with_records(records: Vec<R>) -> Self {
        Self {
            records: RwLock::new(records),
            put_count: AtomicU32::new(0),
            delete_count: AtomicU32::new(0),
            puts_before_failure: AtomicU32::new(u32::MAX),
            fail_deletes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Snapshot of every stored record, in storage order.
    pub async fn records(&self) -> Vec<R> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Number of successful puts.
    pub fn put_count(&self) -> u32 {
        self.put_count.load(Ordering::Relaxed)
    }

    /// Number of successful deletes.
    pub fn delete_count(&self) -> u32 {
        self.delete_count.load(Ordering::Relaxed)
    }

    /// Allow `n` more puts, then fail every put.
    pub fn set_fail_puts_after(&self, n: u32) {
        self.puts_before_failure.store(n, Ordering::Relaxed);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Turn off every injected failure.
    pub fn clear_failures(&self) {
        self.set_fail_puts_after(u32::MAX);
        self.set_fail_deletes(false);
        self.set_fail_reads(false);
    }

    fn check_put(&self) -> Result<()> {
        let remaining = self.puts_before_failure.load(Ordering::Relaxed);
        if remaining == 0 {
            return Err(Error::storage("Mock put failure"));
        }
        if remaining != u32::MAX {
            self.puts_before_failure.store(remaining - 1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for MemoryStore<R> {
    async fn get_by_scope(&self, scope: &R::Scope) -> Result<Vec<R>> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::storage("Mock read failure"));
        }
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.in_scope(scope)).cloned().collect())
    }

    async fn put(&self, record: &R) -> Result<()> {
        self.check_put()?;
        let identity = record.identity();
        let mut records = self.records.write().await;
        records.retain(|r| r.identity() != identity);
        records.push(record.clone());
        self.put_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, identity: &R::Identity) -> Result<()> {
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(Error::storage("Mock delete failure"));
        }
        self.records.write().await.retain(|r| r.identity() != *identity);
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A mock weight provider serving a fixed set of observations.
///
/// Range fetches enforce the single-month rule of the real provider.
#[derive(Debug, Default)]
pub struct MockProvider {
    observations: RwLock<Vec<WeightObservation>>,
    /// Fetches whose first day is listed here fail.
    failing_days: RwLock<HashSet<Date>>,
    should_fail: AtomicBool,
    fetch_count: AtomicU32,
    latency_ms: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider serving `observations`.
    pub fn with_observations(observations: Vec<WeightObservation>) -> Self {
        Self {
            observations: RwLock::new(observations),
            ..Self::default()
        }
    }

    /// Replace the served observations.
    pub async fn set_observations(&self, observations: Vec<WeightObservation>) {
        *self.observations.write().await = observations;
    }

    /// Fail any fetch starting on `day`.
    pub async fn fail_fetches_starting(&self, day: Date) {
        self.failing_days.write().await.insert(day);
    }

    /// Fail every fetch.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of fetches made, failed ones included.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    async fn fetch(&self, start: Date, end: Date) -> Result<Vec<WeightObservation>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.should_fail.load(Ordering::Relaxed) || self.failing_days.read().await.contains(&start)
        {
            return Err(Error::provider(format!(
                "Mock fetch failure for {}",
                format_date(start)
            )));
        }

        let observations = self.observations.read().await;
        Ok(observations
            .iter()
            .filter(|o| parse_date(&o.date).is_ok_and(|d| start <= d && d <= end))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WeightProvider for MockProvider {
    async fn fetch_day(&self, date: Date) -> Result<Vec<WeightObservation>> {
        self.fetch(date, date).await
    }

    async fn fetch_range(&self, start: Date, end: Date) -> Result<Vec<WeightObservation>> {
        if start.year() != end.year() || start.month() != end.month() {
            return Err(Error::CrossMonthRange {
                start: format_date(start),
                end: format_date(end),
            });
        }
        self.fetch(start, end).await
    }
}

#[derive(Debug, Clone)]
struct MemoryVersion {
    /// `None` once destroyed.
    payload: Option<Vec<u8>>,
}

/// An in-memory versioned secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<BTreeMap<String, BTreeMap<i64, MemoryVersion>>>,
    fail_adds: AtomicBool,
    fail_lists: AtomicBool,
    failing_destroys: RwLock<HashSet<i64>>,
    destroy_count: AtomicU32,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::Relaxed);
    }

    /// Make destroying `version` fail.
    pub async fn fail_destroy_of(&self, version: i64) {
        self.failing_destroys.write().await.insert(version);
    }

    /// Number of successful destroys.
    pub fn destroy_count(&self) -> u32 {
        self.destroy_count.load(Ordering::Relaxed)
    }

    /// Versions of `name` that have not been destroyed.
    pub async fn live_versions(&self, name: &str) -> Vec<i64> {
        self.secrets
            .read()
            .await
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|(_, v)| v.payload.is_some())
                    .map(|(n, _)| *n)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn latest_version(&self, name: &str) -> Result<Option<SecretVersion>> {
        let secrets = self.secrets.read().await;
        Ok(secrets.get(name).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find_map(|(version, v)| {
                    v.payload.as_ref().map(|payload| SecretVersion {
                        version: *version,
                        payload: payload.clone(),
                    })
                })
        }))
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<i64> {
        if self.fail_adds.load(Ordering::Relaxed) {
            return Err(Error::secret("Mock add failure"));
        }
        let mut secrets = self.secrets.write().await;
        let versions = secrets.entry(name.to_string()).or_default();
        let next = versions.keys().next_back().map_or(1, |last| last + 1);
        versions.insert(
            next,
            MemoryVersion {
                payload: Some(payload.to_vec()),
            },
        );
        Ok(next)
    }

    async fn list_versions(&self, name: &str, include_destroyed: bool) -> Result<Vec<i64>> {
        if self.fail_lists.load(Ordering::Relaxed) {
            return Err(Error::secret("Mock list failure"));
        }
        let secrets = self.secrets.read().await;
        Ok(secrets
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|(_, v)| include_destroyed || v.payload.is_some())
                    .map(|(n, _)| *n)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn destroy_version(&self, name: &str, version: i64) -> Result<()> {
        if self.failing_destroys.read().await.contains(&version) {
            return Err(Error::secret(format!("Mock destroy failure for version {}", version)));
        }
        let mut secrets = self.secrets.write().await;
        let entry = secrets
            .get_mut(name)
            .and_then(|versions| versions.get_mut(&version))
            .ok_or_else(|| Error::secret(format!("{}/{} not found", name, version)))?;
        entry.payload = None;
        self.destroy_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
