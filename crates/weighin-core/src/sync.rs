//! Sync entry points: webhook days, range backfills and energy ingestion.
//!
//! [`WeightSync`] turns provider observations into weight samples and
//! reconciles them per day or per calendar month. A range backfill is
//! partitioned into months, which are reconciled concurrently since they
//! touch disjoint storage keys. Each month task returns its own count; the
//! coordinator sums the counts it has seen and stops at the first error.
//!
//! [`EnergySync`] ingests health-metrics payloads. The whole payload is
//! validated before anything is written.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use time::Date;
use tracing::{debug, info, warn};

use weighin_types::{
    DateRange, EnergyKind, EnergySample, EnergyScope, Granularity, HealthMetricsPayload,
    Notification, Record, TimezonePolicy, WeightObservation, WeightSample, WeightScope, format_date,
    parse_energy,
};

use crate::error::{Error, Result};
use crate::partition::partition;
use crate::reconcile::{ReconcileMode, Reconciler};
use crate::traits::{RecordStore, WeightProvider};

/// Default number of months reconciled at once during a backfill.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Weight sync over a provider and a record store.
pub struct WeightSync {
    provider: Arc<dyn WeightProvider>,
    store: Arc<dyn RecordStore<WeightSample>>,
    policy: TimezonePolicy,
    max_concurrent: usize,
    reconciler: Reconciler<WeightSample>,
}

impl std::fmt::Debug for WeightSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightSync")
            .field("policy", &self.policy)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl WeightSync {
    pub fn new(
        provider: Arc<dyn WeightProvider>,
        store: Arc<dyn RecordStore<WeightSample>>,
    ) -> Self {
        Self {
            provider,
            store,
            policy: TimezonePolicy::UTC,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            reconciler: Reconciler::new(ReconcileMode::Additive),
        }
    }

    /// Set the timezone used to resolve measurement timestamps.
    #[must_use]
    pub fn with_policy(mut self, policy: TimezonePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound the number of months reconciled at once (at least one).
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn policy(&self) -> TimezonePolicy {
        self.policy
    }

    /// Turn provider observations for `scope` into samples.
    ///
    /// Malformed or out-of-scope observations are the provider's fault, so
    /// they surface as upstream errors rather than validation errors.
    fn normalize(
        &self,
        observations: &[WeightObservation],
        scope: &WeightScope,
    ) -> Result<Vec<WeightSample>> {
        let mut samples = Vec::with_capacity(observations.len());
        for observation in observations {
            let sample = WeightSample::from_observation(observation, self.policy).map_err(|e| {
                Error::provider(format!("Malformed weight log {}: {}", observation.log_id, e))
            })?;
            if !sample.in_scope(scope) {
                return Err(Error::provider(format!(
                    "Weight log {} dated {} is outside requested {}",
                    sample.log_id, observation.date, scope
                )));
            }
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Re-fetch one day and make the store match it.
    pub async fn sync_day(&self, date: Date) -> Result<usize> {
        let scope = WeightScope::Day(date);
        let observations = self.provider.fetch_day(date).await?;
        let desired = self.normalize(&observations, &scope)?;
        self.reconciler
            .reconcile(self.store.as_ref(), &scope, &desired)
            .await
    }

    /// Sync every day named by a webhook delivery.
    ///
    /// Notifications for other collections are skipped and repeated days are
    /// synced once. Every date is validated before the first fetch. Days are
    /// synced in delivery order, stopping at the first failure.
    pub async fn sync_notifications(&self, notifications: &[Notification]) -> Result<usize> {
        let mut days = Vec::new();
        for notification in notifications {
            if !notification.is_weight_related() {
                debug!(
                    "Skipping {:?} notification for {}",
                    notification.collection_type, notification.date
                );
                continue;
            }
            let day = notification.day()?;
            if !days.contains(&day) {
                days.push(day);
            }
        }

        let mut applied = 0;
        for day in days {
            applied += self.sync_day(day).await?;
        }
        Ok(applied)
    }

    async fn sync_month(&self, range: DateRange) -> Result<usize> {
        let scope = WeightScope::Range(range);
        let observations = self.provider.fetch_range(range.start, range.end).await?;
        let desired = self.normalize(&observations, &scope)?;
        self.reconciler
            .reconcile(self.store.as_ref(), &scope, &desired)
            .await
    }

    /// Backfill `start..=end`, one calendar month at a time.
    ///
    /// Returns the number of samples written. On failure the error is
    /// wrapped in [`Error::PartialSync`] carrying the count from months that
    /// finished first; months still in flight are dropped. Re-running the
    /// whole range is always safe.
    pub async fn sync_range(&self, start: Date, end: Date) -> Result<usize> {
        let parts = partition(start, end)?;
        info!(
            "Syncing {}..{} as {} monthly ranges",
            format_date(start),
            format_date(end),
            parts.len()
        );

        let mut results = stream::iter(parts)
            .map(|range| async move { (range, self.sync_month(range).await) })
            .buffer_unordered(self.max_concurrent);

        let mut applied = 0;
        while let Some((range, result)) = results.next().await {
            match result {
                Ok(count) => {
                    debug!("{}: {} samples written", range, count);
                    applied += count;
                }
                Err(e) => {
                    warn!("Range sync stopped at {}: {}", range, e);
                    return Err(Error::PartialSync {
                        applied,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "Synced {}..{}: {} samples written",
            format_date(start),
            format_date(end),
            applied
        );
        Ok(applied)
    }
}

/// Energy ingestion into a record store.
pub struct EnergySync {
    store: Arc<dyn RecordStore<EnergySample>>,
}

impl std::fmt::Debug for EnergySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnergySync").finish_non_exhaustive()
    }
}

impl EnergySync {
    pub fn new(store: Arc<dyn RecordStore<EnergySample>>) -> Self {
        Self { store }
    }

    /// Validate and store a health-metrics payload.
    ///
    /// Daily samples replace whatever is stored for their kind and day, the
    /// last value in the payload winning. Intraday samples of each kind are
    /// reconciled over the span from their first to their last timestamp.
    /// Returns the number of samples written.
    pub async fn ingest(
        &self,
        payload: &HealthMetricsPayload,
        granularity: Granularity,
    ) -> Result<usize> {
        let samples = parse_energy(payload, granularity)?;
        if samples.is_empty() {
            debug!("Empty {} energy payload", granularity);
            return Ok(0);
        }

        let (mode, groups) = match granularity {
            Granularity::Daily => (ReconcileMode::Exclusive, group_daily(samples)),
            Granularity::Intraday => (ReconcileMode::Additive, group_intraday(samples)),
        };

        let reconciler = Reconciler::new(mode);
        let mut applied = 0;
        for (scope, desired) in &groups {
            applied += reconciler
                .reconcile(self.store.as_ref(), scope, desired)
                .await?;
        }

        info!(
            "Ingested {} energy across {} scopes: {} samples written",
            granularity,
            groups.len(),
            applied
        );
        Ok(applied)
    }
}

/// Group daily samples by kind and day, in first-seen order.
fn group_daily(samples: Vec<EnergySample>) -> Vec<(EnergyScope, Vec<EnergySample>)> {
    let mut groups: Vec<(EnergyScope, Vec<EnergySample>)> = Vec::new();
    let mut index: HashMap<EnergyScope, usize> = HashMap::new();
    for sample in samples {
        let scope = EnergyScope::daily(sample.kind, sample.day());
        match index.entry(scope) {
            Entry::Occupied(slot) => groups[*slot.get()].1.push(sample),
            Entry::Vacant(slot) => {
                slot.insert(groups.len());
                groups.push((scope, vec![sample]));
            }
        }
    }
    groups
}

/// Group intraday samples by kind, each scoped to its own time span.
fn group_intraday(samples: Vec<EnergySample>) -> Vec<(EnergyScope, Vec<EnergySample>)> {
    let mut by_kind: Vec<(EnergyKind, Vec<EnergySample>)> = Vec::new();
    for sample in samples {
        match by_kind.iter_mut().find(|(kind, _)| *kind == sample.kind) {
            Some((_, group)) => group.push(sample),
            None => by_kind.push((sample.kind, vec![sample])),
        }
    }

    by_kind
        .into_iter()
        .filter_map(|(kind, group)| {
            let start = group.iter().map(|s| s.measured_at).min()?;
            let end = group.iter().map(|s| s.measured_at).max()?;
            Some((EnergyScope::intraday(kind, start, end), group))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStore, MockProvider};
    use time::macros::{date, datetime};

    fn observation(log_id: i64, date: &str, weight: f64) -> WeightObservation {
        WeightObservation {
            log_id,
            date: date.to_string(),
            time: "07:00:00".to_string(),
            weight,
        }
    }

    fn notification(date: &str) -> Notification {
        serde_json::from_str(&format!(
            r#"{{"collectionType":"body","date":"{}","subscriptionId":"1"}}"#,
            date
        ))
        .unwrap()
    }

    fn energy_payload(json: &str) -> HealthMetricsPayload {
        serde_json::from_str(json).unwrap()
    }

    fn weight_sync(
        provider: Arc<MockProvider>,
        store: Arc<MemoryStore<WeightSample>>,
    ) -> WeightSync {
        WeightSync::new(provider, store)
    }

    #[tokio::test]
    async fn test_sync_day_prunes_deleted_logs() {
        let provider = Arc::new(MockProvider::with_observations(vec![
            observation(1, "2024-01-15", 80.0),
            observation(2, "2024-01-15", 80.2),
        ]));
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider.clone(), store.clone());

        assert_eq!(sync.sync_day(date!(2024 - 01 - 15)).await.unwrap(), 2);

        // Log 1 deleted upstream
        provider
            .set_observations(vec![observation(2, "2024-01-15", 80.2)])
            .await;
        assert_eq!(sync.sync_day(date!(2024 - 01 - 15)).await.unwrap(), 0);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].log_id, 2);
    }

    #[tokio::test]
    async fn test_notifications_skip_other_collections_and_dedupe_days() {
        let provider = Arc::new(MockProvider::with_observations(vec![observation(
            12345,
            "2024-01-15",
            80.0,
        )]));
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider.clone(), store.clone());

        let mut foods = notification("2024-01-16");
        foods.collection_type = Some("foods".to_string());
        let delivery = vec![
            notification("2024-01-15"),
            foods,
            notification("2024-01-15"),
        ];

        assert_eq!(sync.sync_notifications(&delivery).await.unwrap(), 1);
        assert_eq!(provider.fetch_count(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_notifications_reject_bad_date_before_fetching() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider.clone(), store);

        let err = sync
            .sync_notifications(&[notification("2024-01-15"), notification("15/01/2024")])
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_provider_log_is_upstream_error() {
        let mut bad = observation(2, "2024-01-15", 80.2);
        bad.time = "7am".to_string();
        let provider = Arc::new(MockProvider::with_observations(vec![
            observation(1, "2024-01-15", 80.0),
            bad,
        ]));
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider, store.clone());

        let err = sync.sync_day(date!(2024 - 01 - 15)).await.unwrap_err();

        assert!(err.is_upstream());
        assert!(!err.is_validation());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_range_covers_every_month() {
        let provider = Arc::new(MockProvider::with_observations(vec![
            observation(1, "2024-01-20", 80.0),
            observation(2, "2024-02-29", 80.5),
            observation(3, "2024-03-05", 81.0),
            observation(4, "2024-03-20", 81.5),
        ]));
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider.clone(), store.clone()).with_max_concurrent(2);

        let applied = sync
            .sync_range(date!(2024 - 01 - 15), date!(2024 - 03 - 10))
            .await
            .unwrap();

        assert_eq!(applied, 3);
        assert_eq!(provider.fetch_count(), 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_sync_range_reports_partial_failure() {
        let provider = Arc::new(MockProvider::with_observations(vec![observation(
            1,
            "2024-01-20",
            80.0,
        )]));
        provider.fail_fetches_starting(date!(2024 - 02 - 01)).await;
        let store = Arc::new(MemoryStore::new());
        let sync = weight_sync(provider.clone(), store.clone()).with_max_concurrent(1);

        let err = sync
            .sync_range(date!(2024 - 01 - 15), date!(2024 - 03 - 10))
            .await
            .unwrap_err();

        match err {
            Error::PartialSync { applied, source } => {
                assert_eq!(applied, 1);
                assert!(source.is_upstream());
            }
            other => panic!("unexpected error: {other}"),
        }

        // Retrying the whole range after the upstream recovers converges
        let provider = Arc::new(MockProvider::with_observations(vec![observation(
            1,
            "2024-01-20",
            80.0,
        )]));
        let retry = weight_sync(provider, store.clone());
        assert_eq!(
            retry
                .sync_range(date!(2024 - 01 - 15), date!(2024 - 03 - 10))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_sync_range_rejects_degenerate_range() {
        let sync = weight_sync(Arc::new(MockProvider::new()), Arc::new(MemoryStore::new()));
        let err = sync
            .sync_range(date!(2024 - 01 - 15), date!(2024 - 01 - 15))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_daily_energy_last_value_wins() {
        let store: Arc<MemoryStore<EnergySample>> = Arc::new(MemoryStore::new());
        let sync = EnergySync::new(store.clone());

        let payload = energy_payload(
            r#"{"data":{"metrics":[{"name":"active_energy","units":"kJ","data":[
                {"date":"2024-05-01 00:00:00 +1000","qty":500.0},
                {"date":"2024-05-01 00:00:00 +1000","qty":650.0}
            ]}]}}"#,
        );
        sync.ingest(&payload, Granularity::Daily).await.unwrap();
        // Re-delivery changes nothing
        assert_eq!(sync.ingest(&payload, Granularity::Daily).await.unwrap(), 0);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kilojoules, 650.0);
        assert_eq!(records[0].day(), date!(2024 - 05 - 01));
    }

    #[tokio::test]
    async fn test_daily_energy_groups_by_kind_and_day() {
        let store: Arc<MemoryStore<EnergySample>> = Arc::new(MemoryStore::new());
        let sync = EnergySync::new(store.clone());

        let payload = energy_payload(
            r#"{"data":{"metrics":[
                {"name":"active_energy","units":"kJ","data":[
                    {"date":"2024-05-01 00:00:00 +1000","qty":650.0},
                    {"date":"2024-05-02 00:00:00 +1000","qty":700.0}]},
                {"name":"basal_energy_burned","units":"kJ","data":[
                    {"date":"2024-05-01 00:00:00 +1000","qty":7000.0}]}
            ]}}"#,
        );
        assert_eq!(sync.ingest(&payload, Granularity::Daily).await.unwrap(), 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_unit_writes_nothing() {
        let store: Arc<MemoryStore<EnergySample>> = Arc::new(MemoryStore::new());
        let sync = EnergySync::new(store.clone());

        let payload = energy_payload(
            r#"{"data":{"metrics":[
                {"name":"active_energy","units":"kJ","data":[
                    {"date":"2024-05-01 00:00:00 +1000","qty":650.0}]},
                {"name":"basal_energy_burned","units":"cal","data":[
                    {"date":"2024-05-01 00:00:00 +1000","qty":1600.0}]}
            ]}}"#,
        );
        let err = sync.ingest(&payload, Granularity::Daily).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(store.put_count(), 0);
        assert_eq!(store.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_intraday_energy_keeps_samples_outside_window() {
        let earlier = EnergySample {
            kind: EnergyKind::Active,
            granularity: Granularity::Intraday,
            kilojoules: 12.0,
            measured_at: datetime!(2024-05-01 08:00 +10),
        };
        let store = Arc::new(MemoryStore::with_records(vec![earlier.clone()]));
        let sync = EnergySync::new(store.clone());

        let payload = energy_payload(
            r#"{"data":{"metrics":[{"name":"active_energy","units":"kJ","data":[
                {"date":"2024-05-01 09:00:00 +1000","qty":20.0},
                {"date":"2024-05-01 09:05:00 +1000","qty":22.5}
            ]}]}}"#,
        );
        assert_eq!(sync.ingest(&payload, Granularity::Intraday).await.unwrap(), 2);
        assert_eq!(sync.ingest(&payload, Granularity::Intraday).await.unwrap(), 0);

        let records = store.records().await;
        assert_eq!(records.len(), 3);
        assert!(records.contains(&earlier));
    }
}
