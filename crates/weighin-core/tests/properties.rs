//! Property tests for month partitioning and reconciliation convergence.
//!
//! Run with `cargo test -p weighin-core --test properties`.

use std::collections::HashSet;

use proptest::prelude::*;
use time::macros::{date, datetime, time};
use time::{Date, Duration};

use weighin_core::mock::MemoryStore;
use weighin_core::{ReconcileMode, Reconciler, partition};
use weighin_types::{WeightSample, WeightScope};

const DAY: Date = date!(2024 - 01 - 15);

fn weight(log_id: i64, grams: u32) -> WeightSample {
    WeightSample {
        log_id,
        date: DAY,
        time: time!(07:00),
        weight: f64::from(grams) / 1000.0,
        measured_at: datetime!(2024-01-15 07:00 UTC),
    }
}

fn samples() -> impl Strategy<Value = Vec<WeightSample>> {
    proptest::collection::vec((0i64..12, 60_000u32..90_000), 0..16)
        .prop_map(|pairs| pairs.into_iter().map(|(id, g)| weight(id, g)).collect())
}

fn identities(records: &[WeightSample]) -> HashSet<i64> {
    records.iter().map(|r| r.log_id).collect()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

fn mode() -> impl Strategy<Value = ReconcileMode> {
    prop_oneof![Just(ReconcileMode::Additive), Just(ReconcileMode::Exclusive)]
}

proptest! {
    /// Sub-ranges are ordered, contiguous, month-confined and cover the range.
    #[test]
    fn partition_covers_range_month_by_month(offset in 0i64..3000, length in 1i64..900) {
        let start = date!(2019 - 01 - 01) + Duration::days(offset);
        let end = start + Duration::days(length);

        let parts = partition(start, end).unwrap();

        prop_assert!(!parts.is_empty());
        prop_assert_eq!(parts[0].start, start);
        prop_assert_eq!(parts[parts.len() - 1].end, end);
        for part in &parts {
            prop_assert!(part.start <= part.end);
            prop_assert_eq!(part.start.year(), part.end.year());
            prop_assert_eq!(part.start.month(), part.end.month());
        }
        for pair in parts.windows(2) {
            prop_assert_eq!(pair[0].end.next_day(), Some(pair[1].start));
            prop_assert_ne!(pair[0].start.month(), pair[1].start.month());
        }
    }

    /// Degenerate and inverted ranges are rejected.
    #[test]
    fn partition_rejects_non_increasing(offset in 0i64..3000, back in 0i64..400) {
        let start = date!(2019 - 01 - 01) + Duration::days(offset);
        let end = start - Duration::days(back);
        prop_assert!(partition(start, end).is_err());
    }

    /// After a reconcile the stored identities equal the desired identities.
    #[test]
    fn reconcile_converges(current in samples(), desired in samples(), mode in mode()) {
        let store = MemoryStore::with_records(current);
        let reconciler = Reconciler::new(mode);
        let scope = WeightScope::Day(DAY);

        block_on(reconciler.reconcile(&store, &scope, &desired)).unwrap();
        let stored = block_on(store.records());

        prop_assert_eq!(identities(&stored), identities(&desired));
    }

    /// A second reconcile with the same desired set writes nothing.
    #[test]
    fn reconcile_is_idempotent(current in samples(), desired in samples(), mode in mode()) {
        let store = MemoryStore::with_records(current);
        let reconciler = Reconciler::new(mode);
        let scope = WeightScope::Day(DAY);

        block_on(reconciler.reconcile(&store, &scope, &desired)).unwrap();
        let first = block_on(store.records());

        let applied = block_on(reconciler.reconcile(&store, &scope, &desired)).unwrap();
        let second = block_on(store.records());

        prop_assert_eq!(applied, 0);
        prop_assert_eq!(first, second);
    }

    /// In exclusive mode each identity ends up stored once, with the last desired value.
    #[test]
    fn exclusive_reconcile_keeps_last_value(current in samples(), desired in samples()) {
        let store = MemoryStore::with_records(current);
        let reconciler = Reconciler::new(ReconcileMode::Exclusive);

        block_on(reconciler.reconcile(&store, &WeightScope::Day(DAY), &desired)).unwrap();
        let stored = block_on(store.records());

        prop_assert_eq!(stored.len(), identities(&desired).len());
        for record in &stored {
            let last = desired.iter().rev().find(|d| d.log_id == record.log_id).unwrap();
            prop_assert_eq!(record, last);
        }
    }
}
