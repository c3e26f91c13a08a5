//! Diff a freshly fetched record set against the persisted one and apply
//! the difference.
//!
//! A reconciliation pass over a scope does three things, strictly in order:
//!
//! 1. read the current records for the scope,
//! 2. delete the identities that should no longer be there,
//! 3. upsert the records that are missing.
//!
//! The diff itself ([`Reconciler::plan`]) is a pure function over two
//! in-memory sets keyed by identity, so it is O(n) and testable without a
//! store.
//!
//! # Modes
//!
//! [`ReconcileMode::Additive`] is used where identities never collide
//! (weights keyed by provider log id, intraday energy keyed by instant): a
//! record whose identity is already stored is left alone.
//!
//! [`ReconcileMode::Exclusive`] is used where a scope may hold at most one
//! value per identity and a new value wins (daily energy): a stored record
//! whose content differs from the desired one is deleted and the desired one
//! written, and duplicate rows for one identity collapse to one.
//!
//! # Example
//!
//! ```
//! use weighin_core::{ReconcileMode, Reconciler};
//! use weighin_types::{EnergyKind, EnergySample, EnergyScope, Granularity};
//! use time::macros::{date, datetime};
//!
//! let sample = |kj| EnergySample {
//!     kind: EnergyKind::Active,
//!     granularity: Granularity::Daily,
//!     kilojoules: kj,
//!     measured_at: datetime!(2024-05-01 00:00 +10),
//! };
//! let scope = EnergyScope::daily(EnergyKind::Active, date!(2024 - 05 - 01));
//!
//! let delta = Reconciler::new(ReconcileMode::Exclusive)
//!     .plan(&scope, &[sample(650.0)], &[sample(500.0)])?;
//! assert_eq!(delta.to_delete.len(), 1);
//! assert_eq!(delta.to_add[0].kilojoules, 650.0);
//! # Ok::<(), weighin_core::Error>(())
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;

use tracing::{debug, info};

use weighin_types::Record;

use crate::error::{Error, Result};
use crate::traits::RecordStore;

/// How matched identities are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Prune missing identities and add new ones; matched identities are untouched.
    Additive,
    /// Like `Additive`, but a matched identity whose content differs (or that
    /// is stored more than once) is replaced. Deletes run before adds.
    Exclusive,
}

/// The operations that turn a current set into a desired set.
#[derive(Debug, Clone)]
pub struct Delta<R: Record> {
    /// Identities to remove, in first-seen order.
    pub to_delete: Vec<R::Identity>,
    /// Records to upsert, in desired order.
    pub to_add: Vec<R>,
    /// Desired records already stored as-is.
    pub unchanged: usize,
}

impl<R: Record> Delta<R> {
    /// Whether applying the delta would change nothing.
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// Reconciles one record kind.
#[derive(Debug, Clone)]
pub struct Reconciler<R> {
    mode: ReconcileMode,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Reconciler<R> {
    pub fn new(mode: ReconcileMode) -> Self {
        Self {
            mode,
            _record: PhantomData,
        }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Compute the delta between `desired` and `current` for `scope`.
    ///
    /// When `desired` holds several records with one identity, the last one
    /// wins. Fails with [`Error::OutOfScope`] if a desired record does not
    /// belong to `scope`; current records are assumed to come from the scope.
    pub fn plan(&self, scope: &R::Scope, desired: &[R], current: &[R]) -> Result<Delta<R>> {
        // Desired records by identity, last one wins, first-seen order kept
        let mut wanted: Vec<R> = Vec::with_capacity(desired.len());
        let mut wanted_index: HashMap<R::Identity, usize> = HashMap::with_capacity(desired.len());
        for record in desired {
            if !record.in_scope(scope) {
                return Err(Error::OutOfScope {
                    scope: scope.to_string(),
                    identity: format!("{:?}", record.identity()),
                });
            }
            match wanted_index.entry(record.identity()) {
                Entry::Occupied(slot) => wanted[*slot.get()] = record.clone(),
                Entry::Vacant(slot) => {
                    slot.insert(wanted.len());
                    wanted.push(record.clone());
                }
            }
        }

        // Stored rows per identity, first-seen order kept
        let mut stored_order: Vec<R::Identity> = Vec::new();
        let mut stored: HashMap<R::Identity, Vec<&R>> = HashMap::with_capacity(current.len());
        for record in current {
            match stored.entry(record.identity()) {
                Entry::Occupied(mut rows) => rows.get_mut().push(record),
                Entry::Vacant(slot) => {
                    stored_order.push(slot.key().clone());
                    slot.insert(vec![record]);
                }
            }
        }

        let mut to_delete: Vec<R::Identity> = stored_order
            .iter()
            .filter(|identity| !wanted_index.contains_key(*identity))
            .cloned()
            .collect();

        let mut to_add = Vec::new();
        let mut unchanged = 0;
        for record in wanted {
            let identity = record.identity();
            match stored.get(&identity) {
                None => to_add.push(record),
                Some(rows) => {
                    let replace = self.mode == ReconcileMode::Exclusive
                        && (rows.len() > 1 || !rows[0].same_content(&record));
                    if replace {
                        to_delete.push(identity);
                        to_add.push(record);
                    } else {
                        unchanged += 1;
                    }
                }
            }
        }

        Ok(Delta {
            to_delete,
            to_add,
            unchanged,
        })
    }

    /// Apply a delta: deletes first, then upserts. Stops at the first failure.
    ///
    /// Returns the number of records upserted.
    pub async fn apply<S>(&self, store: &S, delta: &Delta<R>) -> Result<usize>
    where
        S: RecordStore<R> + ?Sized,
    {
        if !delta.to_delete.is_empty() {
            store.delete_many(&delta.to_delete).await?;
        }
        if !delta.to_add.is_empty() {
            store.put_many(&delta.to_add).await?;
        }
        Ok(delta.to_add.len())
    }

    /// Make the records stored for `scope` match `desired` by identity.
    ///
    /// An empty `desired` set empties the scope. On a storage failure the
    /// scope may be partially reconciled; running the same call again
    /// converges.
    pub async fn reconcile<S>(&self, store: &S, scope: &R::Scope, desired: &[R]) -> Result<usize>
    where
        S: RecordStore<R> + ?Sized,
    {
        let current = store.get_by_scope(scope).await?;
        let delta = self.plan(scope, desired, &current)?;

        if delta.is_empty() {
            debug!("{}: {} records already in sync", scope, delta.unchanged);
            return Ok(0);
        }

        let applied = self.apply(store, &delta).await?;
        info!(
            "{}: deleted {}, upserted {}, unchanged {}",
            scope,
            delta.to_delete.len(),
            applied,
            delta.unchanged
        );
        Ok(applied)
    }
}
