//! Query builders for weights and energy.
//!
//! Both [`WeightQuery`] and [`EnergyQuery`] follow the builder pattern and are
//! consumed by [`Store::query_weights`](crate::Store::query_weights) and
//! [`Store::query_energy`](crate::Store::query_energy).
//!
//! # Example
//!
//! ```
//! use weighin_store::{EnergyQuery, Store, WeightQuery};
//! use weighin_types::{EnergyKind, Granularity};
//! use time::macros::date;
//!
//! let store = Store::open_in_memory()?;
//!
//! let weights = store.query_weights(
//!     &WeightQuery::new()
//!         .since(date!(2024 - 01 - 01))
//!         .until(date!(2024 - 01 - 31))
//!         .limit(50),
//! )?;
//!
//! let energy = store.query_energy(
//!     &EnergyQuery::new()
//!         .kind(EnergyKind::Active)
//!         .granularity(Granularity::Daily)
//!         .oldest_first(),
//! )?;
//! # Ok::<(), weighin_store::Error>(())
//! ```

use time::Date;

use weighin_types::{EnergyKind, Granularity, format_date};

/// Fluent query builder for weight samples.
///
/// Date filters compare calendar dates and are inclusive. Results are ordered
/// by `measured_at` descending unless [`oldest_first`](Self::oldest_first) is
/// called.
#[derive(Debug, Default, Clone)]
pub struct WeightQuery {
    /// Include only samples dated on or after this day.
    pub since: Option<Date>,
    /// Include only samples dated on or before this day.
    pub until: Option<Date>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by measured_at descending (newest first).
    pub newest_first: bool,
}

impl WeightQuery {
    /// Create a new query: no filters, no limit, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only samples dated on or after `date`.
    pub fn since(mut self, date: Date) -> Self {
        self.since = Some(date);
        self
    }

    /// Only samples dated on or before `date`.
    pub fn until(mut self, date: Date) -> Self {
        self.until = Some(date);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        // Dates are stored as zero-padded ISO strings, so text order is date order
        if let Some(since) = self.since {
            conditions.push("date >= ?");
            params.push(Box::new(format_date(since)));
        }

        if let Some(until) = self.until {
            conditions.push("date <= ?");
            params.push(Box::new(format_date(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT log_id, date, time, weight, measured_at, utc_offset, synced_at \
             FROM weights {} ORDER BY measured_at {}, log_id {}",
            where_clause, order, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            if self.limit.is_none() {
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

/// Fluent query builder for energy samples.
///
/// Day filters compare the calendar day of each sample in its own offset.
#[derive(Debug, Default, Clone)]
pub struct EnergyQuery {
    pub kind: Option<EnergyKind>,
    pub granularity: Option<Granularity>,
    pub since: Option<Date>,
    pub until: Option<Date>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl EnergyQuery {
    /// Create a new query: all kinds and granularities, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: EnergyKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn since(mut self, day: Date) -> Self {
        self.since = Some(day);
        self
    }

    pub fn until(mut self, day: Date) -> Self {
        self.until = Some(day);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(kind) = self.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        if let Some(granularity) = self.granularity {
            conditions.push("granularity = ?");
            params.push(Box::new(granularity.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push("day >= ?");
            params.push(Box::new(format_date(since)));
        }

        if let Some(until) = self.until {
            conditions.push("day <= ?");
            params.push(Box::new(format_date(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, kind, granularity, day, kilojoules, measured_at, utc_offset, synced_at \
             FROM energy {} ORDER BY measured_at {}, id {}",
            where_clause, order, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            if self.limit.is_none() {
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}
