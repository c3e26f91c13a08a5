//! Record model and upstream payload types for weighin.
//!
//! This crate holds the value types shared by the store, the reconciliation
//! engine and the HTTP service. It performs no I/O.
//!
//! # Records
//!
//! - [`WeightSample`]: a body weight measurement identified by the
//!   provider-assigned log id.
//! - [`EnergySample`]: an energy measurement in kilojoules identified by
//!   `(kind, day)` for daily aggregates or `(kind, timestamp)` for intraday
//!   samples.
//!
//! Both implement [`Record`], which is what the reconciler diffs on.
//!
//! # Example
//!
//! ```
//! use weighin_types::{Record, TimezonePolicy, WeightObservation, WeightSample};
//!
//! let observation = WeightObservation {
//!     log_id: 12345,
//!     date: "2024-01-15".to_string(),
//!     time: "07:12:33".to_string(),
//!     weight: 80.4,
//! };
//! let sample = WeightSample::from_observation(&observation, TimezonePolicy::UTC)?;
//! assert_eq!(sample.identity(), 12345);
//! # Ok::<(), weighin_types::ParseError>(())
//! ```

pub mod error;
pub mod payload;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use payload::{
    HealthMetricsData, HealthMetricsPayload, Metric, MetricPoint, Notification,
    WeightLogResponse, WeightObservation, parse_energy, parse_metric_timestamp,
};
pub use types::{
    DateRange, EnergyIdentity, EnergyKind, EnergySample, EnergyScope, EnergySlot, EnergyWindow,
    Granularity, Record, TimezonePolicy, WeightSample, WeightScope, format_date, parse_date,
    parse_time_of_day,
};
