//! Error types for record and payload parsing in weighin-types.

use thiserror::Error;

/// Errors raised while validating upstream payloads or building records.
///
/// Every variant is a validation failure: it is reported before any
/// storage mutation happens.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A calendar date was not in `YYYY-MM-DD` form.
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// A time of day was not in `HH:MM:SS` (or `HH:MM`) form.
    #[error("Invalid time of day '{0}': expected HH:MM:SS")]
    InvalidTime(String),

    /// A metric timestamp was not in `YYYY-MM-DD HH:MM:SS ±HHMM` form.
    #[error("Invalid timestamp '{0}': expected YYYY-MM-DD HH:MM:SS ±HHMM")]
    InvalidTimestamp(String),

    /// A UTC offset could not be parsed.
    #[error("Invalid UTC offset '{0}': expected ±HH:MM or UTC")]
    InvalidOffset(String),

    /// The start of a date range is after its end.
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    /// A health metric with a name we do not ingest.
    #[error("Unknown energy metric: {0}")]
    UnknownMetric(String),

    /// A health metric reported in a unit other than kilojoules.
    #[error("Unknown unit '{unit}' for metric {metric}: only kJ is accepted")]
    UnknownUnit { metric: String, unit: String },

    /// The `period` of a health-metrics delivery is not recognised.
    #[error("Unknown period: {0}")]
    UnknownPeriod(String),

    /// The `period` of a health-metrics delivery was not supplied.
    #[error("Missing period: expected 'daily' or 'intraday'")]
    MissingPeriod,
}

/// Result type alias using weighin-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
