//! Core types for weight and energy records.

use core::fmt;
use core::hash::Hash;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{ParseError, ParseResult};
use crate::payload::WeightObservation;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");
time::serde::format_description!(clock_time, Time, "[hour]:[minute]:[second]");

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> ParseResult<Date> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| ParseError::InvalidDate(s.to_string()))
}

/// Format a calendar date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parse a provider time of day. Seconds are optional.
pub fn parse_time_of_day(s: &str) -> ParseResult<Time> {
    let s = s.trim();
    Time::parse(s, format_description!("[hour]:[minute]:[second]"))
        .or_else(|_| Time::parse(s, format_description!("[hour]:[minute]")))
        .map_err(|_| ParseError::InvalidTime(s.to_string()))
}

/// A record that can be reconciled against a persisted set.
///
/// Two records are "the same record" iff their identities are equal.
/// `same_content` additionally compares the non-identity attributes and is
/// only consulted by exclusive scopes, where a changed value replaces the
/// stored one.
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identity key of the record.
    type Identity: Clone + Eq + Hash + fmt::Debug + Send + Sync;
    /// The addressable unit this record kind is reconciled over.
    type Scope: Clone + fmt::Debug + fmt::Display + Send + Sync;

    /// Identity of this record.
    fn identity(&self) -> Self::Identity;

    /// Whether every attribute (not just identity) matches `other`.
    fn same_content(&self, other: &Self) -> bool;

    /// Whether this record belongs to `scope`.
    fn in_scope(&self, scope: &Self::Scope) -> bool;
}

// ==========================================================================
// Timezone policy
// ==========================================================================

/// The single rule used to turn a provider date and time of day into an
/// instant.
///
/// The provider reports wall-clock values in the account's local zone
/// without an offset, so a fixed offset is configured once and applied on
/// every ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezonePolicy {
    offset: UtcOffset,
}

impl TimezonePolicy {
    /// Interpret provider wall-clock values as UTC.
    pub const UTC: Self = Self {
        offset: UtcOffset::UTC,
    };

    /// Interpret provider wall-clock values at a fixed offset.
    pub fn fixed(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Parse `UTC`, `Z`, or `±HH:MM`.
    ///
    /// ```
    /// use weighin_types::TimezonePolicy;
    ///
    /// assert_eq!(TimezonePolicy::parse("UTC").unwrap(), TimezonePolicy::UTC);
    /// assert_eq!(TimezonePolicy::parse("+10:00").unwrap().to_string(), "+10:00");
    /// assert!(TimezonePolicy::parse("ten").is_err());
    /// ```
    pub fn parse(s: &str) -> ParseResult<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(Self::UTC);
        }
        UtcOffset::parse(s, format_description!("[offset_hour sign:mandatory]:[offset_minute]"))
            .map(Self::fixed)
            .map_err(|_| ParseError::InvalidOffset(s.to_string()))
    }

    /// The configured offset.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Combine a date and time of day into an instant at the configured offset.
    pub fn resolve(&self, date: Date, time: Time) -> OffsetDateTime {
        PrimitiveDateTime::new(date, time).assume_offset(self.offset)
    }
}

impl Default for TimezonePolicy {
    fn default() -> Self {
        Self::UTC
    }
}

impl fmt::Display for TimezonePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hours, minutes, _) = self.offset.as_hms();
        let sign = if self.offset.is_negative() { '-' } else { '+' };
        write!(f, "{}{:02}:{:02}", sign, hours.unsigned_abs(), minutes.unsigned_abs())
    }
}

// ==========================================================================
// Weight
// ==========================================================================

/// A body weight measurement.
///
/// Identity is the provider-assigned log id, which is also the storage key,
/// so writing the same sample twice is an overwrite and never a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSample {
    /// Provider log id.
    pub log_id: i64,
    /// Calendar date of the measurement, as reported by the provider.
    #[serde(with = "iso_date")]
    pub date: Date,
    /// Wall-clock time of day, as reported by the provider.
    #[serde(with = "clock_time")]
    pub time: Time,
    /// Weight in kilograms.
    pub weight: f64,
    /// Date and time resolved through the [`TimezonePolicy`].
    #[serde(with = "time::serde::rfc3339")]
    pub measured_at: OffsetDateTime,
}

impl WeightSample {
    /// Normalize a raw provider observation.
    pub fn from_observation(
        observation: &WeightObservation,
        policy: TimezonePolicy,
    ) -> ParseResult<Self> {
        let date = parse_date(&observation.date)?;
        let time = parse_time_of_day(&observation.time)?;
        Ok(Self {
            log_id: observation.log_id,
            date,
            time,
            weight: observation.weight,
            measured_at: policy.resolve(date, time),
        })
    }
}

impl Record for WeightSample {
    type Identity = i64;
    type Scope = WeightScope;

    fn identity(&self) -> i64 {
        self.log_id
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }

    fn in_scope(&self, scope: &WeightScope) -> bool {
        scope.contains(self.date)
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    /// Create a range, rejecting `start > end`.
    pub fn new(start: Date, end: Date) -> ParseResult<Self> {
        if start > end {
            return Err(ParseError::InvalidRange {
                start: format_date(start),
                end: format_date(end),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse a range from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> ParseResult<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// Whether `date` lies within the range (both ends inclusive).
    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    /// Whether both ends fall in the same calendar month.
    pub fn within_one_month(&self) -> bool {
        self.start.year() == self.end.year() && self.start.month() == self.end.month()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", format_date(self.start), format_date(self.end))
    }
}

/// Scope of a weight reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightScope {
    /// A single calendar day (webhook path).
    Day(Date),
    /// A contiguous, inclusive range of days (backfill path).
    Range(DateRange),
}

impl WeightScope {
    /// Whether a sample dated `date` belongs to this scope.
    pub fn contains(&self, date: Date) -> bool {
        match self {
            WeightScope::Day(day) => *day == date,
            WeightScope::Range(range) => range.contains(date),
        }
    }

    /// First and last day covered.
    pub fn bounds(&self) -> (Date, Date) {
        match self {
            WeightScope::Day(day) => (*day, *day),
            WeightScope::Range(range) => (range.start, range.end),
        }
    }
}

impl fmt::Display for WeightScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightScope::Day(day) => write!(f, "weight@{}", format_date(*day)),
            WeightScope::Range(range) => write!(f, "weight@{}", range),
        }
    }
}

// ==========================================================================
// Energy
// ==========================================================================

/// Kind of energy measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyKind {
    /// Energy burned through activity.
    #[serde(rename = "active-energy")]
    Active,
    /// Basal (resting) energy burned.
    #[serde(rename = "resting-energy")]
    Resting,
    /// Dietary energy consumed.
    #[serde(rename = "dietary-energy")]
    Dietary,
}

impl EnergyKind {
    /// Every kind, in storage order.
    pub const ALL: [EnergyKind; 3] = [EnergyKind::Active, EnergyKind::Resting, EnergyKind::Dietary];

    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyKind::Active => "active-energy",
            EnergyKind::Resting => "resting-energy",
            EnergyKind::Dietary => "dietary-energy",
        }
    }

    /// Parse a storage name.
    pub fn from_storage_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Metric name used by the health-metrics exporter.
    pub fn metric_name(&self) -> &'static str {
        match self {
            EnergyKind::Active => "active_energy",
            EnergyKind::Resting => "basal_energy_burned",
            EnergyKind::Dietary => "dietary_energy",
        }
    }

    /// Map an exporter metric name to a kind.
    ///
    /// ```
    /// use weighin_types::EnergyKind;
    ///
    /// assert_eq!(EnergyKind::from_metric_name("basal_energy_burned"), Some(EnergyKind::Resting));
    /// assert_eq!(EnergyKind::from_metric_name("step_count"), None);
    /// ```
    pub fn from_metric_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.metric_name() == s)
    }
}

impl fmt::Display for EnergyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation period of an energy delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One value per kind per calendar day; a new value replaces the old one.
    Daily,
    /// Individual samples keyed by their timestamp.
    Intraday,
}

impl Granularity {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Intraday => "intraday",
        }
    }

    /// Parse the `period` header of a health-metrics delivery.
    pub fn from_period(period: Option<&str>) -> ParseResult<Self> {
        match period.map(str::trim) {
            None | Some("") => Err(ParseError::MissingPeriod),
            Some("daily") => Ok(Granularity::Daily),
            Some("intraday") => Ok(Granularity::Intraday),
            Some(other) => Err(ParseError::UnknownPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An energy measurement in kilojoules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub kind: EnergyKind,
    pub granularity: Granularity,
    pub kilojoules: f64,
    /// Timestamp, keeping the offset it was reported in.
    #[serde(with = "time::serde::rfc3339")]
    pub measured_at: OffsetDateTime,
}

impl EnergySample {
    /// Calendar day of the sample in its own offset.
    pub fn day(&self) -> Date {
        self.measured_at.date()
    }
}

/// Where an energy record sits within its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergySlot {
    /// Daily aggregate for a calendar day.
    Day(Date),
    /// Intraday sample at a unix timestamp.
    Instant(i64),
}

/// Identity of an energy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnergyIdentity {
    pub kind: EnergyKind,
    pub slot: EnergySlot,
}

impl Record for EnergySample {
    type Identity = EnergyIdentity;
    type Scope = EnergyScope;

    fn identity(&self) -> EnergyIdentity {
        let slot = match self.granularity {
            Granularity::Daily => EnergySlot::Day(self.day()),
            Granularity::Intraday => EnergySlot::Instant(self.measured_at.unix_timestamp()),
        };
        EnergyIdentity {
            kind: self.kind,
            slot,
        }
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }

    fn in_scope(&self, scope: &EnergyScope) -> bool {
        scope.contains(self)
    }
}

/// Time window of an energy scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergyWindow {
    /// A calendar day (daily records).
    Day(Date),
    /// Instants between `start` and `end`, both inclusive (intraday records).
    Between {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

/// Scope of an energy reconciliation: one kind, one granularity, one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnergyScope {
    pub kind: EnergyKind,
    pub granularity: Granularity,
    pub window: EnergyWindow,
}

impl EnergyScope {
    /// The daily scope for `kind` on `day`.
    pub fn daily(kind: EnergyKind, day: Date) -> Self {
        Self {
            kind,
            granularity: Granularity::Daily,
            window: EnergyWindow::Day(day),
        }
    }

    /// The intraday scope for `kind` between two instants.
    pub fn intraday(kind: EnergyKind, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            kind,
            granularity: Granularity::Intraday,
            window: EnergyWindow::Between { start, end },
        }
    }

    /// Whether `sample` belongs to this scope.
    pub fn contains(&self, sample: &EnergySample) -> bool {
        if sample.kind != self.kind || sample.granularity != self.granularity {
            return false;
        }
        match self.window {
            EnergyWindow::Day(day) => sample.day() == day,
            EnergyWindow::Between { start, end } => {
                start <= sample.measured_at && sample.measured_at <= end
            }
        }
    }
}

impl fmt::Display for EnergyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window {
            EnergyWindow::Day(day) => {
                write!(f, "{}/{}@{}", self.kind, self.granularity, format_date(day))
            }
            EnergyWindow::Between { start, end } => write!(
                f,
                "{}/{}@{}..{}",
                self.kind,
                self.granularity,
                start.unix_timestamp(),
                end.unix_timestamp()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, offset, time};

    fn observation(log_id: i64, date: &str, time: &str) -> WeightObservation {
        WeightObservation {
            log_id,
            date: date.to_string(),
            time: time.to_string(),
            weight: 80.4,
        }
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-02-29").unwrap(), date!(2024 - 02 - 29));
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("29/02/2024").is_err());
    }

    #[test]
    fn test_format_date_pads() {
        assert_eq!(format_date(date!(2024 - 01 - 05)), "2024-01-05");
    }

    #[test]
    fn test_parse_time_of_day_accepts_missing_seconds() {
        assert_eq!(parse_time_of_day("07:12:33").unwrap(), time!(07:12:33));
        assert_eq!(parse_time_of_day("07:12").unwrap(), time!(07:12));
        assert!(parse_time_of_day("7am").is_err());
    }

    #[test]
    fn test_timezone_policy_resolves_at_offset() {
        let policy = TimezonePolicy::fixed(offset!(+10));
        let resolved = policy.resolve(date!(2024 - 01 - 15), time!(07:00));
        assert_eq!(resolved, datetime!(2024-01-14 21:00 UTC));
        assert_eq!(resolved.offset(), offset!(+10));
    }

    #[test]
    fn test_timezone_policy_display_negative() {
        let policy = TimezonePolicy::parse("-03:30").unwrap();
        assert_eq!(policy.to_string(), "-03:30");
    }

    #[test]
    fn test_weight_from_observation() {
        let sample = WeightSample::from_observation(
            &observation(12345, "2024-01-15", "07:12:33"),
            TimezonePolicy::UTC,
        )
        .unwrap();

        assert_eq!(sample.identity(), 12345);
        assert_eq!(sample.date, date!(2024 - 01 - 15));
        assert_eq!(sample.measured_at, datetime!(2024-01-15 07:12:33 UTC));
        assert!(sample.in_scope(&WeightScope::Day(date!(2024 - 01 - 15))));
        assert!(!sample.in_scope(&WeightScope::Day(date!(2024 - 01 - 16))));
    }

    #[test]
    fn test_weight_from_observation_rejects_bad_date() {
        let err = WeightSample::from_observation(
            &observation(1, "15-01-2024", "07:12:33"),
            TimezonePolicy::UTC,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidDate(_)));
    }

    #[test]
    fn test_date_range_rejects_inverted() {
        assert!(DateRange::parse("2024-03-10", "2024-01-15").is_err());
        let range = DateRange::parse("2024-01-15", "2024-01-31").unwrap();
        assert!(range.within_one_month());
        assert!(range.contains(date!(2024 - 01 - 31)));
        assert!(!range.contains(date!(2024 - 02 - 01)));
        assert_eq!(range.to_string(), "2024-01-15..2024-01-31");
    }

    #[test]
    fn test_energy_kind_names() {
        for kind in EnergyKind::ALL {
            assert_eq!(EnergyKind::from_storage_name(kind.as_str()), Some(kind));
            assert_eq!(EnergyKind::from_metric_name(kind.metric_name()), Some(kind));
        }
        assert_eq!(EnergyKind::from_metric_name("active-energy"), None);
    }

    #[test]
    fn test_granularity_from_period() {
        assert_eq!(Granularity::from_period(Some("daily")).unwrap(), Granularity::Daily);
        assert_eq!(
            Granularity::from_period(Some("intraday")).unwrap(),
            Granularity::Intraday
        );
        assert_eq!(Granularity::from_period(None), Err(ParseError::MissingPeriod));
        assert!(matches!(
            Granularity::from_period(Some("weekly")),
            Err(ParseError::UnknownPeriod(_))
        ));
    }

    #[test]
    fn test_daily_energy_identity_collapses_to_day() {
        let morning = EnergySample {
            kind: EnergyKind::Active,
            granularity: Granularity::Daily,
            kilojoules: 500.0,
            measured_at: datetime!(2024-05-01 00:00 +10),
        };
        let evening = EnergySample {
            kilojoules: 650.0,
            measured_at: datetime!(2024-05-01 23:00 +10),
            ..morning.clone()
        };

        assert_eq!(morning.identity(), evening.identity());
        assert!(!morning.same_content(&evening));
        assert_eq!(morning.day(), date!(2024 - 05 - 01));
    }

    #[test]
    fn test_intraday_energy_identity_is_instant() {
        let a = EnergySample {
            kind: EnergyKind::Resting,
            granularity: Granularity::Intraday,
            kilojoules: 4.2,
            measured_at: datetime!(2024-05-01 08:00 +10),
        };
        let b = EnergySample {
            measured_at: datetime!(2024-05-01 08:01 +10),
            ..a.clone()
        };
        assert_ne!(a.identity(), b.identity());

        let scope = EnergyScope::intraday(
            EnergyKind::Resting,
            datetime!(2024-05-01 08:00 +10),
            datetime!(2024-05-01 08:00 +10),
        );
        assert!(scope.contains(&a));
        assert!(!scope.contains(&b));
    }

    #[test]
    fn test_energy_scope_day_uses_sample_offset() {
        let sample = EnergySample {
            kind: EnergyKind::Dietary,
            granularity: Granularity::Daily,
            kilojoules: 9000.0,
            // 2024-04-30 in UTC, but 2024-05-01 locally
            measured_at: datetime!(2024-05-01 00:00 +10),
        };
        assert!(EnergyScope::daily(EnergyKind::Dietary, date!(2024 - 05 - 01)).contains(&sample));
        assert!(!EnergyScope::daily(EnergyKind::Active, date!(2024 - 05 - 01)).contains(&sample));
    }

    #[test]
    fn test_weight_sample_serde() {
        let sample = WeightSample {
            log_id: 7,
            date: date!(2024 - 01 - 15),
            time: time!(07:12:33),
            weight: 80.4,
            measured_at: datetime!(2024-01-15 07:12:33 UTC),
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["date"], "2024-01-15");
        assert_eq!(json["time"], "07:12:33");
        assert_eq!(json["measured_at"], "2024-01-15T07:12:33Z");
    }
}
