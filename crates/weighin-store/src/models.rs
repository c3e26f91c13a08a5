//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time};

use weighin_types::{
    EnergyKind, EnergySample, Granularity, WeightSample, format_date, parse_date,
    parse_time_of_day,
};

use crate::error::Result;

/// Format a time of day the way it is stored (`HH:MM:SS`).
pub(crate) fn format_time(time: Time) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// A weight sample stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWeight {
    /// Provider log id (primary key).
    pub log_id: i64,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Time of day, `HH:MM:SS`.
    pub time: String,
    /// Weight in kilograms.
    pub weight: f64,
    /// Resolved measurement instant.
    #[serde(with = "time::serde::rfc3339")]
    pub measured_at: OffsetDateTime,
    /// When this row was last written.
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

impl StoredWeight {
    /// Create a StoredWeight from a WeightSample.
    pub fn from_sample(sample: &WeightSample) -> Self {
        Self {
            log_id: sample.log_id,
            date: format_date(sample.date),
            time: format_time(sample.time),
            weight: sample.weight,
            measured_at: sample.measured_at,
            synced_at: OffsetDateTime::now_utc(),
        }
    }

    /// Convert back to a WeightSample.
    pub fn to_sample(&self) -> Result<WeightSample> {
        Ok(WeightSample {
            log_id: self.log_id,
            date: parse_date(&self.date)?,
            time: parse_time_of_day(&self.time)?,
            weight: self.weight,
            measured_at: self.measured_at,
        })
    }
}

/// An energy sample stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnergy {
    /// Database row ID.
    pub id: i64,
    pub kind: EnergyKind,
    pub granularity: Granularity,
    /// Calendar day in the sample's own offset, `YYYY-MM-DD`.
    pub day: String,
    pub kilojoules: f64,
    /// Measurement instant, in the offset it was reported in.
    #[serde(with = "time::serde::rfc3339")]
    pub measured_at: OffsetDateTime,
    /// When this row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

impl StoredEnergy {
    /// Convert to an EnergySample.
    pub fn to_sample(&self) -> EnergySample {
        EnergySample {
            kind: self.kind,
            granularity: self.granularity,
            kilojoules: self.kilojoules,
            measured_at: self.measured_at,
        }
    }
}

/// Lifecycle state of a secret version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretState {
    /// Readable.
    Enabled,
    /// Payload erased; never readable again.
    Destroyed,
}

impl SecretState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SecretState::Enabled => "enabled",
            SecretState::Destroyed => "destroyed",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(SecretState::Enabled),
            "destroyed" => Some(SecretState::Destroyed),
            _ => None,
        }
    }
}

/// Metadata of one version of a named secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersionInfo {
    pub name: String,
    /// Monotonic per-name version number, starting at 1.
    pub version: i64,
    pub state: SecretState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub destroyed_at: Option<OffsetDateTime>,
}

/// A readable secret version with its payload.
#[derive(Clone)]
pub struct StoredSecret {
    pub name: String,
    pub version: i64,
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for StoredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSecret")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}
