//! Wire shapes of upstream deliveries and their normalization.
//!
//! Two upstreams push data in:
//!
//! - The weight provider's subscriber webhook, which posts a list of
//!   [`Notification`]s naming the days that changed. The payload carries no
//!   measurements; each named day is re-fetched as a [`WeightLogResponse`].
//! - A health-metrics exporter, which posts a [`HealthMetricsPayload`] of
//!   named energy metrics with dated quantities.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{ParseError, ParseResult};
use crate::types::{EnergyKind, EnergySample, Granularity, parse_date};

/// The only energy unit accepted from the exporter.
pub const KILOJOULES: &str = "kJ";

/// Collection type of weight-related notifications.
pub const BODY_COLLECTION: &str = "body";

/// A subscriber notification from the weight provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Collection that changed (`body`, `foods`, ...).
    #[serde(default)]
    pub collection_type: Option<String>,
    /// Day that changed, `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
    pub subscription_id: String,
}

impl Notification {
    /// Whether this notification can change weight data.
    ///
    /// Notifications without a collection type are treated as weight
    /// notifications, since the subscription only covers body data.
    pub fn is_weight_related(&self) -> bool {
        self.collection_type
            .as_deref()
            .is_none_or(|collection| collection == BODY_COLLECTION)
    }

    /// The day named by the notification.
    pub fn day(&self) -> ParseResult<time::Date> {
        parse_date(&self.date)
    }
}

/// A raw weight log entry from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightObservation {
    #[serde(rename = "logId")]
    pub log_id: i64,
    pub date: String,
    pub time: String,
    pub weight: f64,
}

/// Provider response for a day or a date range of weight logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightLogResponse {
    #[serde(default)]
    pub weight: Vec<WeightObservation>,
}

/// Body posted by the health-metrics exporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetricsPayload {
    pub data: HealthMetricsData,
}

/// The `data` object of a [`HealthMetricsPayload`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetricsData {
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

/// One named metric with its dated quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub units: String,
    #[serde(default)]
    pub data: Vec<MetricPoint>,
}

/// A single quantity of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// `YYYY-MM-DD HH:MM:SS ±HHMM`
    pub date: String,
    pub qty: f64,
}

/// Parse an exporter timestamp, keeping its offset.
pub fn parse_metric_timestamp(s: &str) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::parse(
        s.trim(),
        format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        ),
    )
    .map_err(|_| ParseError::InvalidTimestamp(s.to_string()))
}

/// Normalize a health-metrics payload into energy samples.
///
/// The whole payload is validated: an unknown unit, an unknown metric name,
/// or a malformed date anywhere fails the payload and yields no samples.
///
/// ```
/// use weighin_types::{Granularity, HealthMetricsPayload, parse_energy};
///
/// let payload: HealthMetricsPayload = serde_json::from_str(r#"{
///     "data": {"metrics": [{
///         "name": "active_energy",
///         "units": "kJ",
///         "data": [{"date": "2024-05-01 00:00:00 +1000", "qty": 650.0}]
///     }]}
/// }"#).unwrap();
///
/// let samples = parse_energy(&payload, Granularity::Daily).unwrap();
/// assert_eq!(samples.len(), 1);
/// assert_eq!(samples[0].kilojoules, 650.0);
/// ```
pub fn parse_energy(
    payload: &HealthMetricsPayload,
    granularity: Granularity,
) -> ParseResult<Vec<EnergySample>> {
    let mut samples = Vec::new();

    for metric in &payload.data.metrics {
        if metric.units != KILOJOULES {
            return Err(ParseError::UnknownUnit {
                metric: metric.name.clone(),
                unit: metric.units.clone(),
            });
        }

        let kind = EnergyKind::from_metric_name(&metric.name)
            .ok_or_else(|| ParseError::UnknownMetric(metric.name.clone()))?;

        for point in &metric.data {
            samples.push(EnergySample {
                kind,
                granularity,
                kilojoules: point.qty,
                measured_at: parse_metric_timestamp(&point.date)?,
            });
        }
    }

    Ok(samples)
}
