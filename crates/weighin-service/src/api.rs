//! HTTP endpoints for weighin-service.
//!
//! Two groups of routes share one router:
//!
//! - **Ingestion**: `/receive` (Fitbit subscriber webhook and its
//!   verification), `/batch` (range backfill) and `/health` (health-metrics
//!   exporter). These keep the plain responses the upstream callers expect.
//! - **Dashboard**: `/api/*` JSON endpoints reading the local store.
//!
//! ## Error Handling
//!
//! Every endpoint returns failures as `{"error": "..."}` via [`AppError`].
//! Bad input maps to 400, provider failures to 502 and storage or
//! credential failures to 500.
//!
//! # Example
//!
//! ```ignore
//! use weighin_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::{Date, OffsetDateTime};
use tracing::{debug, error, info, warn};

use weighin_store::{EnergyQuery, StoredEnergy, StoredWeight, WeightQuery};
use weighin_types::{
    EnergyKind, Granularity, HealthMetricsPayload, Notification, ParseError, parse_date,
};

use crate::state::AppState;

/// Header carrying the aggregation period of a health-metrics delivery.
pub const PERIOD_HEADER: &str = "period";

/// Upper bound on `limit` for list endpoints.
pub const MAX_LIMIT: u32 = 10_000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/weights", get(get_weights))
        .route("/api/energy", get(get_energy))
        .route("/receive", get(verify_subscriber).post(receive_notifications))
        .route("/batch", get(batch_sync))
        .route("/health", post(ingest_health_metrics))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Query parameters of the subscriber verification request.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub verify: Option<String>,
}

/// Answer Fitbit's subscriber verification.
///
/// Fitbit expects 204 for the correct code and 404 for anything else.
async fn verify_subscriber(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> StatusCode {
    let expected = state.config.fitbit.verification_code.as_bytes();
    let given = query.verify.unwrap_or_default();

    let matches: bool = given.as_bytes().ct_eq(expected).into();
    if !expected.is_empty() && matches {
        info!("Subscriber verification succeeded");
        StatusCode::NO_CONTENT
    } else {
        warn!("Subscriber verification failed");
        StatusCode::NOT_FOUND
    }
}

/// Re-sync every day named by a webhook delivery.
async fn receive_notifications(
    State(state): State<Arc<AppState>>,
    Json(notifications): Json<Vec<Notification>>,
) -> Result<StatusCode, AppError> {
    debug!("Received {} notifications", notifications.len());
    let sync = state.weight_sync().await?;
    let applied = sync.sync_notifications(&notifications).await?;
    info!(
        "Processed {} notifications: {} weights written",
        notifications.len(),
        applied
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for a range backfill.
#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl BatchQuery {
    /// Parse both dates; either missing or malformed is a bad request.
    pub fn validate(&self) -> Result<(Date, Date), AppError> {
        let start = required_date("start", self.start.as_deref())?;
        let end = required_date("end", self.end.as_deref())?;
        Ok((start, end))
    }
}

fn required_date(name: &str, value: Option<&str>) -> Result<Date, AppError> {
    let value = value.ok_or_else(|| AppError::BadRequest(format!("Missing '{}' date", name)))?;
    Ok(parse_date(value)?)
}

/// Backfill a date range month by month.
async fn batch_sync(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
) -> Result<String, AppError> {
    let (start, end) = query.validate()?;
    let sync = state.weight_sync().await?;
    let applied = sync.sync_range(start, end).await?;
    Ok(format!("{} weights loaded", applied))
}

/// Ingest a health-metrics delivery.
async fn ingest_health_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<HealthMetricsPayload>,
) -> Result<&'static str, AppError> {
    let period = headers
        .get(PERIOD_HEADER)
        .and_then(|value| value.to_str().ok());
    let granularity = Granularity::from_period(period)?;

    state.energy.ingest(&payload, granularity).await?;
    Ok("ok")
}

/// Query parameters for the weight series.
#[derive(Debug, Default, Deserialize)]
pub struct WeightsQuery {
    /// First day to include, `YYYY-MM-DD`.
    pub since: Option<String>,
    /// Last day to include, `YYYY-MM-DD`.
    pub until: Option<String>,
    pub limit: Option<u32>,
}

impl WeightsQuery {
    /// Validate the parameters and build a store query.
    pub fn validate(&self) -> Result<WeightQuery, AppError> {
        let (since, until) = date_bounds(self.since.as_deref(), self.until.as_deref())?;
        let mut query = WeightQuery::new();
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        if let Some(limit) = validate_limit(self.limit)? {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

/// Dashboard weight response.
#[derive(Debug, Serialize)]
pub struct WeightsResponse {
    /// Most recent weight in the store, regardless of filters.
    pub latest: StoredWeight,
    pub count: usize,
    /// Matching weights, newest first.
    pub weights: Vec<StoredWeight>,
}

async fn get_weights(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeightsQuery>,
) -> Result<Json<WeightsResponse>, AppError> {
    let query = query.validate()?;

    let store = state.backend.lock().await;
    let latest = store
        .latest_weight()?
        .ok_or_else(|| AppError::NotFound("No weights stored".to_string()))?;
    let weights = store.query_weights(&query)?;

    Ok(Json(WeightsResponse {
        latest,
        count: weights.len(),
        weights,
    }))
}

/// Query parameters for energy records.
#[derive(Debug, Default, Deserialize)]
pub struct EnergyParams {
    /// `active-energy`, `resting-energy` or `dietary-energy`.
    pub kind: Option<String>,
    /// `daily` or `intraday`.
    pub granularity: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<u32>,
}

impl EnergyParams {
    /// Validate the parameters and build a store query.
    pub fn validate(&self) -> Result<EnergyQuery, AppError> {
        let mut query = EnergyQuery::new();

        if let Some(kind) = self.kind.as_deref() {
            let kind = EnergyKind::from_storage_name(kind)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown energy kind '{}'", kind)))?;
            query = query.kind(kind);
        }
        if let Some(granularity) = self.granularity.as_deref() {
            query = query.granularity(Granularity::from_period(Some(granularity))?);
        }

        let (since, until) = date_bounds(self.since.as_deref(), self.until.as_deref())?;
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        if let Some(limit) = validate_limit(self.limit)? {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

/// Energy records response.
#[derive(Debug, Serialize)]
pub struct EnergyResponse {
    pub count: usize,
    pub energy: Vec<StoredEnergy>,
}

async fn get_energy(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EnergyParams>,
) -> Result<Json<EnergyResponse>, AppError> {
    let query = params.validate()?;
    let energy = state.backend.lock().await.query_energy(&query)?;
    Ok(Json(EnergyResponse {
        count: energy.len(),
        energy,
    }))
}

fn date_bounds(
    since: Option<&str>,
    until: Option<&str>,
) -> Result<(Option<Date>, Option<Date>), AppError> {
    let since = since.map(parse_date).transpose()?;
    let until = until.map(parse_date).transpose()?;
    if let (Some(since), Some(until)) = (since, until)
        && since > until
    {
        return Err(AppError::BadRequest(format!(
            "Invalid date range: 'since' ({}) must not be after 'until' ({})",
            since, until
        )));
    }
    Ok((since, until))
}

fn validate_limit(limit: Option<u32>) -> Result<Option<u32>, AppError> {
    match limit {
        Some(0) => Err(AppError::BadRequest("'limit' must be at least 1".to_string())),
        Some(limit) if limit > MAX_LIMIT => Err(AppError::BadRequest(format!(
            "'limit' must be at most {}",
            MAX_LIMIT
        ))),
        other => Ok(other),
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Core(weighin_core::Error),
    Store(weighin_store::Error),
}

impl From<weighin_core::Error> for AppError {
    fn from(e: weighin_core::Error) -> Self {
        AppError::Core(e)
    }
}

impl From<weighin_store::Error> for AppError {
    fn from(e: weighin_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<ParseError> for AppError {
    fn from(e: ParseError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(e) if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Core(e) if e.is_upstream() => {
                error!("Upstream failure: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Core(e) => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Store(e) => {
                error!("Store failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use weighin_core::SqliteBackend;
    use weighin_core::mock::MockProvider;
    use weighin_types::WeightObservation;

    use crate::config::Config;

    fn observation(log_id: i64, date: &str, weight: f64) -> WeightObservation {
        WeightObservation {
            log_id,
            date: date.to_string(),
            time: "07:12:45".to_string(),
            weight,
        }
    }

    fn create_test_state_with(provider: Arc<MockProvider>) -> Arc<AppState> {
        let mut config = Config::default();
        config.fitbit.verification_code = "abc123".to_string();
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        AppState::with_provider(config, backend, provider).unwrap()
    }

    fn create_test_state() -> Arc<AppState> {
        create_test_state_with(Arc::new(MockProvider::with_observations(vec![
            observation(1, "2024-01-15", 80.4),
            observation(2, "2024-02-10", 79.8),
            observation(3, "2024-03-01", 79.1),
        ])))
    }

    async fn response_body(response: axum::response::Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
        router()
            .with_state(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(
        state: &Arc<AppState>,
        uri: &str,
        period: Option<&str>,
        body: serde_json::Value,
    ) -> axum::response::Response {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(period) = period {
            request = request.header(PERIOD_HEADER, period);
        }
        router()
            .with_state(state.clone())
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }

    fn energy_payload(units: &str) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "metrics": [{
                    "name": "active_energy",
                    "units": units,
                    "data": [
                        {"date": "2024-01-15 00:00:00 +1000", "qty": 1800.5},
                        {"date": "2024-01-16 00:00:00 +1000", "qty": 2100.0}
                    ]
                }]
            }
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let response = get(&state, "/api/health").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
    }

    #[tokio::test]
    async fn test_verify_subscriber() {
        let state = create_test_state();

        let ok = get(&state, "/receive?verify=abc123").await;
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);

        let wrong = get(&state, "/receive?verify=abc124").await;
        assert_eq!(wrong.status(), StatusCode::NOT_FOUND);

        let missing = get(&state, "/receive").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_without_configured_code() {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let state =
            AppState::with_provider(Config::default(), backend, Arc::new(MockProvider::new()))
                .unwrap();

        let response = get(&state, "/receive?verify=").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_receive_syncs_named_day() {
        let state = create_test_state();
        let notifications = serde_json::json!([
            {"collectionType": "body", "date": "2024-01-15", "ownerId": "228S74", "ownerType": "user", "subscriptionId": "1"},
            {"collectionType": "foods", "date": "2024-02-10", "ownerId": "228S74", "ownerType": "user", "subscriptionId": "1"}
        ]);

        let response = post_json(&state, "/receive", None, notifications).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let store = state.backend.lock().await;
        assert_eq!(store.count_weights().unwrap(), 1);
        assert!(store.get_weight(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_receive_redelivery_stores_one_row() {
        let state = create_test_state_with(Arc::new(MockProvider::with_observations(vec![
            observation(12345, "2024-01-15", 80.4),
        ])));
        let notifications = serde_json::json!([
            {"collectionType": "body", "date": "2024-01-15", "ownerId": "228S74", "ownerType": "user", "subscriptionId": "1"}
        ]);

        let first = post_json(&state, "/receive", None, notifications.clone()).await;
        let second = post_json(&state, "/receive", None, notifications).await;

        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        assert_eq!(second.status(), StatusCode::NO_CONTENT);
        let store = state.backend.lock().await;
        assert_eq!(store.count_weights().unwrap(), 1);
        let stored = store.get_weight(12345).unwrap().unwrap();
        assert_eq!(stored.weight, 80.4);
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_date() {
        let state = create_test_state();
        let notifications = serde_json::json!([
            {"date": "2024-13-45", "subscriptionId": "1"}
        ]);

        let response = post_json(&state, "/receive", None, notifications).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response_body(response).await.contains("Invalid date"));
        assert_eq!(state.backend.lock().await.count_weights().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_loads_range() {
        let state = create_test_state();

        let response = get(&state, "/batch?start=2024-01-10&end=2024-02-20").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body(response).await, "2 weights loaded");
        assert_eq!(state.backend.lock().await.count_weights().unwrap(), 2);

        // Re-running the same range writes nothing new
        let again = get(&state, "/batch?start=2024-01-10&end=2024-02-20").await;
        assert_eq!(response_body(again).await, "0 weights loaded");
    }

    #[tokio::test]
    async fn test_batch_validation() {
        let state = create_test_state();

        let missing = get(&state, "/batch?start=2024-01-10").await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let malformed = get(&state, "/batch?start=2024-01-10&end=soon").await;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let inverted = get(&state, "/batch?start=2024-03-10&end=2024-01-15").await;
        assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);
        assert!(response_body(inverted).await.contains("error"));
    }

    #[tokio::test]
    async fn test_batch_provider_failure_is_bad_gateway() {
        let provider = Arc::new(MockProvider::new());
        provider.set_should_fail(true);
        let state = create_test_state_with(provider);

        let response = get(&state, "/batch?start=2024-01-10&end=2024-02-20").await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_health_metrics_ingest() {
        let state = create_test_state();

        let response = post_json(&state, "/health", Some("daily"), energy_payload("kJ")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body(response).await, "ok");
        assert_eq!(state.backend.lock().await.count_energy(None).unwrap(), 2);

        let listed = get(&state, "/api/energy?kind=active-energy&granularity=daily").await;
        assert_eq!(listed.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&response_body(listed).await).unwrap();
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_health_metrics_validation() {
        let state = create_test_state();

        let bad_unit = post_json(&state, "/health", Some("daily"), energy_payload("kcal")).await;
        assert_eq!(bad_unit.status(), StatusCode::BAD_REQUEST);

        let no_period = post_json(&state, "/health", None, energy_payload("kJ")).await;
        assert_eq!(no_period.status(), StatusCode::BAD_REQUEST);

        let bad_period = post_json(&state, "/health", Some("weekly"), energy_payload("kJ")).await;
        assert_eq!(bad_period.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.backend.lock().await.count_energy(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_weights_endpoint() {
        let state = create_test_state();

        let empty = get(&state, "/api/weights").await;
        assert_eq!(empty.status(), StatusCode::NOT_FOUND);

        get(&state, "/batch?start=2024-01-01&end=2024-03-31").await;

        let response = get(&state, "/api/weights?since=2024-02-01&limit=10").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(body["latest"]["log_id"], 3);
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_query_validation() {
        let state = create_test_state();

        let inverted = get(&state, "/api/weights?since=2024-03-01&until=2024-01-01").await;
        assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);

        let zero = get(&state, "/api/energy?limit=0").await;
        assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

        let kind = get(&state, "/api/energy?kind=steps").await;
        assert_eq!(kind.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_app_error_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                AppError::Core(weighin_core::Error::Unauthorized),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::Core(weighin_core::Error::secret("unavailable")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Core(weighin_core::Error::InvalidRange {
                    start: "2024-02-01".into(),
                    end: "2024-01-01".into(),
                }),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
