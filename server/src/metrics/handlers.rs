//! Metric Submission Handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use vane_common::MetricSample;

use super::IngestError;
use crate::api::AppState;

/// Inbound sample body for `POST /api/metrics/server/{server_id}`.
///
/// A `server_id` in the body is ignored; the path parameter is
/// authoritative.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct IngestRequest {
    #[validate(range(min = 0.0))]
    pub avg_response_time_ms: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub error_rate_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub success_rate_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub timeout_rate_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub uptime_pct: f64,
    #[validate(range(min = 0.0))]
    pub latency_p50: Option<f64>,
    #[validate(range(min = 0.0))]
    pub latency_p95: Option<f64>,
    #[validate(range(min = 0.0))]
    pub latency_p99: Option<f64>,
    #[validate(range(min = 0.0))]
    pub requests_per_minute: Option<f64>,
    /// Epoch seconds of the source's reporting window; defaults to now.
    pub window_timestamp: Option<i64>,
    /// Ignored; the URL decides which server the sample belongs to.
    #[serde(default)]
    pub server_id: Option<String>,
}

impl IngestRequest {
    /// Build the domain sample for the path-supplied server. The derived
    /// fields are filled in by the ingestor.
    #[must_use]
    pub fn into_sample(self, server_id: &str, now: DateTime<Utc>) -> MetricSample {
        MetricSample {
            server_id: server_id.to_string(),
            avg_response_time_ms: self.avg_response_time_ms,
            error_rate_pct: self.error_rate_pct,
            success_rate_pct: self.success_rate_pct,
            timeout_rate_pct: self.timeout_rate_pct,
            uptime_pct: self.uptime_pct,
            latency_p50: self.latency_p50,
            latency_p95: self.latency_p95,
            latency_p99: self.latency_p99,
            requests_per_minute: self.requests_per_minute,
            window_timestamp: self.window_timestamp.unwrap_or_else(|| now.timestamp()),
            created_at: now,
            ewma_latency_ms: None,
            degradation_score: None,
        }
    }
}

/// Acknowledgement returned for an accepted sample.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub status: &'static str,
    pub message: String,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub instant_latency: f64,
    pub ewma_latency: f64,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownServer(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(serde_json::json!({ "status": "error", "message": self.to_string() })),
        )
            .into_response()
    }
}

/// Accept one health sample for a backend server.
#[utoipa::path(
    post,
    path = "/api/metrics/server/{server_id}",
    tag = "metrics",
    params(("server_id" = String, Path, description = "Backend server id")),
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Sample accepted", body = IngestResponse),
        (status = 400, description = "Payload failed validation"),
        (status = 404, description = "Unknown server id"),
    ),
)]
#[tracing::instrument(skip(state, body), fields(server_id = %server_id))]
pub async fn submit_metrics(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, IngestError> {
    body.validate()
        .map_err(|e| IngestError::Validation(e.to_string()))?;

    let sample = body.into_sample(&server_id, Utc::now());
    let outcome = state.ingestor.ingest(sample).await?;

    Ok(Json(IngestResponse {
        status: "ok",
        message: "Metrics recorded".into(),
        server_id: outcome.server_id,
        timestamp: outcome.created_at,
        instant_latency: outcome.instant_latency_ms,
        ewma_latency: outcome.ewma_latency_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IngestRequest {
        IngestRequest {
            avg_response_time_ms: 120.0,
            error_rate_pct: 1.0,
            success_rate_pct: 99.0,
            timeout_rate_pct: 0.0,
            uptime_pct: 99.9,
            latency_p50: Some(100.0),
            latency_p95: Some(250.0),
            latency_p99: None,
            requests_per_minute: Some(600.0),
            window_timestamp: None,
            server_id: Some("spoofed".into()),
        }
    }

    #[test]
    fn body_validation_accepts_sane_sample() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn body_validation_rejects_out_of_range() {
        let mut bad = request();
        bad.error_rate_pct = 120.0;
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.avg_response_time_ms = -1.0;
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.latency_p50 = Some(-10.0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn path_id_overrides_body_id() {
        let now = Utc::now();
        let sample = request().into_sample("real-server", now);
        assert_eq!(sample.server_id, "real-server");
        assert_eq!(sample.created_at, now);
        assert_eq!(sample.window_timestamp, now.timestamp());
        assert!(sample.ewma_latency_ms.is_none());
    }

    #[test]
    fn explicit_window_timestamp_is_kept() {
        let mut req = request();
        req.window_timestamp = Some(1_700_000_000);
        let sample = req.into_sample("s1", Utc::now());
        assert_eq!(sample.window_timestamp, 1_700_000_000);
    }
}
