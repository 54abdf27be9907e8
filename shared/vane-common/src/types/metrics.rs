//! Metric Sample Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Response-time contribution to the degradation score is capped here.
pub const DEGRADATION_RT_CAP_MS: f64 = 500.0;

/// One health/performance observation for a backend server.
///
/// Created by the ingestor, immutable thereafter. Lives in the hot store
/// under a TTL and in the cold store for the retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MetricSample {
    /// Server this sample belongs to.
    pub server_id: String,
    /// Instantaneous average response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Error rate percentage in [0, 100].
    pub error_rate_pct: f64,
    /// Success rate percentage in [0, 100].
    pub success_rate_pct: f64,
    /// Timeout rate percentage in [0, 100].
    pub timeout_rate_pct: f64,
    /// Uptime percentage in [0, 100].
    pub uptime_pct: f64,
    /// Median latency in milliseconds, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p50: Option<f64>,
    /// 95th-percentile latency in milliseconds, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p95: Option<f64>,
    /// 99th-percentile latency in milliseconds, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p99: Option<f64>,
    /// Request volume over the reporting window, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<f64>,
    /// Epoch seconds of the source's reporting window.
    pub window_timestamp: i64,
    /// Assigned by the ingestor on accept.
    pub created_at: DateTime<Utc>,
    /// Smoothed latency, derived on ingest from the previous sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ewma_latency_ms: Option<f64>,
    /// Composite degradation score, derived at persist time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation_score: Option<f64>,
}

impl MetricSample {
    /// The latency used for scoring and threshold checks: the EWMA when
    /// present, the instantaneous average otherwise.
    #[must_use]
    pub fn effective_latency_ms(&self) -> f64 {
        self.ewma_latency_ms.unwrap_or(self.avg_response_time_ms)
    }

    /// Composite degradation score:
    /// `min(500, rt) + 20 * error% + 20 * timeout% + 2 * (100 - uptime%)`.
    #[must_use]
    pub fn degradation(&self) -> f64 {
        self.avg_response_time_ms.min(DEGRADATION_RT_CAP_MS)
            + 20.0 * self.error_rate_pct
            + 20.0 * self.timeout_rate_pct
            + 2.0 * (100.0 - self.uptime_pct)
    }

    /// Whether the sample is newer than `now - max_age_secs`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        (now - self.created_at).num_seconds() < max_age_secs
    }

    /// Whether every field required for scoring is a finite, in-range number.
    #[must_use]
    pub fn has_valid_metrics(&self) -> bool {
        self.validate_ranges().is_ok()
    }

    /// Validate numeric ranges. Rates must fall within [0, 100]; latencies
    /// and volumes must be non-negative.
    pub fn validate_ranges(&self) -> Result<()> {
        let pct = |label: &str, v: f64| -> Result<()> {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(Error::Validation(format!(
                    "{label} must be within [0, 100], got {v}"
                )));
            }
            Ok(())
        };
        let non_negative = |label: &str, v: f64| -> Result<()> {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Validation(format!(
                    "{label} must be non-negative, got {v}"
                )));
            }
            Ok(())
        };

        non_negative("avg_response_time_ms", self.avg_response_time_ms)?;
        pct("error_rate_pct", self.error_rate_pct)?;
        pct("success_rate_pct", self.success_rate_pct)?;
        pct("timeout_rate_pct", self.timeout_rate_pct)?;
        pct("uptime_pct", self.uptime_pct)?;
        for (label, value) in [
            ("latency_p50", self.latency_p50),
            ("latency_p95", self.latency_p95),
            ("latency_p99", self.latency_p99),
            ("requests_per_minute", self.requests_per_minute),
        ] {
            if let Some(v) = value {
                non_negative(label, v)?;
            }
        }
        Ok(())
    }
}
