//! Database Models
//!
//! Row types mapping cold-store tables onto the shared domain types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use vane_common::{MetricSample, ServerPolicy};

/// One row of `metric_samples`.
#[derive(Debug, Clone, FromRow)]
pub struct MetricSampleRow {
    pub server_id: String,
    pub avg_response_time_ms: f64,
    pub error_rate_pct: f64,
    pub success_rate_pct: f64,
    pub timeout_rate_pct: f64,
    pub uptime_pct: f64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub latency_p99: Option<f64>,
    pub requests_per_minute: Option<f64>,
    pub window_timestamp: i64,
    pub created_at: DateTime<Utc>,
    pub ewma_latency_ms: Option<f64>,
    pub degradation_score: Option<f64>,
}

impl From<MetricSampleRow> for MetricSample {
    fn from(row: MetricSampleRow) -> Self {
        Self {
            server_id: row.server_id,
            avg_response_time_ms: row.avg_response_time_ms,
            error_rate_pct: row.error_rate_pct,
            success_rate_pct: row.success_rate_pct,
            timeout_rate_pct: row.timeout_rate_pct,
            uptime_pct: row.uptime_pct,
            latency_p50: row.latency_p50,
            latency_p95: row.latency_p95,
            latency_p99: row.latency_p99,
            requests_per_minute: row.requests_per_minute,
            window_timestamp: row.window_timestamp,
            created_at: row.created_at,
            ewma_latency_ms: row.ewma_latency_ms,
            degradation_score: row.degradation_score,
        }
    }
}

/// One row of `server_policies`.
#[derive(Debug, Clone, FromRow)]
pub struct ServerPolicyRow {
    pub server_id: String,
    pub dynamic_weight_enabled: bool,
    pub fixed_weight: Option<i32>,
    pub max_response_time_ms: Option<f64>,
    pub max_error_rate_pct: Option<f64>,
    pub min_success_rate_pct: Option<f64>,
    pub max_timeout_rate_pct: Option<f64>,
    pub min_uptime_pct: Option<f64>,
    pub violations_count: i32,
    pub max_violations_before_removal: i32,
    pub auto_removal_enabled: bool,
    pub manually_removed: bool,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServerPolicyRow> for ServerPolicy {
    fn from(row: ServerPolicyRow) -> Self {
        Self {
            server_id: row.server_id,
            dynamic_weight_enabled: row.dynamic_weight_enabled,
            fixed_weight: row.fixed_weight,
            max_response_time_ms: row.max_response_time_ms,
            max_error_rate_pct: row.max_error_rate_pct,
            min_success_rate_pct: row.min_success_rate_pct,
            max_timeout_rate_pct: row.max_timeout_rate_pct,
            min_uptime_pct: row.min_uptime_pct,
            violations_count: row.violations_count,
            max_violations_before_removal: row.max_violations_before_removal,
            auto_removal_enabled: row.auto_removal_enabled,
            manually_removed: row.manually_removed,
            last_violation_at: row.last_violation_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
