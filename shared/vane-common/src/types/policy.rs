//! Per-Server Policy Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::MetricSample;

/// Default number of consecutive violations before auto-removal.
pub const DEFAULT_MAX_VIOLATIONS: i32 = 3;

/// Per-server policy record: operator overrides and threshold-driven
/// automatic disabling.
///
/// Persisted one row per server; the decision logic lives here so the
/// weight engine can apply overrides without touching storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ServerPolicy {
    /// Server this policy applies to (unique).
    pub server_id: String,
    /// When true (the default) the server receives its calculated weight.
    pub dynamic_weight_enabled: bool,
    /// Operator-pinned weight in [0, 100]. Setting it disables dynamic
    /// weighting; re-enabling dynamic clears it.
    pub fixed_weight: Option<i32>,
    /// Response-time ceiling in milliseconds (compared against effective
    /// latency), if configured.
    pub max_response_time_ms: Option<f64>,
    /// Error-rate ceiling in percent, if configured.
    pub max_error_rate_pct: Option<f64>,
    /// Success-rate floor in percent, if configured.
    pub min_success_rate_pct: Option<f64>,
    /// Timeout-rate ceiling in percent, if configured.
    pub max_timeout_rate_pct: Option<f64>,
    /// Uptime floor in percent, if configured.
    pub min_uptime_pct: Option<f64>,
    /// Consecutive threshold violations observed so far.
    pub violations_count: i32,
    /// Violations tolerated before auto-removal triggers.
    pub max_violations_before_removal: i32,
    /// Whether threshold violations may remove the server automatically.
    pub auto_removal_enabled: bool,
    /// Operator- or auto-removal pin; forces weight 0.
    pub manually_removed: bool,
    /// Timestamp of the most recent violation.
    pub last_violation_at: Option<DateTime<Utc>>,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ServerPolicy {
    /// A fresh default policy for `server_id`: dynamic weighting on, no
    /// thresholds, nothing removed.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            server_id: server_id.into(),
            dynamic_weight_enabled: true,
            fixed_weight: None,
            max_response_time_ms: None,
            max_error_rate_pct: None,
            min_success_rate_pct: None,
            max_timeout_rate_pct: None,
            min_uptime_pct: None,
            violations_count: 0,
            max_violations_before_removal: DEFAULT_MAX_VIOLATIONS,
            auto_removal_enabled: false,
            manually_removed: false,
            last_violation_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The weight this server actually receives, given the engine's
    /// calculated value:
    /// removed servers get 0, pinned servers get their fixed weight,
    /// everything else keeps the calculated weight.
    #[must_use]
    pub fn effective_weight(&self, calculated: u32) -> u32 {
        if self.manually_removed {
            return 0;
        }
        if !self.dynamic_weight_enabled {
            if let Some(fixed) = self.fixed_weight {
                return fixed.clamp(0, 100) as u32;
            }
        }
        calculated
    }

    /// Whether any threshold is configured at all.
    #[must_use]
    pub const fn has_thresholds(&self) -> bool {
        self.max_response_time_ms.is_some()
            || self.max_error_rate_pct.is_some()
            || self.min_success_rate_pct.is_some()
            || self.max_timeout_rate_pct.is_some()
            || self.min_uptime_pct.is_some()
    }

    /// Whether `sample` violates any configured threshold. The
    /// response-time comparison uses the sample's effective latency.
    #[must_use]
    pub fn violates(&self, sample: &MetricSample) -> bool {
        if let Some(max_rt) = self.max_response_time_ms {
            if sample.effective_latency_ms() > max_rt {
                return true;
            }
        }
        if let Some(max_err) = self.max_error_rate_pct {
            if sample.error_rate_pct > max_err {
                return true;
            }
        }
        if let Some(min_succ) = self.min_success_rate_pct {
            if sample.success_rate_pct < min_succ {
                return true;
            }
        }
        if let Some(max_to) = self.max_timeout_rate_pct {
            if sample.timeout_rate_pct > max_to {
                return true;
            }
        }
        if let Some(min_up) = self.min_uptime_pct {
            if sample.uptime_pct < min_up {
                return true;
            }
        }
        false
    }
}
