//! Admin API Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use vane_common::{InstanceHeartbeat, WeightAllocation, WeightFactors};

/// Uniform `{status, message}` acknowledgement for admin mutations.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

impl StatusResponse {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok",
            message: message.into(),
        }
    }
}

/// Body for pinning a fixed weight.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct FixedWeightRequest {
    #[validate(range(min = 0, max = 100))]
    pub weight: i32,
}

/// Body for replacing a server's threshold limits; absent fields clear
/// the corresponding limit.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct ThresholdsRequest {
    #[validate(range(min = 0.0))]
    pub max_response_time_ms: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_error_rate_pct: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_success_rate_pct: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_timeout_rate_pct: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_uptime_pct: Option<f64>,
}

/// Body for switching threshold-driven automatic removal.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct AutoRemovalRequest {
    pub enabled: bool,
    /// Violations tolerated before removal; only meaningful when enabling.
    #[validate(range(min = 1))]
    pub max_violations: Option<i32>,
}

/// Shared-state dashboard: what the fleet currently agrees on.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StateDashboard {
    /// This instance's id.
    pub instance_id: String,
    /// Instances with unexpired heartbeats.
    pub active_instances: Vec<InstanceHeartbeat>,
    /// Most recently published allocation list, if any.
    pub weights: Option<Vec<WeightAllocation>>,
    /// When weights were last published, by any instance.
    pub weights_updated_at: Option<DateTime<Utc>>,
    /// When the proxy config was last published, by any instance.
    pub proxy_config_updated_at: Option<DateTime<Utc>>,
    /// When this instance last applied a proxy config locally.
    pub local_applied_at: Option<DateTime<Utc>>,
    /// The factors the next cycle will score with.
    pub factors: WeightFactors,
}
