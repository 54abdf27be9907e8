//! Weight Allocation Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tolerance on the factor-sum constraint.
pub const FACTOR_SUM_TOLERANCE: f64 = 0.01;

/// One server's share of a pool's traffic for one calculation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WeightAllocation {
    /// Server this allocation belongs to.
    pub server_id: String,
    /// Backend address (`host` or `host:port`).
    pub address: String,
    /// Integer traffic weight in [0, 100]. Zero means inactive.
    pub weight: u32,
    /// Composite health score in [0, 1].
    pub health_score: f64,
    /// Human-readable explanation of how the weight was derived.
    pub reason: String,
    /// When the cycle that produced this allocation ran.
    pub calculated_at: DateTime<Utc>,
}

impl WeightAllocation {
    /// An allocation receives traffic only with a positive weight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.weight > 0
    }
}

/// The five tunable scoring coefficients. Must sum to 1.0 ± 0.01.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WeightFactors {
    /// Coefficient on the response-time sub-score.
    pub response_time: f64,
    /// Coefficient on the error-rate sub-score.
    pub error_rate: f64,
    /// Coefficient on the timeout-rate sub-score.
    pub timeout_rate: f64,
    /// Coefficient on the uptime sub-score.
    pub uptime: f64,
    /// Coefficient on the degradation sub-score.
    pub degradation: f64,
}

impl Default for WeightFactors {
    fn default() -> Self {
        Self::BALANCED
    }
}

impl WeightFactors {
    /// The default preset.
    pub const BALANCED: Self = Self {
        response_time: 0.25,
        error_rate: 0.25,
        timeout_rate: 0.15,
        uptime: 0.20,
        degradation: 0.15,
    };

    /// Latency-first preset.
    pub const PERFORMANCE: Self = Self {
        response_time: 0.40,
        error_rate: 0.20,
        timeout_rate: 0.10,
        uptime: 0.15,
        degradation: 0.15,
    };

    /// Stability-first preset.
    pub const RELIABILITY: Self = Self {
        response_time: 0.15,
        error_rate: 0.30,
        timeout_rate: 0.20,
        uptime: 0.30,
        degradation: 0.05,
    };

    /// Error-minimizing preset.
    pub const ERROR_AVOIDANCE: Self = Self {
        response_time: 0.15,
        error_rate: 0.40,
        timeout_rate: 0.25,
        uptime: 0.15,
        degradation: 0.05,
    };

    /// Names accepted by [`Self::preset`].
    pub const PRESET_NAMES: [&'static str; 4] =
        ["balanced", "performance", "reliability", "errorAvoidance"];

    /// Look up a preset by its public name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(Self::BALANCED),
            "performance" => Some(Self::PERFORMANCE),
            "reliability" => Some(Self::RELIABILITY),
            "errorAvoidance" => Some(Self::ERROR_AVOIDANCE),
            _ => None,
        }
    }

    /// Sum of all five coefficients.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.response_time + self.error_rate + self.timeout_rate + self.uptime + self.degradation
    }

    /// Check the sum-to-one constraint and that every coefficient is a
    /// non-negative finite number.
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.response_time,
            self.error_rate,
            self.timeout_rate,
            self.uptime,
            self.degradation,
        ];
        if all.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(Error::Validation(
                "weight factors must be non-negative finite numbers".into(),
            ));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > FACTOR_SUM_TOLERANCE {
            return Err(Error::Validation(format!(
                "weight factors must sum to 1.0 ± {FACTOR_SUM_TOLERANCE}, got {sum:.4}"
            )));
        }
        Ok(())
    }

    /// Rescale the coefficients so they sum to exactly 1.0. A degenerate
    /// all-zero set resets to the balanced preset.
    pub fn normalize(&mut self) {
        let sum = self.sum();
        if sum <= 0.0 || !sum.is_finite() {
            *self = Self::BALANCED;
            return;
        }
        self.response_time /= sum;
        self.error_rate /= sum;
        self.timeout_rate /= sum;
        self.uptime /= sum;
        self.degradation /= sum;
    }
}
