//! Server Policy Store
//!
//! Per-server operator overrides and threshold enforcement, persisted in
//! the cold store one row per server. Read-modify-write cycles go through
//! single-row updates; the violation counter is bumped atomically in SQL.

use sqlx::PgPool;
use tracing::{info, warn};

use vane_common::{MetricSample, ServerPolicy};

use crate::db;

/// Policy operations over the cold store.
///
/// Admin-facing methods return `sqlx::Result` so the HTTP surface can
/// report storage failures; the ingest/engine paths use the best-effort
/// wrappers at the bottom.
#[derive(Clone)]
pub struct PolicyStore {
    db: PgPool,
}

impl PolicyStore {
    #[must_use]
    pub const fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Fetch the policy for one server, if a record exists.
    pub async fn get(&self, server_id: &str) -> sqlx::Result<Option<ServerPolicy>> {
        db::get_policy(&self.db, server_id).await
    }

    /// Fetch the policy for one server, creating the default record first
    /// if none exists.
    pub async fn get_or_default(&self, server_id: &str) -> sqlx::Result<ServerPolicy> {
        db::create_default_policy_if_absent(&self.db, server_id).await
    }

    /// All policy records, ordered by server id.
    pub async fn list(&self) -> sqlx::Result<Vec<ServerPolicy>> {
        db::list_policies(&self.db).await
    }

    /// Pin a fixed weight in [0, 100]; disables dynamic weighting.
    pub async fn set_fixed_weight(
        &self,
        server_id: &str,
        weight: i32,
    ) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::set_fixed_weight(&self.db, server_id, weight).await?;
        self.get_or_default(server_id).await
    }

    /// Re-enable dynamic weighting; clears any fixed weight.
    pub async fn enable_dynamic(&self, server_id: &str) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::enable_dynamic_weight(&self.db, server_id).await?;
        self.get_or_default(server_id).await
    }

    /// Replace the configured threshold limits (absent values clear them).
    pub async fn set_thresholds(
        &self,
        server_id: &str,
        max_response_time_ms: Option<f64>,
        max_error_rate_pct: Option<f64>,
        min_success_rate_pct: Option<f64>,
        max_timeout_rate_pct: Option<f64>,
        min_uptime_pct: Option<f64>,
    ) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::set_thresholds(
            &self.db,
            server_id,
            max_response_time_ms,
            max_error_rate_pct,
            min_success_rate_pct,
            max_timeout_rate_pct,
            min_uptime_pct,
        )
        .await?;
        self.get_or_default(server_id).await
    }

    /// Enable threshold-driven automatic removal.
    pub async fn enable_auto_removal(
        &self,
        server_id: &str,
        max_violations: i32,
    ) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::enable_auto_removal(&self.db, server_id, max_violations).await?;
        self.get_or_default(server_id).await
    }

    /// Disable automatic removal; resets the violation counter.
    pub async fn disable_auto_removal(&self, server_id: &str) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::disable_auto_removal(&self.db, server_id).await?;
        self.get_or_default(server_id).await
    }

    /// Pin the server out of rotation.
    pub async fn manually_remove(&self, server_id: &str) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::set_manually_removed(&self.db, server_id).await?;
        self.get_or_default(server_id).await
    }

    /// Return the server to rotation; resets the violation counter.
    pub async fn reenable(&self, server_id: &str) -> sqlx::Result<ServerPolicy> {
        self.get_or_default(server_id).await?;
        db::reenable_server(&self.db, server_id).await?;
        self.get_or_default(server_id).await
    }

    /// Drop every policy record. Defaults are recreated on demand.
    pub async fn reset_all(&self) -> sqlx::Result<u64> {
        db::reset_all_policies(&self.db).await
    }

    // ========================================================================
    // Best-effort paths used by ingest and the weight engine
    // ========================================================================

    /// Every policy record keyed by server id; empty on storage failure.
    pub async fn load_all(&self) -> std::collections::HashMap<String, ServerPolicy> {
        match self.list().await {
            Ok(policies) => policies
                .into_iter()
                .map(|p| (p.server_id.clone(), p))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to load server policies, applying none");
                std::collections::HashMap::new()
            }
        }
    }

    /// Evaluate an accepted sample against the server's thresholds.
    ///
    /// A violating sample bumps the consecutive-violation counter and, with
    /// auto-removal enabled, removes the server once the counter reaches its
    /// limit. A clean sample resets a non-zero counter (hysteresis).
    pub async fn evaluate_thresholds(&self, sample: &MetricSample) {
        let policy = match self.get(&sample.server_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => return,
            Err(e) => {
                warn!(server_id = %sample.server_id, error = %e, "Failed to load policy for threshold check");
                return;
            }
        };

        if policy.has_thresholds() && policy.violates(sample) {
            let updated = match db::record_violation(&self.db, &sample.server_id).await {
                Ok(Some(updated)) => updated,
                Ok(None) => return,
                Err(e) => {
                    warn!(server_id = %sample.server_id, error = %e, "Failed to record threshold violation");
                    return;
                }
            };
            warn!(
                server_id = %sample.server_id,
                violations = updated.violations_count,
                limit = updated.max_violations_before_removal,
                "Threshold violation recorded"
            );
            if updated.auto_removal_enabled
                && !updated.manually_removed
                && updated.violations_count >= updated.max_violations_before_removal
            {
                match db::set_manually_removed(&self.db, &sample.server_id).await {
                    Ok(_) => info!(
                        server_id = %sample.server_id,
                        violations = updated.violations_count,
                        "Server removed from rotation after repeated violations"
                    ),
                    Err(e) => warn!(
                        server_id = %sample.server_id,
                        error = %e,
                        "Failed to auto-remove server"
                    ),
                }
            }
        } else if policy.violations_count > 0 {
            if let Err(e) = db::clear_violations(&self.db, &sample.server_id).await {
                warn!(server_id = %sample.server_id, error = %e, "Failed to reset violation counter");
            }
        }
    }
}
