//! Admin Handlers
//!
//! Runtime operations on pool membership, per-server policies, scoring
//! factors, and the shared state.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use validator::Validate;

use vane_common::{ServerDescriptor, ServerPolicy, WeightFactors};

use super::types::{
    AutoRemovalRequest, FixedWeightRequest, StateDashboard, StatusResponse, ThresholdsRequest,
};
use crate::api::AppState;
use crate::coordinator::{reconcile, RecomputeTrigger};
use crate::store::WEIGHT_FACTORS_CONFIG_KEY;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::UnknownServer(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Database(err) => {
                tracing::error!(%err, "Admin endpoint database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
        };
        (
            status,
            Json(serde_json::json!({ "status": "error", "message": message })),
        )
            .into_response()
    }
}

async fn require_known_server(state: &AppState, server_id: &str) -> Result<(), AdminError> {
    if state.registry.contains(server_id).await {
        Ok(())
    } else {
        Err(AdminError::UnknownServer(server_id.to_string()))
    }
}

// ============================================================================
// Server Management
// ============================================================================

/// List every configured server across both pools.
#[utoipa::path(
    get,
    path = "/api/admin/servers",
    tag = "admin",
    responses((status = 200, description = "Configured servers", body = [ServerDescriptor])),
)]
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerDescriptor>> {
    Json(state.registry.all().await)
}

/// Add a server to a pool (or replace an existing entry).
#[utoipa::path(
    post,
    path = "/api/admin/servers",
    tag = "admin",
    request_body = ServerDescriptor,
    responses(
        (status = 200, description = "Server stored", body = StatusResponse),
        (status = 400, description = "Invalid descriptor"),
    ),
)]
pub async fn add_server(
    State(state): State<AppState>,
    Json(descriptor): Json<ServerDescriptor>,
) -> Result<Json<StatusResponse>, AdminError> {
    let id = descriptor.id.clone();
    state
        .registry
        .upsert(descriptor)
        .await
        .map_err(|reason| AdminError::Validation(reason.to_string()))?;
    // Seed the policy record so operators can configure it right away.
    state.policy.get_or_default(&id).await?;
    Ok(Json(StatusResponse::ok(format!("Server {id} stored"))))
}

/// Remove a server from its pool.
#[utoipa::path(
    delete,
    path = "/api/admin/servers/{id}",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 200, description = "Server removed", body = StatusResponse),
        (status = 404, description = "Unknown server"),
    ),
)]
pub async fn remove_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AdminError> {
    if !state.registry.remove(&id).await {
        return Err(AdminError::UnknownServer(id));
    }
    Ok(Json(StatusResponse::ok(format!("Server {id} removed"))))
}

/// Flip a server's static enabled toggle.
#[utoipa::path(
    post,
    path = "/api/admin/servers/{id}/toggle",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 200, description = "Toggle applied", body = StatusResponse),
        (status = 404, description = "Unknown server"),
    ),
)]
pub async fn toggle_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AdminError> {
    match state.registry.toggle_enabled(&id).await {
        Some(enabled) => Ok(Json(StatusResponse::ok(format!(
            "Server {id} {}",
            if enabled { "enabled" } else { "disabled" }
        )))),
        None => Err(AdminError::UnknownServer(id)),
    }
}

// ============================================================================
// Policy Management
// ============================================================================

/// Every stored policy record.
#[utoipa::path(
    get,
    path = "/api/admin/policies",
    tag = "admin",
    responses((status = 200, description = "Stored policies", body = [ServerPolicy])),
)]
pub async fn list_policies(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServerPolicy>>, AdminError> {
    Ok(Json(state.policy.list().await?))
}

/// One server's policy, created with defaults if absent.
#[utoipa::path(
    get,
    path = "/api/admin/policies/{id}",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 200, description = "Server policy", body = ServerPolicy),
        (status = 404, description = "Unknown server"),
    ),
)]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    Ok(Json(state.policy.get_or_default(&id).await?))
}

/// Pin a fixed weight; disables dynamic weighting.
#[utoipa::path(
    put,
    path = "/api/admin/policies/{id}/fixed-weight",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    request_body = FixedWeightRequest,
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn set_fixed_weight(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FixedWeightRequest>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    body.validate()
        .map_err(|e| AdminError::Validation(e.to_string()))?;
    Ok(Json(state.policy.set_fixed_weight(&id, body.weight).await?))
}

/// Re-enable dynamic weighting; clears any fixed weight.
#[utoipa::path(
    post,
    path = "/api/admin/policies/{id}/enable-dynamic",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn enable_dynamic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    Ok(Json(state.policy.enable_dynamic(&id).await?))
}

/// Replace the server's threshold limits.
#[utoipa::path(
    put,
    path = "/api/admin/policies/{id}/thresholds",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    request_body = ThresholdsRequest,
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn set_thresholds(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ThresholdsRequest>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    body.validate()
        .map_err(|e| AdminError::Validation(e.to_string()))?;
    let policy = state
        .policy
        .set_thresholds(
            &id,
            body.max_response_time_ms,
            body.max_error_rate_pct,
            body.min_success_rate_pct,
            body.max_timeout_rate_pct,
            body.min_uptime_pct,
        )
        .await?;
    Ok(Json(policy))
}

/// Enable or disable threshold-driven automatic removal.
#[utoipa::path(
    post,
    path = "/api/admin/policies/{id}/auto-removal",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    request_body = AutoRemovalRequest,
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn set_auto_removal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AutoRemovalRequest>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    body.validate()
        .map_err(|e| AdminError::Validation(e.to_string()))?;
    let policy = if body.enabled {
        let max_violations = body
            .max_violations
            .unwrap_or(vane_common::policy::DEFAULT_MAX_VIOLATIONS);
        state.policy.enable_auto_removal(&id, max_violations).await?
    } else {
        state.policy.disable_auto_removal(&id).await?
    };
    Ok(Json(policy))
}

/// Pin the server out of rotation.
#[utoipa::path(
    post,
    path = "/api/admin/policies/{id}/remove",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn manually_remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    Ok(Json(state.policy.manually_remove(&id).await?))
}

/// Return the server to rotation; resets its violation counter.
#[utoipa::path(
    post,
    path = "/api/admin/policies/{id}/reenable",
    tag = "admin",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Updated policy", body = ServerPolicy)),
)]
pub async fn reenable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerPolicy>, AdminError> {
    require_known_server(&state, &id).await?;
    Ok(Json(state.policy.reenable(&id).await?))
}

/// Drop every policy record.
#[utoipa::path(
    post,
    path = "/api/admin/policies/reset",
    tag = "admin",
    responses((status = 200, description = "Policies reset", body = StatusResponse)),
)]
pub async fn reset_policies(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, AdminError> {
    let dropped = state.policy.reset_all().await?;
    Ok(Json(StatusResponse::ok(format!(
        "Reset {dropped} server policies"
    ))))
}

// ============================================================================
// Weight Factors
// ============================================================================

/// The factors the next cycle will score with.
#[utoipa::path(
    get,
    path = "/api/admin/factors",
    tag = "admin",
    responses((status = 200, description = "Current factors", body = WeightFactors)),
)]
pub async fn get_factors(State(state): State<AppState>) -> Json<WeightFactors> {
    Json(state.coordinator.current_factors().await)
}

/// Replace the scoring factors (must sum to 1.0 ± 0.01).
#[utoipa::path(
    put,
    path = "/api/admin/factors",
    tag = "admin",
    request_body = WeightFactors,
    responses(
        (status = 200, description = "Factors stored", body = WeightFactors),
        (status = 400, description = "Factors failed validation"),
    ),
)]
pub async fn update_factors(
    State(state): State<AppState>,
    Json(factors): Json<WeightFactors>,
) -> Result<Json<WeightFactors>, AdminError> {
    factors
        .validate()
        .map_err(|e| AdminError::Validation(e.to_string()))?;
    apply_factors(&state, factors).await;
    Ok(Json(factors))
}

/// Rescale the current factors to sum exactly 1.0.
#[utoipa::path(
    post,
    path = "/api/admin/factors/normalize",
    tag = "admin",
    responses((status = 200, description = "Normalized factors", body = WeightFactors)),
)]
pub async fn normalize_factors(State(state): State<AppState>) -> Json<WeightFactors> {
    let mut factors = state.coordinator.current_factors().await;
    factors.normalize();
    apply_factors(&state, factors).await;
    Json(factors)
}

/// Reset the factors to the balanced preset.
#[utoipa::path(
    post,
    path = "/api/admin/factors/reset",
    tag = "admin",
    responses((status = 200, description = "Factors reset", body = WeightFactors)),
)]
pub async fn reset_factors(State(state): State<AppState>) -> Json<WeightFactors> {
    let factors = WeightFactors::BALANCED;
    apply_factors(&state, factors).await;
    Json(factors)
}

/// Apply a named factor preset.
#[utoipa::path(
    post,
    path = "/api/admin/factors/preset/{name}",
    tag = "admin",
    params(("name" = String, Path, description = "balanced | performance | reliability | errorAvoidance")),
    responses(
        (status = 200, description = "Preset applied", body = WeightFactors),
        (status = 400, description = "Unknown preset"),
    ),
)]
pub async fn apply_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WeightFactors>, AdminError> {
    let factors = WeightFactors::preset(&name).ok_or_else(|| {
        AdminError::Validation(format!(
            "Unknown preset '{name}' (expected one of {:?})",
            WeightFactors::PRESET_NAMES
        ))
    })?;
    apply_factors(&state, factors).await;
    Ok(Json(factors))
}

/// Store factors locally and share them with the fleet.
async fn apply_factors(state: &AppState, factors: WeightFactors) {
    *state.factors.write().await = factors;
    state
        .store
        .put_config_value(WEIGHT_FACTORS_CONFIG_KEY, &factors)
        .await;
}

// ============================================================================
// Operations
// ============================================================================

/// Ask the cycle task for an immediate recalculation.
#[utoipa::path(
    post,
    path = "/api/admin/recalculate",
    tag = "admin",
    responses((status = 200, description = "Recalculation requested", body = StatusResponse)),
)]
pub async fn force_recalculate(State(state): State<AppState>) -> Json<StatusResponse> {
    // A full channel means a cycle is already pending.
    let _ = state.recompute_tx.try_send(RecomputeTrigger::Admin);
    Json(StatusResponse::ok("Weight recalculation requested"))
}

/// Adopt the proxy config currently published in shared state.
#[utoipa::path(
    post,
    path = "/api/admin/sync",
    tag = "admin",
    responses((status = 200, description = "Sync attempted", body = StatusResponse)),
)]
pub async fn force_sync(State(state): State<AppState>) -> Json<StatusResponse> {
    reconcile::run_reconcile(&state.store, &state.nginx, true).await;
    Json(StatusResponse::ok("Config sync from shared state completed"))
}

/// Shared-state dashboard.
#[utoipa::path(
    get,
    path = "/api/admin/state",
    tag = "admin",
    responses((status = 200, description = "Fleet state", body = StateDashboard)),
)]
pub async fn state_dashboard(State(state): State<AppState>) -> Json<StateDashboard> {
    Json(StateDashboard {
        instance_id: state.config.instance_id.clone(),
        active_instances: state.store.list_active_instances().await,
        weights: state.store.get_weights().await,
        weights_updated_at: state.store.get_last_weight_time().await,
        proxy_config_updated_at: state.store.get_last_proxy_update().await,
        local_applied_at: state.nginx.applied_at().await,
        factors: state.coordinator.current_factors().await,
    })
}
