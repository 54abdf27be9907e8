//! Admin Surface
//!
//! Runtime control of pool membership, per-server policies, scoring
//! factors, and fleet-level operations.

pub mod handlers;
pub mod types;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::api::AppState;

pub use handlers::AdminError;

/// Create the admin router, mounted under `/api/admin`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/servers",
            get(handlers::list_servers).post(handlers::add_server),
        )
        .route("/servers/{id}", delete(handlers::remove_server))
        .route("/servers/{id}/toggle", post(handlers::toggle_server))
        .route("/policies", get(handlers::list_policies))
        .route("/policies/reset", post(handlers::reset_policies))
        .route("/policies/{id}", get(handlers::get_policy))
        .route(
            "/policies/{id}/fixed-weight",
            put(handlers::set_fixed_weight),
        )
        .route(
            "/policies/{id}/enable-dynamic",
            post(handlers::enable_dynamic),
        )
        .route("/policies/{id}/thresholds", put(handlers::set_thresholds))
        .route("/policies/{id}/auto-removal", post(handlers::set_auto_removal))
        .route("/policies/{id}/remove", post(handlers::manually_remove))
        .route("/policies/{id}/reenable", post(handlers::reenable))
        .route(
            "/factors",
            get(handlers::get_factors).put(handlers::update_factors),
        )
        .route("/factors/normalize", post(handlers::normalize_factors))
        .route("/factors/reset", post(handlers::reset_factors))
        .route("/factors/preset/{name}", post(handlers::apply_preset))
        .route("/recalculate", post(handlers::force_recalculate))
        .route("/sync", post(handlers::force_sync))
        .route("/state", get(handlers::state_dashboard))
}
