//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use fred::interfaces::ClientLike;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vane_common::WeightFactors;

use crate::admin;
use crate::config::Config;
use crate::coordinator::{Coordinator, RecomputeTrigger};
use crate::metrics::{self, MetricsIngestor};
use crate::nginx::NginxMaterializer;
use crate::policy::PolicyStore;
use crate::registry::ServerRegistry;
use crate::store::SharedStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Cold-store connection pool
    pub db: PgPool,
    /// Raw Redis client (health probe)
    pub redis: fred::clients::Client,
    /// Server configuration
    pub config: Arc<Config>,
    /// Typed shared-state facade
    pub store: SharedStore,
    /// Pool membership registry
    pub registry: Arc<ServerRegistry>,
    /// Per-server policy store
    pub policy: PolicyStore,
    /// Local copy of the scoring factors
    pub factors: Arc<RwLock<WeightFactors>>,
    /// Proxy-config materializer
    pub nginx: Arc<NginxMaterializer>,
    /// Cycle driver
    pub coordinator: Arc<Coordinator>,
    /// Metric ingest pipeline
    pub ingestor: MetricsIngestor,
    /// Channel into the cycle task for off-tick recomputes
    pub recompute_tx: mpsc::Sender<RecomputeTrigger>,
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    // Configure CORS based on allowed origins
    let cors = if state.config.cors_allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = state
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| {
                if let Ok(origin) = o.parse() {
                    Some(origin)
                } else {
                    tracing::warn!(origin = %o, "Invalid CORS origin in configuration, skipping");
                    None
                }
            })
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Metric ingestion
        .route(
            "/api/metrics/server/{server_id}",
            post(metrics::handlers::submit_metrics),
        )
        // Admin surface
        .nest("/api/admin", admin::router())
        // API documentation
        .merge(api_docs(state.config.enable_api_docs))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Request ID for tracing correlation
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    /// Overall service status ("ok" or "degraded")
    status: &'static str,
    /// Database connectivity status
    database: bool,
    /// Redis connectivity status
    redis: bool,
    /// This instance's id
    instance_id: String,
}

/// Health check endpoint.
///
/// Verifies connectivity to the cold store and the shared hot store.
/// Returns "degraded" status if any dependency is unavailable.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse),
    ),
)]
pub(crate) async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let redis_ok = state.redis.ping::<String>(None).await.is_ok();

    let status = if db_ok && redis_ok { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        database: db_ok,
        redis: redis_ok,
        instance_id: state.config.instance_id.clone(),
    })
}

/// API documentation routes.
///
/// Serves Swagger UI at `/api/docs` when enabled via `ENABLE_API_DOCS`.
/// Defaults to enabled in debug builds, disabled in release builds.
fn api_docs(enable: bool) -> Router<AppState> {
    if !enable {
        return Router::new();
    }
    Router::new().merge(
        SwaggerUi::new("/api/docs")
            .url("/api/docs/openapi.json", crate::openapi::ApiDoc::openapi()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use vane_common::Pool;

    /// State over lazily-connected pools; only routes that never touch
    /// Postgres or Redis are exercised here.
    fn test_state() -> AppState {
        let config = Config::default_for_test();

        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        let redis_config =
            fred::types::config::Config::from_url(&config.redis_url).expect("redis url");
        let redis = fred::clients::Client::new(redis_config, None, None, None);

        let store = SharedStore::new(redis.clone(), &config);
        let registry = Arc::new(ServerRegistry::new(
            config
                .incoming_servers
                .iter()
                .chain(&config.outgoing_servers)
                .cloned(),
        ));
        let policy = PolicyStore::new(db.clone());
        let factors = Arc::new(RwLock::new(WeightFactors::BALANCED));
        let nginx = Arc::new(NginxMaterializer::new(&config, store.clone()));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            db.clone(),
            Arc::clone(&registry),
            policy.clone(),
            Arc::clone(&factors),
            Arc::clone(&nginx),
            config.lock_ttl_secs,
        ));
        let (recompute_tx, _recompute_rx) = mpsc::channel(4);
        let ingestor = MetricsIngestor::new(
            Arc::clone(&registry),
            store.clone(),
            db.clone(),
            policy.clone(),
            config.ewma_alpha,
            recompute_tx.clone(),
        );

        AppState {
            db,
            redis,
            config: Arc::new(config),
            store,
            registry,
            policy,
            factors,
            nginx,
            coordinator,
            ingestor,
            recompute_tx,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn listing_servers_returns_configured_pools() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/servers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let servers = json.as_array().unwrap();
        assert_eq!(servers.len(), 3);
        assert!(servers
            .iter()
            .any(|s| s["pool"] == serde_json::json!(Pool::Outgoing)));
    }

    #[tokio::test]
    async fn metric_submission_rejects_unknown_server() {
        let app = create_router(test_state());
        let body = serde_json::json!({
            "avg_response_time_ms": 100.0,
            "error_rate_pct": 1.0,
            "success_rate_pct": 99.0,
            "timeout_rate_pct": 0.0,
            "uptime_pct": 99.9,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/metrics/server/ghost")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn metric_submission_rejects_out_of_range_body() {
        let app = create_router(test_state());
        let body = serde_json::json!({
            "avg_response_time_ms": -5.0,
            "error_rate_pct": 1.0,
            "success_rate_pct": 99.0,
            "timeout_rate_pct": 0.0,
            "uptime_pct": 99.9,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/metrics/server/in-1")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn factor_update_rejects_bad_sum() {
        let app = create_router(test_state());
        let body = serde_json::json!({
            "response_time": 0.9,
            "error_rate": 0.9,
            "timeout_rate": 0.1,
            "uptime": 0.1,
            "degradation": 0.1,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/admin/factors")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/admin/factors/preset/fastest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
