//! OpenAPI document assembly for the Swagger UI.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vane Control Plane API",
        description = "Metric ingestion and admin surface of the weight-adaptive load balancer control plane"
    ),
    paths(
        crate::api::health_check,
        crate::metrics::handlers::submit_metrics,
        crate::admin::handlers::list_servers,
        crate::admin::handlers::add_server,
        crate::admin::handlers::remove_server,
        crate::admin::handlers::toggle_server,
        crate::admin::handlers::list_policies,
        crate::admin::handlers::get_policy,
        crate::admin::handlers::set_fixed_weight,
        crate::admin::handlers::enable_dynamic,
        crate::admin::handlers::set_thresholds,
        crate::admin::handlers::set_auto_removal,
        crate::admin::handlers::manually_remove,
        crate::admin::handlers::reenable,
        crate::admin::handlers::reset_policies,
        crate::admin::handlers::get_factors,
        crate::admin::handlers::update_factors,
        crate::admin::handlers::normalize_factors,
        crate::admin::handlers::reset_factors,
        crate::admin::handlers::apply_preset,
        crate::admin::handlers::force_recalculate,
        crate::admin::handlers::force_sync,
        crate::admin::handlers::state_dashboard,
    ),
    components(schemas(
        vane_common::ServerDescriptor,
        vane_common::Pool,
        vane_common::ServerPolicy,
        vane_common::MetricSample,
        vane_common::WeightAllocation,
        vane_common::WeightFactors,
        vane_common::InstanceHeartbeat,
        vane_common::InstanceStatus,
        crate::metrics::handlers::IngestRequest,
        crate::metrics::handlers::IngestResponse,
        crate::admin::types::StatusResponse,
        crate::admin::types::FixedWeightRequest,
        crate::admin::types::ThresholdsRequest,
        crate::admin::types::AutoRemovalRequest,
        crate::admin::types::StateDashboard,
        crate::api::HealthResponse,
    )),
    tags(
        (name = "health", description = "Dependency probes"),
        (name = "metrics", description = "Backend health sample ingestion"),
        (name = "admin", description = "Pool, policy, and factor operations"),
    )
)]
pub struct ApiDoc;
