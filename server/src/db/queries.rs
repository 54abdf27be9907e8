//! Database Queries
//!
//! Runtime queries (no compile-time `DATABASE_URL` required).

use sqlx::PgPool;

use vane_common::{MetricSample, ServerPolicy};

use super::models::{MetricSampleRow, ServerPolicyRow};

// ============================================================================
// Metric Sample Queries
// ============================================================================

/// Append one metric sample to the durable log.
pub async fn insert_metric_sample(pool: &PgPool, sample: &MetricSample) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO metric_samples \
         (server_id, avg_response_time_ms, error_rate_pct, success_rate_pct, timeout_rate_pct, \
          uptime_pct, latency_p50, latency_p95, latency_p99, requests_per_minute, \
          window_timestamp, created_at, ewma_latency_ms, degradation_score) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(&sample.server_id)
    .bind(sample.avg_response_time_ms)
    .bind(sample.error_rate_pct)
    .bind(sample.success_rate_pct)
    .bind(sample.timeout_rate_pct)
    .bind(sample.uptime_pct)
    .bind(sample.latency_p50)
    .bind(sample.latency_p95)
    .bind(sample.latency_p99)
    .bind(sample.requests_per_minute)
    .bind(sample.window_timestamp)
    .bind(sample.created_at)
    .bind(sample.ewma_latency_ms)
    .bind(sample.degradation_score)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest sample for one server, if any.
pub async fn latest_sample(pool: &PgPool, server_id: &str) -> sqlx::Result<Option<MetricSample>> {
    let row = sqlx::query_as::<_, MetricSampleRow>(
        "SELECT server_id, avg_response_time_ms, error_rate_pct, success_rate_pct, \
                timeout_rate_pct, uptime_pct, latency_p50, latency_p95, latency_p99, \
                requests_per_minute, window_timestamp, created_at, ewma_latency_ms, \
                degradation_score \
         FROM metric_samples WHERE server_id = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

/// Newest sample per server across the whole table.
pub async fn latest_samples(pool: &PgPool) -> sqlx::Result<Vec<MetricSample>> {
    let rows = sqlx::query_as::<_, MetricSampleRow>(
        "SELECT DISTINCT ON (server_id) \
                server_id, avg_response_time_ms, error_rate_pct, success_rate_pct, \
                timeout_rate_pct, uptime_pct, latency_p50, latency_p95, latency_p99, \
                requests_per_minute, window_timestamp, created_at, ewma_latency_ms, \
                degradation_score \
         FROM metric_samples \
         ORDER BY server_id, created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

// ============================================================================
// Server Policy Queries
// ============================================================================

const POLICY_COLUMNS: &str = "server_id, dynamic_weight_enabled, fixed_weight, \
     max_response_time_ms, max_error_rate_pct, min_success_rate_pct, max_timeout_rate_pct, \
     min_uptime_pct, violations_count, max_violations_before_removal, auto_removal_enabled, \
     manually_removed, last_violation_at, created_at, updated_at";

/// Fetch the policy for one server, if a record exists.
pub async fn get_policy(pool: &PgPool, server_id: &str) -> sqlx::Result<Option<ServerPolicy>> {
    let row = sqlx::query_as::<_, ServerPolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM server_policies WHERE server_id = $1"
    ))
    .bind(server_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

/// All policy records.
pub async fn list_policies(pool: &PgPool) -> sqlx::Result<Vec<ServerPolicy>> {
    let rows = sqlx::query_as::<_, ServerPolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM server_policies ORDER BY server_id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Insert a default policy row unless one already exists, then return the
/// current record.
pub async fn create_default_policy_if_absent(
    pool: &PgPool,
    server_id: &str,
) -> sqlx::Result<ServerPolicy> {
    sqlx::query("INSERT INTO server_policies (server_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(server_id)
        .execute(pool)
        .await?;
    let row = sqlx::query_as::<_, ServerPolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM server_policies WHERE server_id = $1"
    ))
    .bind(server_id)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// Pin a fixed weight; disables dynamic weighting in the same update.
pub async fn set_fixed_weight(pool: &PgPool, server_id: &str, weight: i32) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET fixed_weight = $2, dynamic_weight_enabled = FALSE, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .bind(weight)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Re-enable dynamic weighting; clears any fixed weight.
pub async fn enable_dynamic_weight(pool: &PgPool, server_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET dynamic_weight_enabled = TRUE, fixed_weight = NULL, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace the configured threshold limits (NULL clears a limit).
#[allow(clippy::too_many_arguments)]
pub async fn set_thresholds(
    pool: &PgPool,
    server_id: &str,
    max_response_time_ms: Option<f64>,
    max_error_rate_pct: Option<f64>,
    min_success_rate_pct: Option<f64>,
    max_timeout_rate_pct: Option<f64>,
    min_uptime_pct: Option<f64>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET max_response_time_ms = $2, max_error_rate_pct = $3, min_success_rate_pct = $4, \
             max_timeout_rate_pct = $5, min_uptime_pct = $6, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .bind(max_response_time_ms)
    .bind(max_error_rate_pct)
    .bind(min_success_rate_pct)
    .bind(max_timeout_rate_pct)
    .bind(min_uptime_pct)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Enable threshold-driven automatic removal.
pub async fn enable_auto_removal(
    pool: &PgPool,
    server_id: &str,
    max_violations: i32,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET auto_removal_enabled = TRUE, max_violations_before_removal = $2, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .bind(max_violations)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Disable automatic removal and reset the violation counter.
pub async fn disable_auto_removal(pool: &PgPool, server_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET auto_removal_enabled = FALSE, violations_count = 0, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Pin the server out of rotation.
pub async fn set_manually_removed(pool: &PgPool, server_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies SET manually_removed = TRUE, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Return the server to rotation; resets the violation counter.
pub async fn reenable_server(pool: &PgPool, server_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server_policies \
         SET manually_removed = FALSE, violations_count = 0, updated_at = NOW() \
         WHERE server_id = $1",
    )
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomically bump the violation counter and return the updated record.
pub async fn record_violation(pool: &PgPool, server_id: &str) -> sqlx::Result<Option<ServerPolicy>> {
    let row = sqlx::query_as::<_, ServerPolicyRow>(&format!(
        "UPDATE server_policies \
         SET violations_count = violations_count + 1, last_violation_at = NOW(), \
             updated_at = NOW() \
         WHERE server_id = $1 \
         RETURNING {POLICY_COLUMNS}"
    ))
    .bind(server_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

/// Reset the violation counter after a clean sample.
pub async fn clear_violations(pool: &PgPool, server_id: &str) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE server_policies SET violations_count = 0, updated_at = NOW() \
         WHERE server_id = $1 AND violations_count > 0",
    )
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Drop every policy record; defaults are recreated on demand.
pub async fn reset_all_policies(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM server_policies").execute(pool).await?;
    Ok(result.rows_affected())
}
