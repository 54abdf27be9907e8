//! Database Layer
//!
//! `PostgreSQL` (cold store) and Redis (shared hot store) connections.

mod models;
mod queries;

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

pub use models::*;
pub use queries::*;

/// Create `PostgreSQL` connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Create Redis client.
///
/// The shared store is a soft dependency: when Redis is unreachable at
/// boot the client keeps reconnecting in the background and the daemon
/// starts degraded (cold-store reads, skipped cycles) instead of failing.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::Client> {
    use fred::prelude::*;

    let config = fred::types::config::Config::from_url(redis_url)?;
    let policy = ReconnectPolicy::new_exponential(0, 100, 30_000, 2);
    let client = Client::new(config, None, None, Some(policy));
    client.connect();

    match tokio::time::timeout(std::time::Duration::from_secs(5), client.wait_for_connect())
        .await
    {
        Ok(Ok(())) => info!("Connected to Redis"),
        Ok(Err(e)) => warn!(error = %e, "Redis connection failed, continuing degraded"),
        Err(_) => warn!("Redis not reachable yet, continuing degraded"),
    }
    Ok(client)
}
