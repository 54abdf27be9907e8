//! Vane Server - Main Entry Point
//!
//! Control plane daemon for the weight-adaptive dual-pool reverse proxy.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use vane_common::WeightFactors;
use vane_server::{api, config, coordinator, db, metrics, nginx, policy, registry, store, tasks};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vane_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_id = %config.instance_id,
        "Starting Vane Server"
    );

    // Initialize the cold store
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Initialize the shared hot store (soft dependency)
    let redis = db::create_redis_client(&config.redis_url).await?;
    let shared = store::SharedStore::new(redis.clone(), &config);

    // Assemble the control-plane components
    let registry = Arc::new(registry::ServerRegistry::new(
        config
            .incoming_servers
            .iter()
            .chain(&config.outgoing_servers)
            .cloned(),
    ));
    let policy = policy::PolicyStore::new(db_pool.clone());
    let factors = Arc::new(RwLock::new(WeightFactors::BALANCED));
    let materializer = Arc::new(nginx::NginxMaterializer::new(&config, shared.clone()));
    let coordinator = Arc::new(coordinator::Coordinator::new(
        shared.clone(),
        db_pool.clone(),
        Arc::clone(&registry),
        policy.clone(),
        Arc::clone(&factors),
        Arc::clone(&materializer),
        config.lock_ttl_secs,
    ));
    let (recompute_tx, recompute_rx) = mpsc::channel(8);
    let ingestor = metrics::MetricsIngestor::new(
        Arc::clone(&registry),
        shared.clone(),
        db_pool.clone(),
        policy.clone(),
        config.ewma_alpha,
        recompute_tx.clone(),
    );

    // Start the periodic tasks
    let background = tasks::spawn_background_tasks(
        Arc::clone(&coordinator),
        shared.clone(),
        Arc::clone(&materializer),
        db_pool.clone(),
        &config,
        recompute_rx,
    );

    // Build application state and router
    let bind_address = config.bind_address.clone();
    let state = api::AppState {
        db: db_pool,
        redis,
        config: Arc::new(config),
        store: shared,
        registry,
        policy,
        factors,
        nginx: materializer,
        coordinator,
        ingestor,
        recompute_tx,
    };
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Stop the periodic tasks; an in-flight cycle releases its lock first.
    background.shutdown().await;

    info!("Server shutdown complete");

    Ok(())
}
