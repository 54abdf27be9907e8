//! Background Tasks
//!
//! One spawned task per periodic concern, each watching the shared
//! shutdown channel: heartbeat, weight cycle, drift reconcile, hot-store
//! cleanup, and nightly cold-store retention.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vane_common::InstanceStatus;

use crate::config::Config;
use crate::coordinator::{reconcile, Coordinator, RecomputeTrigger};
use crate::nginx::NginxMaterializer;
use crate::store::SharedStore;

/// Hour of day (local time) the cold-store retention sweep runs.
const RETENTION_HOUR: u32 = 2;

/// Max rows deleted per retention DELETE to avoid long-held locks.
const DELETE_BATCH_SIZE: i64 = 10_000;

/// Handles for every periodic task plus the shutdown trigger.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal every task to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Background tasks stopped");
    }
}

/// Spawn all periodic tasks.
pub fn spawn_background_tasks(
    coordinator: Arc<Coordinator>,
    store: SharedStore,
    nginx: Arc<NginxMaterializer>,
    db: PgPool,
    config: &Config,
    recompute_rx: mpsc::Receiver<RecomputeTrigger>,
) -> BackgroundTasks {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![
        spawn_heartbeat_task(
            Arc::clone(&coordinator),
            config.heartbeat_secs,
            shutdown_rx.clone(),
        ),
        spawn_cycle_task(
            Arc::clone(&coordinator),
            config.weight_cycle_secs,
            recompute_rx,
            shutdown_rx.clone(),
        ),
        spawn_drift_task(
            store.clone(),
            Arc::clone(&nginx),
            config.drift_sync_secs,
            shutdown_rx.clone(),
        ),
        spawn_hot_cleanup_task(store, config.hot_cleanup_secs, shutdown_rx.clone()),
        spawn_retention_task(db, config.metrics_retention_days, shutdown_rx),
    ];

    BackgroundTasks {
        shutdown_tx,
        handles,
    }
}

/// Publish liveness immediately and then on every tick; a draining
/// heartbeat goes out on shutdown so peers see the transition before the
/// key expires.
fn spawn_heartbeat_task(
    coordinator: Arc<Coordinator>,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    coordinator.publish_heartbeat(InstanceStatus::Active).await;
                }
                _ = shutdown.changed() => {
                    coordinator.publish_heartbeat(InstanceStatus::Draining).await;
                    break;
                }
            }
        }
    })
}

/// Drive the weight cycle on its period and whenever the ingestor (or an
/// operator) reports that inputs are ready.
fn spawn_cycle_task(
    coordinator: Arc<Coordinator>,
    period_secs: u64,
    mut recompute_rx: mpsc::Receiver<RecomputeTrigger>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs));
        interval.tick().await; // consume immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => coordinator.run_cycle().await,
                trigger = recompute_rx.recv() => match trigger {
                    Some(trigger) => {
                        debug!(?trigger, "Off-tick weight cycle requested");
                        coordinator.run_cycle().await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Pull any newer proxy config a peer published. The first pass runs
/// immediately so a restarted instance catches up before its first cycle.
fn spawn_drift_task(
    store: SharedStore,
    nginx: Arc<NginxMaterializer>,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => reconcile::run_reconcile(&store, &nginx, false).await,
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Sweep hot-store metric keys whose TTL is gone.
fn spawn_hot_cleanup_task(
    store: SharedStore,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs));
        interval.tick().await; // consume immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    store.cleanup_expired_metrics().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Nightly cold-store retention at the configured local hour.
fn spawn_retention_task(
    db: PgPool,
    retention_days: i32,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = duration_until_next_local_hour(RETENTION_HOUR);
            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    let deleted = purge_old_metric_samples(&db, retention_days).await;
                    info!(deleted, retention_days, "Cold-store retention sweep completed");
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Delete cold-store samples past the retention window in batches, so no
/// single DELETE holds table locks for long.
async fn purge_old_metric_samples(pool: &PgPool, retention_days: i32) -> i64 {
    let mut total_deleted: i64 = 0;
    loop {
        match sqlx::query(
            "DELETE FROM metric_samples WHERE id IN (\
                 SELECT id FROM metric_samples \
                 WHERE created_at < NOW() - make_interval(days => $1) LIMIT $2\
             )",
        )
        .bind(retention_days)
        .bind(DELETE_BATCH_SIZE)
        .execute(pool)
        .await
        {
            Ok(result) => {
                let deleted = result.rows_affected() as i64;
                total_deleted += deleted;
                if deleted < DELETE_BATCH_SIZE {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge old metric samples");
                break;
            }
        }
    }
    total_deleted
}

/// Time until the next occurrence of `hour:00:00` local time.
fn duration_until_next_local_hour(hour: u32) -> Duration {
    use chrono::{Local, NaiveTime, TimeZone};

    let now = Local::now();
    let target_time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut target_date = now.date_naive();
    if now.time() >= target_time {
        target_date = target_date.succ_opt().unwrap_or(target_date);
    }
    Local
        .from_local_datetime(&target_date.and_time(target_time))
        .earliest()
        .and_then(|target| (target - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_retention_run_is_within_a_day() {
        let wait = duration_until_next_local_hour(RETENTION_HOUR);
        assert!(wait <= Duration::from_secs(24 * 3600));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn every_hour_has_an_upcoming_occurrence() {
        for hour in 0..24 {
            let wait = duration_until_next_local_hour(hour);
            assert!(wait <= Duration::from_secs(24 * 3600), "hour {hour}");
        }
    }
}
