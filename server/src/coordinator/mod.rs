//! Multi-Instance Coordinator
//!
//! Drives the periodic weight cycle with per-cycle leadership through a
//! shared advisory lock, publishes instance heartbeats, and reconciles
//! config drift against the shared state.

pub mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vane_common::{
    InstanceHeartbeat, InstanceStatus, MetricSample, Pool, WeightAllocation, WeightFactors,
};

use crate::db;
use crate::nginx::NginxMaterializer;
use crate::policy::PolicyStore;
use crate::registry::ServerRegistry;
use crate::store::{SharedStore, WEIGHT_CALCULATION_LOCK, WEIGHT_FACTORS_CONFIG_KEY};
use crate::weights;

/// Samples older than this never contribute to a cycle.
const SAMPLE_FRESHNESS_SECS: i64 = 300;

/// Why an immediate (off-tick) cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeTrigger {
    /// Enough servers reported fresh samples.
    InputsReady,
    /// An operator asked for a recalculation.
    Admin,
}

/// Owns one instance's participation in the calculation fleet.
pub struct Coordinator {
    store: SharedStore,
    db: PgPool,
    registry: Arc<ServerRegistry>,
    policy: PolicyStore,
    factors: Arc<RwLock<WeightFactors>>,
    nginx: Arc<NginxMaterializer>,
    lock_ttl_secs: i64,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        store: SharedStore,
        db: PgPool,
        registry: Arc<ServerRegistry>,
        policy: PolicyStore,
        factors: Arc<RwLock<WeightFactors>>,
        nginx: Arc<NginxMaterializer>,
        lock_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            db,
            registry,
            policy,
            factors,
            nginx,
            lock_ttl_secs,
        }
    }

    /// Run one weight cycle if this instance wins the per-cycle lock.
    /// The lock is released on every exit path; a crash is bounded by its
    /// TTL.
    pub async fn run_cycle(&self) {
        if !self
            .store
            .try_acquire_lock(WEIGHT_CALCULATION_LOCK, self.lock_ttl_secs)
            .await
        {
            debug!("Another instance leads this cycle");
            return;
        }
        if let Err(e) = self.run_cycle_inner().await {
            warn!(error = %e, "Weight cycle aborted");
        }
        self.store.release_lock(WEIGHT_CALCULATION_LOCK).await;
    }

    async fn run_cycle_inner(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        let mut samples = self.store.scan_all_metrics().await;
        if samples.is_empty() {
            // Hot store empty or unavailable: degrade to the durable log.
            samples = db::latest_samples(&self.db)
                .await?
                .into_iter()
                .map(|s| (s.server_id.clone(), s))
                .collect::<HashMap<String, MetricSample>>();
        }
        samples.retain(|_, sample| sample.is_fresh(now, SAMPLE_FRESHNESS_SECS));
        if samples.is_empty() {
            debug!("No fresh samples, skipping weight cycle");
            return Ok(());
        }

        let factors = self.current_factors().await;
        let policies = self.policy.load_all().await;

        let incoming_servers = self.registry.pool_servers(Pool::Incoming).await;
        let outgoing_servers = self.registry.pool_servers(Pool::Outgoing).await;
        let incoming =
            weights::compute_pool(&incoming_servers, &samples, &factors, &policies, now);
        let outgoing =
            weights::compute_pool(&outgoing_servers, &samples, &factors, &policies, now);

        // Weights are always published before the matching proxy config.
        let combined: Vec<WeightAllocation> =
            incoming.iter().chain(outgoing.iter()).cloned().collect();
        self.store.put_weights(&combined).await;

        if incoming.is_empty() && outgoing.is_empty() {
            debug!("Both pools produced no allocations, skipping materialization");
            return Ok(());
        }
        self.nginx.apply(&incoming, &outgoing).await?;

        info!(
            incoming = incoming.len(),
            outgoing = outgoing.len(),
            "Weight cycle published"
        );
        Ok(())
    }

    /// The factors this cycle should score with: the fleet-shared value
    /// when present and valid, the local copy otherwise.
    pub async fn current_factors(&self) -> WeightFactors {
        if let Some(shared) = self
            .store
            .get_config_value::<WeightFactors>(WEIGHT_FACTORS_CONFIG_KEY)
            .await
        {
            if shared.validate().is_ok() {
                *self.factors.write().await = shared;
                return shared;
            }
            warn!("Ignoring invalid fleet-shared weight factors");
        }
        *self.factors.read().await
    }

    /// Publish this instance's liveness under the heartbeat TTL.
    pub async fn publish_heartbeat(&self, status: InstanceStatus) {
        let heartbeat = InstanceHeartbeat::now(self.store.instance_id(), status);
        self.store.heartbeat(&heartbeat).await;
    }
}
