//! Ingest pipeline for backend metric samples.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vane_common::MetricSample;

use crate::coordinator::RecomputeTrigger;
use crate::db;
use crate::metrics::ewma;
use crate::policy::PolicyStore;
use crate::registry::ServerRegistry;
use crate::store::SharedStore;

/// Share of configured servers that must have a fresh sample before an
/// immediate recompute is requested.
const RECOMPUTE_QUORUM_PCT: usize = 80;

/// How recent a sample must be to count toward the recompute quorum.
const QUORUM_FRESH_SECS: i64 = 120;

/// Ingest failures reported back to the submitter.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),
    #[error("Invalid metrics payload: {0}")]
    Validation(String),
}

/// What the ingestor derived from an accepted sample.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub server_id: String,
    pub created_at: DateTime<Utc>,
    pub instant_latency_ms: f64,
    pub ewma_latency_ms: f64,
}

/// Validates, enriches, and persists inbound samples.
#[derive(Clone)]
pub struct MetricsIngestor {
    registry: Arc<ServerRegistry>,
    store: SharedStore,
    db: PgPool,
    policy: PolicyStore,
    ewma_alpha: f64,
    recompute_tx: mpsc::Sender<RecomputeTrigger>,
}

impl MetricsIngestor {
    #[must_use]
    pub fn new(
        registry: Arc<ServerRegistry>,
        store: SharedStore,
        db: PgPool,
        policy: PolicyStore,
        ewma_alpha: f64,
        recompute_tx: mpsc::Sender<RecomputeTrigger>,
    ) -> Self {
        Self {
            registry,
            store,
            db,
            policy,
            ewma_alpha,
            recompute_tx,
        }
    }

    /// Accept one sample: validate, derive EWMA and degradation, persist
    /// durably and to the hot store, evaluate thresholds, and maybe request
    /// an immediate recompute. Everything after validation is best-effort.
    pub async fn ingest(&self, mut sample: MetricSample) -> Result<IngestOutcome, IngestError> {
        if !self.registry.contains(&sample.server_id).await {
            warn!(server_id = %sample.server_id, "Rejecting metrics for unknown server");
            return Err(IngestError::UnknownServer(sample.server_id));
        }
        sample
            .validate_ranges()
            .map_err(|e| IngestError::Validation(e.to_string()))?;

        sample.created_at = Utc::now();

        // Previous smoothed latency: hot store first, cold store newest-first.
        let previous = match self.store.get_metric(&sample.server_id).await {
            Some(previous) => Some(previous),
            None => db::latest_sample(&self.db, &sample.server_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(server_id = %sample.server_id, error = %e, "Cold-store lookup of previous sample failed");
                    None
                }),
        };
        let prev_ewma = previous.as_ref().map(MetricSample::effective_latency_ms);
        sample.ewma_latency_ms = Some(ewma::smooth(
            self.ewma_alpha,
            prev_ewma,
            sample.avg_response_time_ms,
        ));
        sample.degradation_score = Some(sample.degradation());

        // Durable log first, then the TTL'd hot copy.
        if let Err(e) = db::insert_metric_sample(&self.db, &sample).await {
            warn!(server_id = %sample.server_id, error = %e, "Failed to persist sample to cold store");
        }
        self.store.put_metric(&sample).await;

        self.policy.evaluate_thresholds(&sample).await;
        self.maybe_trigger_recompute().await;

        Ok(IngestOutcome {
            server_id: sample.server_id,
            created_at: sample.created_at,
            instant_latency_ms: sample.avg_response_time_ms,
            ewma_latency_ms: sample.ewma_latency_ms.unwrap_or(sample.avg_response_time_ms),
        })
    }

    /// Request an immediate weight cycle once enough servers have reported
    /// recently; otherwise the periodic tick picks the sample up.
    async fn maybe_trigger_recompute(&self) {
        let total = self.registry.count().await;
        if total == 0 {
            return;
        }

        let mut samples: Vec<MetricSample> =
            self.store.scan_all_metrics().await.into_values().collect();
        if samples.is_empty() {
            match db::latest_samples(&self.db).await {
                Ok(cold) => samples = cold,
                Err(e) => {
                    warn!(error = %e, "Failed to read samples for recompute quorum");
                    return;
                }
            }
        }

        let now = Utc::now();
        let mut fresh = 0usize;
        for sample in &samples {
            if sample.is_fresh(now, QUORUM_FRESH_SECS)
                && self.registry.contains(&sample.server_id).await
            {
                fresh += 1;
            }
        }

        if fresh * 100 >= total * RECOMPUTE_QUORUM_PCT {
            debug!(fresh, total, "Input quorum reached, requesting immediate recompute");
            // A full channel means a cycle is already pending.
            let _ = self.recompute_tx.try_send(RecomputeTrigger::InputsReady);
        }
    }
}
