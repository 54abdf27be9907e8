//! Drift Reconciliation
//!
//! Non-leaders (and recovered leaders) pull any strictly-newer proxy
//! config another instance published and apply it locally. Idempotent and
//! lock-free; last writer wins.

use tracing::{info, warn};

use crate::nginx::NginxMaterializer;
use crate::store::SharedStore;

/// One reconciliation pass. With `force`, the shared artifact is adopted
/// even when its timestamp is not newer (the admin "sync now" path); the
/// content comparison still short-circuits identical artifacts.
pub async fn run_reconcile(store: &SharedStore, nginx: &NginxMaterializer, force: bool) {
    let Some(published_at) = store.get_last_proxy_update().await else {
        return;
    };
    if !force {
        if let Some(applied_at) = nginx.applied_at().await {
            if published_at <= applied_at {
                return;
            }
        }
    }

    let Some(published) = store.get_proxy_config().await else {
        return;
    };

    if nginx.applied_text().await.as_deref() == Some(published.as_str()) {
        // Same content, newer stamp: remember the stamp so this pass stops
        // re-triggering.
        nginx.touch_applied(published_at).await;
        return;
    }

    match nginx.adopt(&published, published_at).await {
        Ok(()) => info!(
            published_at = %published_at,
            "Adopted newer proxy config from shared state"
        ),
        Err(e) => warn!(error = %e, "Failed to adopt published proxy config"),
    }
}
