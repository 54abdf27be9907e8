//! Shared-State Store
//!
//! Typed facade over the Redis hot store: metric samples, the published
//! weight list, the proxy-config artifact, instance heartbeats, and
//! advisory locks.
//!
//! Every public method is best-effort: internal failures are logged at
//! `warn` and collapse to `None`/`false`/empty so a flaky or absent Redis
//! never takes the control plane down. Callers that need durability use
//! the cold store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fred::prelude::*;
use fred::types::scan::Scanner;
use fred::types::{Expiration, SetOptions};
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use vane_common::{InstanceHeartbeat, MetricSample, WeightAllocation};

use crate::config::Config;

/// Name of the per-cycle calculation lock.
pub const WEIGHT_CALCULATION_LOCK: &str = "weight-calculation";

/// Generic-config key carrying the fleet-wide weight factors.
pub const WEIGHT_FACTORS_CONFIG_KEY: &str = "weight-factors";

/// Hot-store TTLs per value category, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct StoreTtls {
    pub metrics: i64,
    pub weights: i64,
    pub proxy_config: i64,
    pub heartbeat: i64,
    pub config: i64,
}

/// Typed boundary to the shared Redis store.
#[derive(Clone)]
pub struct SharedStore {
    redis: Client,
    prefix: String,
    instance_id: String,
    ttls: StoreTtls,
}

impl SharedStore {
    /// Wrap a connected (or connecting) Redis client.
    #[must_use]
    pub fn new(redis: Client, config: &Config) -> Self {
        Self {
            redis,
            prefix: config.redis_key_prefix.clone(),
            instance_id: config.instance_id.clone(),
            ttls: StoreTtls {
                metrics: config.metrics_ttl_secs,
                weights: config.weights_ttl_secs,
                proxy_config: config.proxy_config_ttl_secs,
                heartbeat: config.heartbeat_ttl_secs,
                config: config.config_ttl_secs,
            },
        }
    }

    /// The identity used for lock ownership.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn metric_key(&self, server_id: &str) -> String {
        self.key(&format!("metrics:{server_id}"))
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Store a sample under its per-server key with the metrics TTL.
    pub async fn put_metric(&self, sample: &MetricSample) {
        let key = self.metric_key(&sample.server_id);
        self.put_json(&key, sample, self.ttls.metrics).await;
    }

    /// Fetch the current sample for one server.
    pub async fn get_metric(&self, server_id: &str) -> Option<MetricSample> {
        let key = self.metric_key(server_id);
        self.get_json(&key).await
    }

    /// Fetch every live sample, keyed by server id.
    pub async fn scan_all_metrics(&self) -> HashMap<String, MetricSample> {
        let mut samples = HashMap::new();
        for key in self.scan_keys(&self.key("metrics:*")).await {
            if let Some(sample) = self.get_json::<MetricSample>(&key).await {
                samples.insert(sample.server_id.clone(), sample);
            }
        }
        samples
    }

    /// Drop metric keys whose TTL has run out.
    ///
    /// Redis normally expires these on its own; this sweep also covers
    /// keys written without an expiry by older instances.
    pub async fn cleanup_expired_metrics(&self) -> usize {
        let mut removed = 0;
        for key in self.scan_keys(&self.key("metrics:*")).await {
            match self.redis.ttl::<i64, _>(&key).await {
                Ok(ttl) if ttl < 0 => {
                    if let Err(e) = self.redis.del::<i64, _>(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete expired metric key");
                    } else {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read metric key TTL");
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Hot-store metric cleanup completed");
        }
        removed
    }

    // ========================================================================
    // Weights
    // ========================================================================

    /// Publish the combined allocation list and stamp `weights:last-update`.
    pub async fn put_weights(&self, allocations: &[WeightAllocation]) {
        self.put_json(&self.key("weights:current"), &allocations, self.ttls.weights)
            .await;
        self.put_string(
            &self.key("weights:last-update"),
            &Utc::now().to_rfc3339(),
            self.ttls.weights,
        )
        .await;
    }

    /// Fetch the most recently published allocation list.
    pub async fn get_weights(&self) -> Option<Vec<WeightAllocation>> {
        self.get_json(&self.key("weights:current")).await
    }

    /// When weights were last published, by any instance.
    pub async fn get_last_weight_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_string(&self.key("weights:last-update")).await?;
        parse_timestamp(&raw, "weights:last-update")
    }

    // ========================================================================
    // Proxy config artifact
    // ========================================================================

    /// Publish the rendered proxy config and stamp `nginx:last-update`.
    pub async fn put_proxy_config(&self, text: &str) {
        self.put_string(&self.key("nginx:current-config"), text, self.ttls.proxy_config)
            .await;
        self.put_string(
            &self.key("nginx:last-update"),
            &Utc::now().to_rfc3339(),
            self.ttls.proxy_config,
        )
        .await;
    }

    /// Fetch the most recently published proxy config blob.
    pub async fn get_proxy_config(&self) -> Option<String> {
        self.get_string(&self.key("nginx:current-config")).await
    }

    /// When the proxy config was last published, by any instance.
    pub async fn get_last_proxy_update(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_string(&self.key("nginx:last-update")).await?;
        parse_timestamp(&raw, "nginx:last-update")
    }

    // ========================================================================
    // Instance membership
    // ========================================================================

    /// Publish this instance's heartbeat under the heartbeat TTL.
    pub async fn heartbeat(&self, heartbeat: &InstanceHeartbeat) {
        let key = self.key(&format!("instance:{}", heartbeat.instance_id));
        self.put_json(&key, heartbeat, self.ttls.heartbeat).await;
    }

    /// Every instance with an unexpired heartbeat.
    pub async fn list_active_instances(&self) -> Vec<InstanceHeartbeat> {
        let mut instances = Vec::new();
        for key in self.scan_keys(&self.key("instance:*")).await {
            if let Some(hb) = self.get_json::<InstanceHeartbeat>(&key).await {
                instances.push(hb);
            }
        }
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        instances
    }

    // ========================================================================
    // Advisory locks
    // ========================================================================

    /// Try to take the named lock for `ttl_secs`. Returns false when another
    /// instance holds it (or Redis is unavailable).
    pub async fn try_acquire_lock(&self, name: &str, ttl_secs: i64) -> bool {
        let key = self.key(&format!("lock:{name}"));
        match self
            .redis
            .set::<bool, _, _>(
                &key,
                self.instance_id.as_str(),
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(lock = %name, error = %e, "Failed to acquire lock");
                false
            }
        }
    }

    /// Release the named lock if this instance owns it. Releasing someone
    /// else's lock is a no-op.
    pub async fn release_lock(&self, name: &str) {
        let key = self.key(&format!("lock:{name}"));
        let owner: Option<String> = match self.redis.get(&key).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(lock = %name, error = %e, "Failed to read lock owner");
                return;
            }
        };
        match owner {
            Some(owner) if owner == self.instance_id => {
                if let Err(e) = self.redis.del::<i64, _>(&key).await {
                    warn!(lock = %name, error = %e, "Failed to release lock");
                }
            }
            Some(owner) => {
                debug!(lock = %name, owner = %owner, "Skipping release of foreign lock");
            }
            None => {}
        }
    }

    // ========================================================================
    // Generic config values
    // ========================================================================

    /// Store a JSON value under the generic `config:` namespace.
    pub async fn put_config_value<T: Serialize>(&self, name: &str, value: &T) {
        let key = self.key(&format!("config:{name}"));
        self.put_json(&key, value, self.ttls.config).await;
    }

    /// Fetch a JSON value from the generic `config:` namespace.
    pub async fn get_config_value<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = self.key(&format!("config:{name}"));
        self.get_json(&key).await
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: i64) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize shared-state value");
                return;
            }
        };
        self.put_string(key, &payload, ttl_secs).await;
    }

    async fn put_string(&self, key: &str, value: &str, ttl_secs: i64) {
        if let Err(e) = self
            .redis
            .set::<(), _, _>(key, value, Some(Expiration::EX(ttl_secs)), None, false)
            .await
        {
            warn!(key = %key, error = %e, "Failed to write shared-state value");
        }
    }

    async fn get_string(&self, key: &str) -> Option<String> {
        match self.redis.get::<Option<String>, _>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read shared-state value");
                None
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_string(key).await?;
        decode_lenient(&raw, key)
    }

    async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut stream = self.redis.scan(pattern, Some(100), None);
        while let Some(page) = stream.next().await {
            match page {
                Ok(mut page) => {
                    if let Some(results) = page.take_results() {
                        keys.extend(
                            results
                                .into_iter()
                                .filter_map(|key| key.into_string()),
                        );
                    }
                    page.next();
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Key scan failed");
                    break;
                }
            }
        }
        keys
    }
}

/// Decode a stored JSON value through a generic value first, so blobs
/// written by older instances with extra or missing optional fields still
/// convert. A failed decode logs and reads as absent.
fn decode_lenient<T: DeserializeOwned>(raw: &str, key: &str) -> Option<T> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding non-JSON shared-state value");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding undecodable shared-state value");
            None
        }
    }
}

fn parse_timestamp(raw: &str, key: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!(key = %key, raw = %raw, error = %e, "Discarding unparsable timestamp");
            None
        }
    }
}
