//! Proxy-Config Materializer
//!
//! Renders the dual-upstream nginx configuration from weight allocations,
//! validates it structurally, writes it atomically next to the co-located
//! proxy, publishes the blob to shared state, and triggers a reload.

mod render;

pub use render::{render_config, validate_config, NginxError, PLACEHOLDER_BACKEND};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vane_common::WeightAllocation;

use crate::config::Config;
use crate::store::SharedStore;

/// How long the reload command may run before it is abandoned.
const RELOAD_TIMEOUT_SECS: u64 = 30;

/// The artifact this instance last wrote and reloaded successfully.
#[derive(Debug, Clone)]
struct AppliedArtifact {
    text: String,
    applied_at: DateTime<Utc>,
}

/// Owns the local proxy config file and its reload contract.
pub struct NginxMaterializer {
    config_path: PathBuf,
    reload_command: String,
    backup_enabled: bool,
    store: SharedStore,
    applied: RwLock<Option<AppliedArtifact>>,
}

impl NginxMaterializer {
    #[must_use]
    pub fn new(config: &Config, store: SharedStore) -> Self {
        Self {
            config_path: config.nginx_config_path(),
            reload_command: config.nginx_reload_command.clone(),
            backup_enabled: config.nginx_backup_enabled,
            store,
            applied: RwLock::new(None),
        }
    }

    /// When this instance last applied an artifact.
    pub async fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied.read().await.as_ref().map(|a| a.applied_at)
    }

    /// The artifact text this instance last applied.
    pub async fn applied_text(&self) -> Option<String> {
        self.applied.read().await.as_ref().map(|a| a.text.clone())
    }

    /// Record that the in-memory artifact is current as of `ts` without
    /// touching the filesystem (content already matched).
    pub async fn touch_applied(&self, ts: DateTime<Utc>) {
        if let Some(artifact) = self.applied.write().await.as_mut() {
            artifact.applied_at = ts;
        }
    }

    /// Leader path: render from this cycle's allocations, write, publish to
    /// shared state, and reload. Any render or write failure leaves the
    /// previous file and artifact untouched.
    pub async fn apply(
        &self,
        incoming: &[WeightAllocation],
        outgoing: &[WeightAllocation],
    ) -> Result<(), NginxError> {
        let generated_at = Utc::now();
        let text = render_config(incoming, outgoing, generated_at);
        validate_config(&text)?;

        self.write_atomic(&text)?;
        self.store.put_proxy_config(&text).await;

        if self.trigger_reload().await {
            *self.applied.write().await = Some(AppliedArtifact {
                text,
                applied_at: generated_at,
            });
        }
        Ok(())
    }

    /// Follower path: adopt an artifact another instance published. Writes
    /// and reloads but never re-publishes.
    pub async fn adopt(&self, text: &str, published_at: DateTime<Utc>) -> Result<(), NginxError> {
        validate_config(text)?;
        self.write_atomic(text)?;

        if self.trigger_reload().await {
            *self.applied.write().await = Some(AppliedArtifact {
                text: text.to_string(),
                applied_at: published_at,
            });
        }
        Ok(())
    }

    /// Write-to-temp-then-rename in the target directory, so a concurrent
    /// filesystem watcher never observes a partial file.
    fn write_atomic(&self, text: &str) -> Result<(), NginxError> {
        use std::io::Write;

        let dir = self
            .config_path
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        if self.backup_enabled && self.config_path.exists() {
            let backup = self
                .config_path
                .with_extension(format!("conf.{}.bak", Utc::now().format("%Y%m%d%H%M%S")));
            if let Err(e) = std::fs::copy(&self.config_path, &backup) {
                warn!(error = %e, "Failed to back up prior proxy config");
            }
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.config_path).map_err(|e| e.error)?;
        debug!(path = %self.config_path.display(), bytes = text.len(), "Proxy config written");
        Ok(())
    }

    /// Run the configured reload command. Exit code 0 means the proxy
    /// picked the file up; on failure the file stays for an external
    /// watcher and the in-memory artifact is kept as-is.
    async fn trigger_reload(&self) -> bool {
        let future = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.reload_command)
            .status();
        match tokio::time::timeout(Duration::from_secs(RELOAD_TIMEOUT_SECS), future).await {
            Ok(Ok(status)) if status.success() => {
                info!("Proxy reload succeeded");
                true
            }
            Ok(Ok(status)) => {
                warn!(code = status.code(), "Proxy reload command exited nonzero");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to spawn proxy reload command");
                false
            }
            Err(_) => {
                warn!(timeout_secs = RELOAD_TIMEOUT_SECS, "Proxy reload timed out");
                false
            }
        }
    }
}
