//! Server Registry
//!
//! The single owned copy of pool membership. Seeded from deployment
//! config at boot and mutated at runtime by the admin surface; every
//! reader gets cloned descriptors, never internal references.

use std::collections::HashMap;

use tokio::sync::RwLock;

use vane_common::{Pool, ServerDescriptor};

/// Process-wide registry of backend servers across both pools.
pub struct ServerRegistry {
    inner: RwLock<HashMap<String, ServerDescriptor>>,
}

impl ServerRegistry {
    /// Seed the registry from deployment config.
    #[must_use]
    pub fn new(servers: impl IntoIterator<Item = ServerDescriptor>) -> Self {
        let inner = servers
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Look up one server.
    pub async fn get(&self, id: &str) -> Option<ServerDescriptor> {
        self.inner.read().await.get(id).cloned()
    }

    /// Whether a server with this id exists in either pool.
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Total number of configured servers across both pools.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Servers belonging to `pool`, ordered by id for deterministic output.
    pub async fn pool_servers(&self, pool: Pool) -> Vec<ServerDescriptor> {
        let mut servers: Vec<_> = self
            .inner
            .read()
            .await
            .values()
            .filter(|s| s.pool == pool)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Every configured server, ordered by id.
    pub async fn all(&self) -> Vec<ServerDescriptor> {
        let mut servers: Vec<_> = self.inner.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Add or replace a server. Returns an error message for an invalid
    /// descriptor.
    pub async fn upsert(&self, descriptor: ServerDescriptor) -> Result<(), &'static str> {
        descriptor.validate()?;
        self.inner
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Remove a server. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Flip the static enabled toggle. Returns the new state, or `None`
    /// for an unknown server.
    pub async fn toggle_enabled(&self, id: &str) -> Option<bool> {
        let mut inner = self.inner.write().await;
        let server = inner.get_mut(id)?;
        server.enabled = !server.enabled;
        Some(server.enabled)
    }
}
