//! Backend Server Types

use serde::{Deserialize, Serialize};

/// The two independent backend pools the proxy balances across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// Servers handling inbound traffic.
    Incoming,
    /// Servers handling outbound traffic.
    Outgoing,
}

impl Pool {
    /// Both pools, in render order.
    pub const ALL: [Self; 2] = [Self::Incoming, Self::Outgoing];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    /// The upstream directive name rendered into the proxy config.
    #[must_use]
    pub const fn upstream_name(self) -> &'static str {
        match self {
            Self::Incoming => "upstream_incoming",
            Self::Outgoing => "upstream_outgoing",
        }
    }

    /// First internal loopback port allocated to this pool's local
    /// proxy server blocks.
    #[must_use]
    pub const fn internal_base_port(self) -> u16 {
        match self {
            Self::Incoming => 8081,
            Self::Outgoing => 9081,
        }
    }
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a backend server.
///
/// Lives in the process-wide registry; mutated at runtime by the admin
/// surface (add/remove/update/toggle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ServerDescriptor {
    /// Stable identifier, unique across both pools.
    pub id: String,
    /// Hostname the proxy forwards to. May carry a path suffix
    /// (e.g. `api.example.com/v2`).
    pub host: String,
    /// Optional port; absent or empty means "no port".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Display name. Falls back to `id` when empty.
    #[serde(default)]
    pub name: String,
    /// Static deployment-config toggle. Disabled servers never receive
    /// traffic regardless of score.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Which pool this server belongs to.
    pub pool: Pool,
}

const fn default_enabled() -> bool {
    true
}

impl ServerDescriptor {
    /// `host` if no port is set, `host:port` otherwise.
    #[must_use]
    pub fn address(&self) -> String {
        match self.port.as_deref() {
            Some(port) if !port.is_empty() => format!("{}:{}", self.host, port),
            _ => self.host.clone(),
        }
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Validate descriptor fields. Returns an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("Server id cannot be empty");
        }
        if self.host.trim().is_empty() {
            return Err("Server host cannot be empty");
        }
        Ok(())
    }
}
