//! Control-Plane Instance Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state advertised in an instance heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum InstanceStatus {
    /// Instance is running its periodic cycles.
    #[default]
    Active,
    /// Instance received a shutdown signal and is winding down.
    Draining,
}

/// Heartbeat published by each control-plane instance under a short TTL.
/// Fleet membership is the set of unexpired heartbeat keys; a crashed
/// instance deregisters implicitly when its key expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InstanceHeartbeat {
    /// Unique instance identifier.
    pub instance_id: String,
    /// When this heartbeat was published.
    pub last_seen: DateTime<Utc>,
    /// Advertised lifecycle state.
    pub status: InstanceStatus,
}

impl InstanceHeartbeat {
    /// A heartbeat for `instance_id` stamped now.
    #[must_use]
    pub fn now(instance_id: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            last_seen: Utc::now(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Draining).unwrap(),
            "\"draining\""
        );
    }

    #[test]
    fn heartbeat_round_trip() {
        let hb = InstanceHeartbeat::now("lb-1", InstanceStatus::Active);
        let json = serde_json::to_string(&hb).unwrap();
        let back: InstanceHeartbeat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hb);
    }
}
