use std::time::Duration;

use serde::{Deserialize, Serialize};
use share_state::ReputationConfig;

/// Runtime knobs for the hub core. Embedded verbatim in the connector's
/// TOML configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub liveness: LivenessSettings,
    pub delivery: DeliverySettings,
    pub reputation: ReputationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    /// Connections with no heartbeat or traffic for this long are evicted.
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            sweep_interval_secs: 15,
        }
    }
}

impl LivenessSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Bound of each connection's outbound push queue. Pushes to a full
    /// queue are dropped for that recipient only.
    pub outbound_queue_capacity: usize,
    /// Send a `conflict.detected` notice when an agent publishes about an
    /// entity someone else has claimed.
    pub notify_conflicts: bool,
    /// Publish `agent.connected` / `agent.disconnected` presence events.
    pub announce_presence: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 1024,
            notify_conflicts: true,
            announce_presence: false,
        }
    }
}

impl HubSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.liveness.heartbeat_timeout_secs == 0 {
            return Err("liveness.heartbeat_timeout_secs must be positive".into());
        }
        if self.liveness.sweep_interval_secs == 0 {
            return Err("liveness.sweep_interval_secs must be positive".into());
        }
        if self.delivery.outbound_queue_capacity == 0 {
            return Err("delivery.outbound_queue_capacity must be positive".into());
        }
        self.reputation
            .validate()
            .map_err(|e| format!("reputation: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(HubSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut settings = HubSettings::default();
        settings.delivery.outbound_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }
}
