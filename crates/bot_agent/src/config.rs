//! Agent configuration types and defaults.

use crate::backoff::BackoffStrategy;
use bot_protocol::TenantId;
use std::time::Duration;

/// Everything an agent needs to reach and identify itself to the coordinator.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Coordinator `host:port`. Resolved on every connect attempt.
    pub coordinator_address: String,

    /// Identity of the game server this agent represents. Constant across reconnects.
    pub tenant_id: TenantId,

    /// Heartbeat period while connected.
    pub keepalive_interval: Duration,

    /// Upper bound on TCP connect plus handshake write.
    pub connect_timeout: Duration,

    /// Delay policy between failed connect attempts.
    pub backoff: BackoffStrategy,

    /// A session closed sooner than this without receiving a frame counts as
    /// a failed attempt and is followed by a backoff wait.
    pub stable_after: Duration,

    /// Upper bound on one outbound frame. A coordinator that stops reading
    /// for this long fails the session.
    pub write_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator_address: "127.0.0.1:7000".to_string(),
            tenant_id: 0,
            keepalive_interval: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffStrategy::default(),
            stable_after: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with `BOTLINK_COORDINATOR` and `BOTLINK_TENANT_ID`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Replaces the address and tenant with `BOTLINK_COORDINATOR` and
    /// `BOTLINK_TENANT_ID` when set. Unparsable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides), reading
    /// variables through `lookup`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("BOTLINK_COORDINATOR") {
            self.coordinator_address = address.trim_start_matches("tcp://").to_string();
        }

        if let Some(tenant_id) = lookup("BOTLINK_TENANT_ID").and_then(|id| id.trim().parse().ok()) {
            self.tenant_id = tenant_id;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(120));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff, BackoffStrategy::Fixed(Duration::from_secs(10)));
        assert_eq!(config.stable_after, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_keep_unrelated_fields() {
        let vars = HashMap::from([
            ("BOTLINK_COORDINATOR", "tcp://coordinator.internal:7100"),
            ("BOTLINK_TENANT_ID", " 42 "),
        ]);

        let config = AgentConfig {
            tenant_id: 7,
            keepalive_interval: Duration::from_secs(30),
            ..Default::default()
        }
        .with_overrides_from(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.coordinator_address, "coordinator.internal:7100");
        assert_eq!(config.tenant_id, 42);
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_unparsable_tenant_is_ignored() {
        let config = AgentConfig {
            tenant_id: 7,
            ..Default::default()
        }
        .with_overrides_from(|key| (key == "BOTLINK_TENANT_ID").then(|| "seven".to_string()));

        assert_eq!(config.tenant_id, 7);
        assert_eq!(config.coordinator_address, "127.0.0.1:7000");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("BOTLINK_COORDINATOR", "tcp://coordinator.internal:7100");
        std::env::set_var("BOTLINK_TENANT_ID", "42");

        let config = AgentConfig::from_env();

        std::env::remove_var("BOTLINK_COORDINATOR");
        std::env::remove_var("BOTLINK_TENANT_ID");

        assert_eq!(config.coordinator_address, "coordinator.internal:7100");
        assert_eq!(config.tenant_id, 42);
        assert_eq!(config.keepalive_interval, Duration::from_secs(120));
    }
}
