//! TOML configuration for the `botlink` binary.
//!
//! The file has one section per component. A missing file is written out
//! with defaults so operators have something to edit.

use anyhow::Context;
use bot_agent::{AgentConfig, BackoffStrategy};
use bot_coordinator::CoordinatorConfig;
use bot_protocol::TenantId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which side of the channel this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Coordinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Coordinator `host:port`; a `tcp://` prefix is accepted.
    pub coordinator_address: String,
    pub tenant_id: TenantId,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: BackoffKind,
    /// Fixed delay, or the first delay of the exponential policy.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Cap for the exponential policy.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    /// Sessions dropped sooner than this without a frame from the coordinator
    /// are retried after the backoff delay.
    #[serde(default = "default_stable_after")]
    pub stable_after_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

fn default_keepalive_interval() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_backoff_strategy() -> BackoffKind {
    BackoffKind::Fixed
}

fn default_backoff() -> u64 {
    10
}

fn default_backoff_max() -> u64 {
    300
}

fn default_stable_after() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    30
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            coordinator_address: "127.0.0.1:7000".to_string(),
            tenant_id: 0,
            keepalive_interval_secs: default_keepalive_interval(),
            connect_timeout_secs: default_connect_timeout(),
            backoff_strategy: default_backoff_strategy(),
            backoff_secs: default_backoff(),
            backoff_max_secs: default_backoff_max(),
            stable_after_secs: default_stable_after(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    pub bind_address: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Zero disables idle eviction.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    /// A dispatch stuck this long on an agent that stopped reading drops it.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Period of the session-count summary log line.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_max_sessions() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_session_timeout() -> u64 {
    360
}

fn default_reap_interval() -> u64 {
    30
}

fn default_status_interval() -> u64 {
    60
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7000".to_string(),
            max_sessions: default_max_sessions(),
            handshake_timeout_secs: default_handshake_timeout(),
            session_timeout_secs: default_session_timeout(),
            reap_interval_secs: default_reap_interval(),
            write_timeout_secs: default_write_timeout(),
            status_interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads `path`, or writes and returns the defaults when it does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing default config to {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks the section `role` runs from, plus logging. The other role's
    /// section is loaded but never used, so it is not checked.
    pub fn validate(&self, role: Role) -> Result<(), String> {
        match role {
            Role::Agent => self.validate_agent()?,
            Role::Coordinator => self.validate_coordinator()?,
        }
        self.validate_logging()
    }

    fn validate_agent(&self) -> Result<(), String> {
        let agent = &self.agent;
        let address = agent.coordinator_address.trim_start_matches("tcp://");
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(format!(
                    "Invalid coordinator address: {}",
                    agent.coordinator_address
                ))
            }
        }
        if agent.keepalive_interval_secs == 0 {
            return Err("Agent keepalive interval must be greater than zero".to_string());
        }
        if agent.connect_timeout_secs == 0 {
            return Err("Agent connect timeout must be greater than zero".to_string());
        }
        if agent.write_timeout_secs == 0 {
            return Err("Agent write timeout must be greater than zero".to_string());
        }
        if agent.backoff_secs == 0 {
            return Err("Agent backoff delay must be greater than zero".to_string());
        }
        if agent.backoff_strategy == BackoffKind::Exponential
            && agent.backoff_max_secs < agent.backoff_secs
        {
            return Err("Exponential backoff cap must not be below its base delay".to_string());
        }
        Ok(())
    }

    fn validate_coordinator(&self) -> Result<(), String> {
        let coordinator = &self.coordinator;
        if coordinator.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", coordinator.bind_address));
        }
        if coordinator.max_sessions == 0 {
            return Err("Coordinator max_sessions must be greater than zero".to_string());
        }
        if coordinator.handshake_timeout_secs == 0 {
            return Err("Coordinator handshake timeout must be greater than zero".to_string());
        }
        if coordinator.reap_interval_secs == 0 {
            return Err("Coordinator reap interval must be greater than zero".to_string());
        }
        if coordinator.write_timeout_secs == 0 {
            return Err("Coordinator write timeout must be greater than zero".to_string());
        }
        if coordinator.status_interval_secs == 0 {
            return Err("Coordinator status interval must be greater than zero".to_string());
        }
        Ok(())
    }

    fn validate_logging(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }
        Ok(())
    }

    /// Folds `BOTLINK_COORDINATOR` and `BOTLINK_TENANT_ID` into the agent section.
    pub fn apply_env_overrides(&mut self) {
        let overlay = self.to_agent_config().with_env_overrides();
        self.agent.coordinator_address = overlay.coordinator_address;
        self.agent.tenant_id = overlay.tenant_id;
    }

    pub fn to_agent_config(&self) -> AgentConfig {
        let agent = &self.agent;
        let backoff = match agent.backoff_strategy {
            BackoffKind::Fixed => {
                BackoffStrategy::Fixed(Duration::from_secs(agent.backoff_secs))
            }
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                base: Duration::from_secs(agent.backoff_secs),
                max: Duration::from_secs(agent.backoff_max_secs),
            },
        };

        AgentConfig {
            coordinator_address: agent
                .coordinator_address
                .trim_start_matches("tcp://")
                .to_string(),
            tenant_id: agent.tenant_id,
            keepalive_interval: Duration::from_secs(agent.keepalive_interval_secs),
            connect_timeout: Duration::from_secs(agent.connect_timeout_secs),
            backoff,
            stable_after: Duration::from_secs(agent.stable_after_secs),
            write_timeout: Duration::from_secs(agent.write_timeout_secs),
        }
    }

    pub fn to_coordinator_config(&self) -> anyhow::Result<CoordinatorConfig> {
        let coordinator = &self.coordinator;
        let bind_address = coordinator
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", coordinator.bind_address))?;

        Ok(CoordinatorConfig {
            bind_address,
            max_sessions: coordinator.max_sessions,
            handshake_timeout: Duration::from_secs(coordinator.handshake_timeout_secs),
            session_timeout: Duration::from_secs(coordinator.session_timeout_secs),
            reap_interval: Duration::from_secs(coordinator.reap_interval_secs),
            write_timeout: Duration::from_secs(coordinator.write_timeout_secs),
        })
    }
}
