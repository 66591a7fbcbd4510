//! `botlink` entry point.
//!
//! Runs either side of the control channel: an agent that keeps one game
//! server connected to the coordinator, or the coordinator that accepts agents.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::anyhow;
use bot_agent::{AgentConfig, AgentEvent, AgentSupervisor, DisconnectReason};
use bot_coordinator::{Coordinator, CoordinatorConfig, CoordinatorEvent};
use bot_protocol::Command;
use cli::{CliArgs, Mode};
use config::AppConfig;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Application {
    config: AppConfig,
    mode: Mode,
}

impl Application {
    /// Loads the config file and folds environment and CLI overrides into it.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        match &args.mode {
            Mode::Agent {
                coordinator_address,
                tenant_id,
            } => {
                config.apply_env_overrides();
                if let Some(address) = coordinator_address {
                    config.agent.coordinator_address = address.clone();
                }
                if let Some(tenant_id) = tenant_id {
                    config.agent.tenant_id = *tenant_id;
                }
            }
            Mode::Coordinator {
                bind_address,
                max_sessions,
            } => {
                if let Some(address) = bind_address {
                    config.coordinator.bind_address = address.clone();
                }
                if let Some(max_sessions) = max_sessions {
                    config.coordinator.max_sessions = *max_sessions;
                }
            }
        }

        config
            .validate(args.mode.role())
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self {
            config,
            mode: args.mode,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match signals::wait_for_shutdown_signal().await {
                Ok(()) => info!("🛑 Shutdown signal received, initiating graceful shutdown..."),
                Err(e) => error!("❌ Signal handling failed, shutting down: {}", e),
            }
            trigger.cancel();
        });

        match self.mode {
            Mode::Agent { .. } => run_agent(self.config.to_agent_config(), shutdown).await,
            Mode::Coordinator { .. } => {
                let status_interval =
                    Duration::from_secs(self.config.coordinator.status_interval_secs);
                let config = self.config.to_coordinator_config()?;
                run_coordinator(config, status_interval, shutdown).await
            }
        }
    }
}

async fn run_agent(config: AgentConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(
        "🤖 Agent for tenant {} connecting to {}",
        config.tenant_id, config.coordinator_address
    );
    info!("  💓 Keepalive every {:?}", config.keepalive_interval);
    info!(
        "  ⏱️ Connect timeout {:?}, backoff {:?}",
        config.connect_timeout, config.backoff
    );

    let (supervisor, mut events) = AgentSupervisor::new(config);
    let supervisor = supervisor.spawn(shutdown);

    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::Connecting { session_id, attempt } => {
                debug!(%session_id, attempt, "Connecting")
            }
            AgentEvent::Connected { session_id } => info!(%session_id, "✅ Session live"),
            AgentEvent::Command { session_id, command } => {
                info!(%session_id, "📥 Command received: {}", describe(&command));
                if let Some(raw) = &command.raw_data {
                    debug!(%session_id, "Raw payload: {}", raw);
                }
            }
            AgentEvent::ReconnectRequested { session_id, .. } => {
                info!(%session_id, "🔄 Coordinator requested a reconnect")
            }
            AgentEvent::Disconnected { session_id, reason } => match reason {
                DisconnectReason::Failed(_) => debug!(%session_id, "Session failed: {}", reason),
                _ => debug!(%session_id, "Session ended: {}", reason),
            },
        }
    }

    supervisor.await?;
    info!("👋 Agent stopped");
    Ok(())
}

async fn run_coordinator(
    config: CoordinatorConfig,
    status_interval: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("🌐 Coordinator binding {}", config.bind_address);
    info!(
        "  👥 Max sessions {} | handshake timeout {:?} | idle eviction after {:?}",
        config.max_sessions, config.handshake_timeout, config.session_timeout
    );

    let coordinator = Coordinator::new(config);
    let mut events = coordinator.subscribe();

    let mut server = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    let mut status = tokio::time::interval(status_interval);
    status.tick().await;
    let mut stats = PeriodStats::default();

    let outcome = loop {
        tokio::select! {
            result = &mut server => break result,
            event = events.recv() => match event {
                Ok(event) => stats.record(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} events skipped", skipped)
                }
                // The coordinator holds the sender; the server branch ends the loop.
                Err(RecvError::Closed) => {}
            },
            _ = status.tick() => {
                info!(
                    "📊 {} active session(s) | {} registered, {} replaced, {} closed, \
                     {} evicted | {} acks, {} heartbeats",
                    coordinator.registry().len(),
                    stats.registered,
                    stats.replaced,
                    stats.closed,
                    stats.evicted,
                    stats.acknowledged,
                    stats.heartbeats,
                );
                stats = PeriodStats::default();
            }
        }
    };

    outcome??;
    info!("👋 Coordinator stopped");
    Ok(())
}

/// Event counts for one status period.
#[derive(Debug, Default)]
struct PeriodStats {
    registered: u64,
    replaced: u64,
    closed: u64,
    evicted: u64,
    acknowledged: u64,
    heartbeats: u64,
}

impl PeriodStats {
    fn record(&mut self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::SessionRegistered { .. } => self.registered += 1,
            CoordinatorEvent::SessionReplaced { .. } => self.replaced += 1,
            CoordinatorEvent::SessionClosed { .. } => self.closed += 1,
            CoordinatorEvent::SessionEvicted { .. } => self.evicted += 1,
            CoordinatorEvent::Acknowledged { .. } => self.acknowledged += 1,
            CoordinatorEvent::Heartbeat { .. } => self.heartbeats += 1,
        }
    }
}

/// One-line summary of a command's entry kinds, following the chain.
fn describe(command: &Command) -> String {
    let mut kinds = Vec::new();
    let mut current = Some(command);
    while let Some(step) = current {
        kinds.extend(step.entries.iter().map(|item| format!("{:?}", item.kind)));
        current = step.chained_extra.as_deref();
    }

    if kinds.is_empty() {
        "(no entries)".to_string()
    } else {
        kinds.join(" -> ")
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start botlink: {:?}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bot_protocol::{CommandItem, CommandKind};

    #[test]
    fn test_describe_follows_chain() {
        let command = Command::new()
            .with_entry(CommandItem::new(CommandKind::Kick).with_target("griefer"))
            .then(Command::announce("griefer was kicked"));
        assert_eq!(describe(&command), "Kick -> Announce");
        assert_eq!(describe(&Command::new()), "(no entries)");
    }

    #[test]
    fn test_period_stats_counts_by_kind() {
        let mut stats = PeriodStats::default();
        let session_id = bot_protocol::SessionId::new();
        stats.record(&CoordinatorEvent::Heartbeat { tenant_id: 1, session_id });
        stats.record(&CoordinatorEvent::Heartbeat { tenant_id: 2, session_id });
        stats.record(&CoordinatorEvent::Acknowledged { tenant_id: 1, session_id });

        assert_eq!(stats.heartbeats, 2);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.registered, 0);
    }
}
