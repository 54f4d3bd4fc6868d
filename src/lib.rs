pub mod agent_engine;
pub mod browser;
pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod mcp;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::agent_engine::confirm::ChannelConfirmationGate;
use crate::agent_engine::engine::AgentEngine;
use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::loop_control::CancelSignal;
use crate::agent_engine::state::AgentEvent;
use crate::browser::backend::BrowserBackend;
use crate::browser::bridge::HttpBridgeChannel;
use crate::browser::transport::RetryPolicy;
use crate::commands::AgentHandle;
use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::llm::registry::ProviderRegistry;

/// A running engine task and the handle used to drive it.
pub struct Agent {
    pub handle: AgentHandle,
    pub task: JoinHandle<()>,
}

/// `RUST_LOG` wins; otherwise info for this crate.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pagepilot_lib=info,pagepilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Wires the registry, browser bridge and confirmation gate, then spawns the engine loop.
/// Must be called from inside a tokio runtime.
pub fn start(config: AppConfig) -> PilotResult<Agent> {
    let registry = ProviderRegistry::from_config(&config);
    tracing::info!(providers = ?registry.list_names(), "provider registry built");

    let channel = HttpBridgeChannel::from_config(&config.backend)?;
    let backend = BrowserBackend::new(Arc::new(channel), RetryPolicy::from(&config.backend));

    let bus = EventBus::new();
    let cancel = CancelSignal::new();
    let gate = Arc::new(ChannelConfirmationGate::new(bus.clone()));

    // Create the agent event channel (buffer=32).
    let (agent_tx, agent_rx) = mpsc::channel::<AgentEvent>(32);
    let mut engine = AgentEngine::new(
        config,
        Arc::new(Mutex::new(registry)),
        backend,
        gate.clone(),
        bus.clone(),
        cancel.clone(),
    )?;

    tracing::info!("spawning AgentEngine background task");
    let task = tokio::spawn(async move {
        engine.run_loop(agent_rx).await;
        tracing::info!("AgentEngine task exited");
    });

    Ok(Agent {
        handle: AgentHandle::new(agent_tx, cancel, gate, bus),
        task,
    })
}
