//! LLM keyboard pilot for an emulated x86 machine.
//!
//! Three parts cooperate: [`EmulatorFacade`] boots a virtualized guest and
//! exposes paced keyboard input plus PNG screenshots; the [`llm`] module
//! talks to OpenAI-compatible chat backends; [`AgentLoop`] runs the
//! conversation, extracts keyboard commands from each model reply and
//! types them into the guest. Dashboards observe both parts through
//! `on_update` snapshot subscriptions.

pub mod agent;
pub mod config;
pub mod emulator;
pub mod errors;
pub mod events;
pub mod llm;

use std::sync::Arc;

use crate::agent::observer::SyntheticObserver;
use crate::agent::state::{AgentConfig, Session};
use crate::config::EnvironmentConfig;
use crate::emulator::assets::AssetProber;
use crate::emulator::engine::EngineFactory;
use crate::llm::registry::ClientRegistry;

pub use crate::agent::engine::AgentLoop;
pub use crate::emulator::facade::EmulatorFacade;
pub use crate::errors::{EmuPilotError, EmuPilotResult};

/// Install the env-filtered log subscriber. Call once from the hosting
/// process; later calls are no-ops. `RUST_LOG` overrides the `info`
/// default.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Wire one environment into a ready-to-start pair: an emulator facade for
/// the configured guest OS and an agent loop bound to it. The facade still
/// needs `init` with a mount point before the machine boots.
pub fn build_session(
    env: &EnvironmentConfig,
    factory: Arc<dyn EngineFactory>,
    prober: Arc<dyn AssetProber>,
) -> EmuPilotResult<(Arc<EmulatorFacade>, Arc<AgentLoop>)> {
    let client = ClientRegistry::with_defaults().client_for(env.provider)?;
    let facade = EmulatorFacade::new(env.os, factory, prober);
    let agent = Arc::new(AgentLoop::new(
        Session::from_environment(env),
        client,
        Arc::new(SyntheticObserver),
        AgentConfig::default(),
    ));
    agent.set_emulator(facade.clone());
    tracing::info!(name = %env.name, os = %env.os, model = %env.model, "session wired");
    Ok((facade, agent))
}
