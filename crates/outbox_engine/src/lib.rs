use anyhow::Context as _;
use outbox_backend::QueueStoreService;
use outbox_domain::MessageTransport;
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod config;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{Engine, EngineCommand, EngineEvent, EngineHandle, perform_dispatch};

/// Starts an engine backed by the sqlite store under the resolved outbox
/// root, configured from the environment.
pub fn start_engine(
    transport: Arc<dyn MessageTransport>,
) -> anyhow::Result<(EngineHandle, broadcast::Sender<EngineEvent>)> {
    let persistence = QueueStoreService::new().context("failed to open queue store")?;
    Ok(Engine::start(transport, persistence, EngineConfig::from_env()))
}
