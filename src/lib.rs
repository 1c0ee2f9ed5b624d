pub mod client;
pub mod config;
pub mod error;
pub mod order;
pub mod rest;
pub mod store;
pub mod ws;

use std::sync::Arc;

use config::BoardConfig;
use store::TaskStore;
use ws::event::ChangeBroadcaster;

/// Shared application state passed to every request handler and server task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<BoardConfig>,
    /// Authoritative task store, the single server-held truth for order keys.
    pub store: Arc<TaskStore>,
    /// Fan-out of every committed mutation to all live connections.
    pub broadcaster: Arc<ChangeBroadcaster>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub async fn new(config: BoardConfig) -> anyhow::Result<Self> {
        let store = Arc::new(TaskStore::new(&config.data_dir).await?);
        Ok(Self {
            config: Arc::new(config),
            store,
            broadcaster: Arc::new(ChangeBroadcaster::new()),
            started_at: std::time::Instant::now(),
        })
    }
}
