pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::hub::{Hub, HubHandle};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<Config>,
}

impl AppState {
    /// Spawn a hub sized from `config` and wrap both. Must be called inside a
    /// tokio runtime.
    pub fn new(config: Config) -> Self {
        let hub = Hub::spawn(config.recent_window);
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}
