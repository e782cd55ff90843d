use std::sync::Arc;

use crate::clock::{Clock, UnixClock};
use crate::config::Config;

/// Daemon-wide state shared by every mount.
pub struct ServerState {
    config: Config,
    clock: Arc<dyn Clock>,
}

impl ServerState {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        ServerState { config, clock }
    }

    pub fn with_system_clock(config: Config) -> Self {
        Self::new(config, Arc::new(UnixClock))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Owner given to inodes of a freshly initialized mount.
    pub fn default_owner(&self) -> (u32, u32) {
        self.config.owner.resolve()
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("now", &self.clock.now())
            .finish()
    }
}
