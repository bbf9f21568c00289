use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use telelocust_config::Config;
use telelocust_core::RunOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RunOrchestrator>,
    pub config: Arc<Config>,
    /// Hits on `/up` since startup.
    pub up_counter: Arc<AtomicU64>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("data_root", &self.config.data_root())
            .field("runs", &self.orchestrator.registry().len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(orchestrator: RunOrchestrator, config: Config) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
            up_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn orchestrator(&self) -> &RunOrchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Increments the `/up` counter and returns the new value.
    pub fn bump_up_counter(&self) -> u64 {
        self.up_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
