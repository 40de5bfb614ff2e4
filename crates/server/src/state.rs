use std::sync::Arc;
use tokio::sync::watch;

use runloop_core::{bookkeeping::FinalizedRun, Config, ControllerStatus, FinalizedRunStore, StoreError};

/// Shared application state
pub struct AppState {
    config: Config,
    status: watch::Receiver<ControllerStatus>,
    finalized: Arc<dyn FinalizedRunStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        status: watch::Receiver<ControllerStatus>,
        finalized: Arc<dyn FinalizedRunStore>,
    ) -> Self {
        Self {
            config,
            status,
            finalized,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Latest snapshot published by the controller.
    pub fn controller_status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn finalized_runs(&self) -> Result<Vec<FinalizedRun>, StoreError> {
        self.finalized.list()
    }
}
