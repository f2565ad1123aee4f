pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::context::ServiceContext;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub metrics_enabled: bool,
}

impl AppState {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: Orchestrator::new(context),
            metrics_enabled: true,
        }
    }

    /// Toggle the `/metrics` endpoint and HTTP metrics layer
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}
