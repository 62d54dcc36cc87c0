//! Shared application state for the evald server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use evald_core::{Orchestrator, RecordStore};
use evald_models::Registry;
use evald_monitor::ResourceMonitor;

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Accepts and drives evaluation tasks
    pub orchestrator: Orchestrator,
    /// Source of GPU and host readings
    pub monitor: Arc<dyn ResourceMonitor>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self {
            orchestrator,
            monitor,
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.orchestrator.registry()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.orchestrator.store()
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
