pub mod config;
pub mod datasets;
pub mod models;
pub mod monitor;
pub mod serve;

use std::time::Duration;

use evald_models::Registry;
use evald_monitor::{MonitorConfig, SystemMonitor};

use crate::config::EvaldConfig;

/// Registry over the configured directories, not yet scanned.
pub(crate) fn registry(config: &EvaldConfig) -> Registry {
    Registry::new(
        config.registry.models_dir.clone(),
        config.registry.datasets_dir.clone(),
    )
}

/// A monitor probing this machine with the configured driver and timeout.
pub(crate) fn system_monitor(config: &EvaldConfig) -> SystemMonitor {
    SystemMonitor::new(MonitorConfig {
        nvidia_smi: config.monitor.nvidia_smi.clone(),
        timeout: Duration::from_millis(config.monitor.timeout_ms),
        ..MonitorConfig::default()
    })
}
