use std::path::PathBuf;

use evald_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};

/// Default host for the evald server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port for the evald server
pub const DEFAULT_PORT: u16 = 9000;

/// Default delay of the simulated harness
pub const DEFAULT_SIMULATED_DELAY_MS: u64 = 2_000;

pub const DEFAULT_MONITOR_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MONITOR_CACHE_TTL_MS: u64 = 2_000;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEvaldConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub registry: RawRegistryConfig,

    #[serde(default)]
    pub orchestrator: RawOrchestratorConfig,

    #[serde(default)]
    pub harness: RawHarnessConfig,

    #[serde(default)]
    pub store: RawStoreConfig,

    #[serde(default)]
    pub monitor: RawMonitorConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRegistryConfig {
    pub models_dir: Option<PathBuf>,
    pub datasets_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawOrchestratorConfig {
    pub max_concurrent_runs: Option<usize>,
    pub gpu_memory_ceiling_mb: Option<u32>,
    pub gpu_memory_fraction: Option<f64>,
    pub fallback_gpu_memory_mb: Option<u32>,
    pub run_memory_estimate_mb: Option<u32>,
    pub gpu_gating: Option<bool>,
    pub gpu_utilization_ceiling: Option<f64>,
    pub admission_poll_ms: Option<u64>,
    pub resource_wait_warn_secs: Option<u64>,
    pub harness_timeout_secs: Option<u64>,
    pub retained_tasks: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHarnessConfig {
    pub kind: Option<HarnessKind>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub simulated_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStoreConfig {
    pub kind: Option<StoreKind>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMonitorConfig {
    pub nvidia_smi: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaldConfig {
    pub server: ServerSection,
    pub registry: RegistrySection,
    pub orchestrator: OrchestratorConfig,
    pub harness: HarnessSection,
    pub store: StoreSection,
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySection {
    pub models_dir: PathBuf,
    pub datasets_dir: PathBuf,
}

/// Which evaluator runs behind the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessKind {
    /// Deterministic stand-in that sleeps and derives scores from the path
    #[default]
    Simulated,
    /// External program speaking JSON over stdin/stdout
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessSection {
    pub kind: HarnessKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub args: Vec<String>,
    pub simulated_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    pub kind: StoreKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSection {
    pub nvidia_smi: PathBuf,
    pub timeout_ms: u64,
    pub cache_ttl_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[server]
port = 9100

[orchestrator]
max_concurrent_runs = 4

[harness]
kind = "command"
command = "lm-eval"
"#;
        let raw: RawEvaldConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.server.port, Some(9100));
        assert!(raw.server.host.is_none());
        assert_eq!(raw.orchestrator.max_concurrent_runs, Some(4));
        assert!(raw.orchestrator.gpu_gating.is_none());
        assert_eq!(raw.harness.kind, Some(HarnessKind::Command));
        assert_eq!(raw.harness.command.as_deref(), Some("lm-eval"));
        assert!(raw.store.kind.is_none());
    }

    #[test]
    fn test_raw_config_empty_uses_none() {
        let raw: RawEvaldConfig = toml::from_str("").unwrap();

        assert!(raw.server.port.is_none());
        assert!(raw.registry.models_dir.is_none());
        assert!(raw.monitor.timeout_ms.is_none());
    }

    #[test]
    fn test_unknown_store_kind_is_rejected() {
        let result: Result<RawEvaldConfig, _> = toml::from_str("[store]\nkind = \"postgres\"\n");
        assert!(result.is_err());
    }
}
