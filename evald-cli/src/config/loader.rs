use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evald_core::OrchestratorConfig;

use super::types::{
    DEFAULT_HOST, DEFAULT_MONITOR_CACHE_TTL_MS, DEFAULT_MONITOR_TIMEOUT_MS, DEFAULT_PORT,
    DEFAULT_SIMULATED_DELAY_MS, EvaldConfig, HarnessSection, MonitorSection, RawEvaldConfig,
    RawHarnessConfig, RawMonitorConfig, RawOrchestratorConfig, RawRegistryConfig,
    RawServerConfig, RawStoreConfig, RegistrySection, ServerSection, StoreSection,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<EvaldConfig> {
        Self::load_layers(&[Self::user_config_path(), Self::project_config_path()])
    }

    /// Merge the given files in order; missing files are skipped
    pub fn load_layers(paths: &[PathBuf]) -> Result<EvaldConfig> {
        let mut raw = RawEvaldConfig::default();
        for path in paths {
            if let Some(layer) = Self::read_raw(path)? {
                raw = Self::merge_raw(raw, layer);
            }
        }
        Ok(Self::finalize(raw))
    }

    /// Get user config path (`$XDG_CONFIG_HOME/evald/config.toml`)
    pub fn user_config_path() -> PathBuf {
        evald_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with EVALD_PROJECT_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("EVALD_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".evald/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<Option<RawEvaldConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let raw = toml::from_str(&contents)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(Some(raw))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawEvaldConfig, overlay: RawEvaldConfig) -> RawEvaldConfig {
        let (b, o) = (base.orchestrator, overlay.orchestrator);
        RawEvaldConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
            },
            registry: RawRegistryConfig {
                models_dir: overlay.registry.models_dir.or(base.registry.models_dir),
                datasets_dir: overlay.registry.datasets_dir.or(base.registry.datasets_dir),
            },
            orchestrator: RawOrchestratorConfig {
                max_concurrent_runs: o.max_concurrent_runs.or(b.max_concurrent_runs),
                gpu_memory_ceiling_mb: o.gpu_memory_ceiling_mb.or(b.gpu_memory_ceiling_mb),
                gpu_memory_fraction: o.gpu_memory_fraction.or(b.gpu_memory_fraction),
                fallback_gpu_memory_mb: o.fallback_gpu_memory_mb.or(b.fallback_gpu_memory_mb),
                run_memory_estimate_mb: o.run_memory_estimate_mb.or(b.run_memory_estimate_mb),
                gpu_gating: o.gpu_gating.or(b.gpu_gating),
                gpu_utilization_ceiling: o.gpu_utilization_ceiling.or(b.gpu_utilization_ceiling),
                admission_poll_ms: o.admission_poll_ms.or(b.admission_poll_ms),
                resource_wait_warn_secs: o.resource_wait_warn_secs.or(b.resource_wait_warn_secs),
                harness_timeout_secs: o.harness_timeout_secs.or(b.harness_timeout_secs),
                retained_tasks: o.retained_tasks.or(b.retained_tasks),
            },
            harness: RawHarnessConfig {
                kind: overlay.harness.kind.or(base.harness.kind),
                command: overlay.harness.command.or(base.harness.command),
                args: overlay.harness.args.or(base.harness.args),
                simulated_delay_ms: overlay
                    .harness
                    .simulated_delay_ms
                    .or(base.harness.simulated_delay_ms),
            },
            store: RawStoreConfig {
                kind: overlay.store.kind.or(base.store.kind),
                path: overlay.store.path.or(base.store.path),
            },
            monitor: RawMonitorConfig {
                nvidia_smi: overlay.monitor.nvidia_smi.or(base.monitor.nvidia_smi),
                timeout_ms: overlay.monitor.timeout_ms.or(base.monitor.timeout_ms),
                cache_ttl_ms: overlay.monitor.cache_ttl_ms.or(base.monitor.cache_ttl_ms),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawEvaldConfig) -> EvaldConfig {
        let defaults = OrchestratorConfig::default();
        let o = raw.orchestrator;
        EvaldConfig {
            server: ServerSection {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
            },
            registry: RegistrySection {
                models_dir: raw
                    .registry
                    .models_dir
                    .map_or_else(evald_paths::models_dir, expand_home),
                datasets_dir: raw
                    .registry
                    .datasets_dir
                    .map_or_else(evald_paths::datasets_dir, expand_home),
            },
            orchestrator: OrchestratorConfig {
                max_concurrent_runs: o.max_concurrent_runs.unwrap_or(defaults.max_concurrent_runs),
                gpu_memory_ceiling_mb: o
                    .gpu_memory_ceiling_mb
                    .unwrap_or(defaults.gpu_memory_ceiling_mb),
                gpu_memory_fraction: o.gpu_memory_fraction.unwrap_or(defaults.gpu_memory_fraction),
                fallback_gpu_memory_mb: o
                    .fallback_gpu_memory_mb
                    .unwrap_or(defaults.fallback_gpu_memory_mb),
                run_memory_estimate_mb: o
                    .run_memory_estimate_mb
                    .unwrap_or(defaults.run_memory_estimate_mb),
                gpu_gating: o.gpu_gating.unwrap_or(defaults.gpu_gating),
                gpu_utilization_ceiling: o
                    .gpu_utilization_ceiling
                    .unwrap_or(defaults.gpu_utilization_ceiling),
                admission_poll_ms: o.admission_poll_ms.unwrap_or(defaults.admission_poll_ms),
                resource_wait_warn_secs: o
                    .resource_wait_warn_secs
                    .unwrap_or(defaults.resource_wait_warn_secs),
                harness_timeout_secs: o
                    .harness_timeout_secs
                    .unwrap_or(defaults.harness_timeout_secs),
                retained_tasks: o.retained_tasks.unwrap_or(defaults.retained_tasks),
            },
            harness: HarnessSection {
                kind: raw.harness.kind.unwrap_or_default(),
                command: raw.harness.command,
                args: raw.harness.args.unwrap_or_default(),
                simulated_delay_ms: raw
                    .harness
                    .simulated_delay_ms
                    .unwrap_or(DEFAULT_SIMULATED_DELAY_MS),
            },
            store: StoreSection {
                kind: raw.store.kind.unwrap_or_default(),
                path: raw
                    .store
                    .path
                    .map_or_else(evald_paths::records_db_path, expand_home),
            },
            monitor: MonitorSection {
                nvidia_smi: raw
                    .monitor
                    .nvidia_smi
                    .unwrap_or_else(|| PathBuf::from("nvidia-smi")),
                timeout_ms: raw.monitor.timeout_ms.unwrap_or(DEFAULT_MONITOR_TIMEOUT_MS),
                cache_ttl_ms: raw
                    .monitor
                    .cache_ttl_ms
                    .unwrap_or(DEFAULT_MONITOR_CACHE_TTL_MS),
            },
        }
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}
