//! Admission control: decides when a pending run may start.
//!
//! Two semaphores bound execution. One holds a permit per executor slot and
//! the other a permit per MB of GPU memory. A run must hold both before it
//! reaches the harness, and releases both when its permit is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use evald_monitor::ResourceMonitor;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::error::Error;
use crate::types::RunConfig;

/// Run config key that overrides the default memory estimate.
pub const MEMORY_ESTIMATE_KEY: &str = "memory_estimate_mb";

/// Gatekeeper shared by every task driver.
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    memory: Arc<Semaphore>,
    max_slots: usize,
    budget_mb: u32,
    in_flight: Arc<AtomicUsize>,
    monitor: Arc<dyn ResourceMonitor>,
    config: OrchestratorConfig,
}

impl AdmissionController {
    /// Size the controller from config and the monitor's view of the GPUs.
    pub async fn new(config: OrchestratorConfig, monitor: Arc<dyn ResourceMonitor>) -> Self {
        let budget_mb = resolve_budget(&config, monitor.as_ref()).await;
        let max_slots = config.max_concurrent_runs.max(1);
        info!(
            slots = max_slots,
            memory_budget_mb = budget_mb,
            gpu_gating = config.gpu_gating,
            "admission controller ready"
        );
        Self {
            slots: Arc::new(Semaphore::new(max_slots)),
            memory: Arc::new(Semaphore::new(budget_mb as usize)),
            max_slots,
            budget_mb,
            in_flight: Arc::new(AtomicUsize::new(0)),
            monitor,
            config,
        }
    }

    #[must_use]
    pub fn budget_mb(&self) -> u32 {
        self.budget_mb
    }

    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    #[must_use]
    pub fn available_memory_mb(&self) -> usize {
        self.memory.available_permits()
    }

    /// Runs currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// GPU memory a run with this config claims, clamped to the budget.
    #[must_use]
    pub fn demand_mb(&self, config: &RunConfig) -> u32 {
        config
            .get(MEMORY_ESTIMATE_KEY)
            .and_then(serde_json::Value::as_u64)
            .map_or(self.config.run_memory_estimate_mb, |mb| {
                u32::try_from(mb).unwrap_or(u32::MAX)
            })
            .min(self.budget_mb)
    }

    /// Wait until a run demanding `demand_mb` may start.
    ///
    /// `on_delay` is called once if the wait exceeds the configured warning
    /// threshold, with a reason naming the scarce resource. Dropping the
    /// returned future releases anything acquired so far.
    pub async fn admit(&self, demand_mb: u32, on_delay: impl FnOnce(String)) -> RunPermit {
        let started = Instant::now();
        let warn_after = self.config.resource_wait_warn();
        let mut on_delay = Some(on_delay);

        let acquire = async {
            let slot = self.slots.clone().acquire_owned().await;
            let memory = self.memory.clone().acquire_many_owned(demand_mb).await;
            (slot, memory)
        };
        tokio::pin!(acquire);
        let warn = tokio::time::sleep(warn_after);
        tokio::pin!(warn);

        let (slot, memory) = loop {
            tokio::select! {
                biased;
                permits = &mut acquire => break permits,
                () = &mut warn, if on_delay.is_some() => {
                    if let Some(f) = on_delay.take() {
                        f(Error::ResourceExhausted(format!(
                            "waiting for an executor slot and {demand_mb} MB of GPU memory"
                        ))
                        .to_string());
                    }
                }
            }
        };

        let counted = self.config.gpu_gating && self.wait_for_gpu(started, &mut on_delay).await;
        if !counted {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        RunPermit {
            _slot: slot.ok(),
            _memory: memory.ok(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Hold while live GPU utilization is at the ceiling and other runs of
    /// ours are executing. With nothing of ours in flight the load is
    /// external and waiting would starve the queue.
    ///
    /// Returns `true` when the run claimed the idle exemption, in which case
    /// it has already been counted as in flight.
    async fn wait_for_gpu(
        &self,
        started: Instant,
        on_delay: &mut Option<impl FnOnce(String)>,
    ) -> bool {
        let ceiling = self.config.gpu_utilization_ceiling;
        loop {
            // Only one waiter may take the exemption while nothing runs.
            if self
                .in_flight
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
            let utilization = self.monitor.sample().await.gpu.max_utilization_percent();
            match utilization {
                Some(u) if u >= ceiling => {
                    debug!(utilization = u, ceiling, "gpu saturated, holding run");
                    if started.elapsed() >= self.config.resource_wait_warn() {
                        if let Some(f) = on_delay.take() {
                            f(Error::ResourceExhausted(format!(
                                "gpu utilization {u:.1}% at or above {ceiling:.1}%"
                            ))
                            .to_string());
                        }
                    }
                    tokio::time::sleep(self.config.admission_poll()).await;
                }
                _ => return false,
            }
        }
    }
}

/// Held by a running run; releasing it frees the slot and memory.
pub struct RunPermit {
    _slot: Option<OwnedSemaphorePermit>,
    _memory: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of scheduler capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub in_flight_runs: usize,
    pub max_concurrent_runs: usize,
    pub available_slots: usize,
    pub memory_budget_mb: u32,
    pub available_memory_mb: usize,
}

async fn resolve_budget(config: &OrchestratorConfig, monitor: &dyn ResourceMonitor) -> u32 {
    if config.gpu_memory_ceiling_mb > 0 {
        return config.gpu_memory_ceiling_mb;
    }
    match monitor.sample().await.gpu.total_memory_mb() {
        Some(total) => {
            let budget = (total as f64 * config.gpu_memory_fraction.clamp(0.0, 1.0)) as u64;
            u32::try_from(budget).unwrap_or(u32::MAX).max(1)
        }
        None => {
            info!(
                fallback_mb = config.fallback_gpu_memory_mb,
                "no gpu memory reported, using fallback budget"
            );
            config.fallback_gpu_memory_mb.max(1)
        }
    }
}
