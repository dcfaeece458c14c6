//! Workload discovery and classification
//!
//! Rebuilds the set of tracked workloads from scratch every cycle. Class
//! precedence is: best-effort pod label (orchestrated mode) over the
//! container's own class label over the high-priority default. A container
//! is only ever promoted from HP to BE here, never demoted.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::models::{ClusterContext, CycleStats, PodRef, Workload, WorkloadClass};
use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerRuntime;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one discovery pass
#[derive(Debug, Default)]
pub struct Discovery {
    pub workloads: Vec<Workload>,
    pub stats: CycleStats,
    /// Containers skipped because the runtime failed on them
    pub skipped: usize,
    /// The orchestrator could not be queried; classification used runtime labels only
    pub orchestrator_degraded: bool,
}

impl Discovery {
    pub fn best_effort(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.iter().filter(|w| w.is_best_effort())
    }
}

/// Discovers running workloads and classifies them HP/BE
pub struct WorkloadRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
}

impl WorkloadRegistry {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Option<Arc<dyn Orchestrator>>,
    ) -> Self {
        Self {
            runtime,
            orchestrator,
        }
    }

    /// List, classify and floor the share weight of every running container.
    ///
    /// Updates `context.qos_app` in orchestrated mode. Only a failure to list
    /// containers at all is an error.
    pub async fn discover(
        &self,
        context: &mut ClusterContext,
        config: &ControllerConfig,
    ) -> Result<Discovery> {
        let ids = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| ControllerError::RuntimeUnavailable(format!("{:#}", e)))?;

        let mut discovery = Discovery::default();

        for id in ids {
            match self.track(&id, config).await {
                Ok(workload) => {
                    discovery.stats.add(workload.class, workload.shares);
                    discovery.workloads.push(workload);
                }
                Err(e) => {
                    discovery.skipped += 1;
                    warn!(container_id = %id, error = %format!("{:#}", e), "Problem with container, skipping");
                }
            }
        }

        if context.mode.is_orchestrated() {
            if let Some(orchestrator) = &self.orchestrator {
                if let Err(e) =
                    reconcile_best_effort(orchestrator.as_ref(), context, config, &mut discovery)
                        .await
                {
                    discovery.orchestrator_degraded = true;
                    warn!(error = %format!("{:#}", e), "Cannot talk to orchestrator, pod labels unknown");
                }

                if let Err(e) = resolve_qos_app(orchestrator.as_ref(), context, config).await {
                    discovery.orchestrator_degraded = true;
                    warn!(error = %format!("{:#}", e), "Cannot resolve QoS application");
                }
            }
        }

        debug!(
            hp = discovery.stats.hp_containers,
            be = discovery.stats.be_containers,
            skipped = discovery.skipped,
            "Discovery complete"
        );

        Ok(discovery)
    }

    /// Build the workload record for one container, raising its weight to the floor
    async fn track(&self, id: &str, config: &ControllerConfig) -> anyhow::Result<Workload> {
        let info = self.runtime.inspect(id).await?;

        let mut shares = info.cpu_shares;
        if shares < config.min_shares {
            shares = config.min_shares;
            self.runtime.update_shares(id, shares).await?;
            debug!(container_id = %id, from = info.cpu_shares, to = shares, "Raised shares to floor");
        }

        let class = WorkloadClass::from_label(info.labels.get(&config.class_label).map(String::as_str));

        Ok(Workload {
            id: info.id,
            name: info.name,
            class,
            shares,
            cpu_percent: 0.0,
            pod: None,
        })
    }
}

/// Promote containers of best-effort pods on this node and record their pod identity.
///
/// Pod containers unknown to the local runtime are ignored.
async fn reconcile_best_effort(
    orchestrator: &dyn Orchestrator,
    context: &ClusterContext,
    config: &ControllerConfig,
    discovery: &mut Discovery,
) -> anyhow::Result<()> {
    let pods = orchestrator
        .list_pods(&config.best_effort_selector())
        .await?;

    let index: HashMap<String, usize> = discovery
        .workloads
        .iter()
        .enumerate()
        .map(|(i, w)| (w.id.clone(), i))
        .collect();

    for pod in pods
        .iter()
        .filter(|p| p.node_name.as_deref() == Some(context.node_name.as_str()))
    {
        for container in &pod.containers {
            let Some(&i) = container.runtime_id().and_then(|id| index.get(id)) else {
                continue;
            };

            let workload = &mut discovery.workloads[i];
            if workload.class == WorkloadClass::HighPriority {
                workload.class = WorkloadClass::BestEffort;
                discovery.stats.promote_to_best_effort(workload.shares);
                debug!(container_id = %workload.id, pod = %pod.name, "Reclassified as best-effort from pod label");
            }
            workload.pod = Some(PodRef {
                name: pod.name.clone(),
                namespace: pod.namespace.clone(),
            });
        }
    }

    Ok(())
}

/// Pick the application whose SLO drives the controller: first container of the first QoS pod
async fn resolve_qos_app(
    orchestrator: &dyn Orchestrator,
    context: &mut ClusterContext,
    config: &ControllerConfig,
) -> anyhow::Result<()> {
    let pods = orchestrator.list_pods(&config.qos_selector()).await?;

    if pods.len() > 1 {
        warn!(count = pods.len(), "Multiple QoS tracked workloads, ignoring all but first");
    }

    match pods.first().and_then(|p| p.containers.first()) {
        Some(container) => {
            if context.qos_app != container.name {
                info!(qos_app = %container.name, "Tracking QoS application");
            }
            context.qos_app = container.name.clone();
        }
        None => {
            warn!(selector = %config.qos_selector(), "Cannot find QoS service name");
        }
    }

    Ok(())
}
