//! Node identity and capacity, resolved once before the first cycle

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::models::ClusterContext;
use crate::orchestrator::Orchestrator;
use tracing::info;

/// Build the cluster context for the configured mode.
///
/// `node_name` is the value of the configured node name variable. In
/// orchestrated mode a missing name, an unreachable orchestrator or an
/// unreadable capacity are all fatal.
pub async fn resolve_context(
    config: &ControllerConfig,
    orchestrator: Option<&dyn Orchestrator>,
    node_name: Option<String>,
) -> Result<ClusterContext> {
    if !config.mode.is_orchestrated() {
        return Ok(ClusterContext::standalone());
    }

    let orchestrator = orchestrator.ok_or_else(|| {
        ControllerError::OrchestratorUnavailable("no orchestrator client".to_string())
    })?;

    let node_name = node_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ControllerError::MissingNodeName(config.node_name_env.clone()))?;

    let cpu_cores = orchestrator
        .node_cpu_capacity(&node_name)
        .await
        .map_err(|e| ControllerError::NodeCapacity {
            node: node_name.clone(),
            reason: format!("{:#}", e),
        })?;

    info!(node = %node_name, cpu_cores = cpu_cores, "Resolved node capacity");
    Ok(ClusterContext::orchestrated(node_name, cpu_cores))
}
