//! Best-effort admission gate
//!
//! A node label that an external placement mechanism consults before
//! scheduling best-effort pods here. Without an orchestrator there is
//! nothing to gate and both operations are no-ops.

use crate::config::{AdmissionBackend, ControllerConfig};
use crate::models::ClusterContext;
use crate::orchestrator::Orchestrator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct AdmissionGate {
    orchestrated: bool,
    node_name: String,
    label: String,
    backend: AdmissionBackend,
    orchestrator: Option<Arc<dyn Orchestrator>>,
}

impl AdmissionGate {
    pub fn new(
        context: &ClusterContext,
        config: &ControllerConfig,
        orchestrator: Option<Arc<dyn Orchestrator>>,
    ) -> Self {
        Self {
            orchestrated: context.mode.is_orchestrated(),
            node_name: context.node_name.clone(),
            label: config.admission_label.clone(),
            backend: config.admission_backend,
            orchestrator,
        }
    }

    /// Allow best-effort placement on this node. Returns false if the label write failed.
    pub async fn enable(&self) -> bool {
        self.set(true).await
    }

    /// Block best-effort placement on this node. Returns false if the label write failed.
    pub async fn disable(&self) -> bool {
        self.set(false).await
    }

    async fn set(&self, enabled: bool) -> bool {
        if !self.orchestrated {
            return true;
        }

        let value = if enabled { "true" } else { "false" };
        let result = match self.backend {
            AdmissionBackend::Api => match &self.orchestrator {
                Some(orchestrator) => {
                    orchestrator
                        .set_node_label(&self.node_name, &self.label, value)
                        .await
                }
                None => Err(anyhow::anyhow!("no orchestrator client configured")),
            },
            AdmissionBackend::Kubectl => kubectl_label(&self.node_name, &self.label, value).await,
        };

        match result {
            Ok(()) => {
                debug!(node = %self.node_name, label = %self.label, value = value, "Set admission label");
                true
            }
            Err(e) => {
                warn!(node = %self.node_name, label = %self.label, value = value, error = %format!("{:#}", e), "Cannot set admission label");
                false
            }
        }
    }
}

fn kubectl_label_args(node_name: &str, key: &str, value: &str) -> Vec<String> {
    vec![
        "label".to_string(),
        "--overwrite".to_string(),
        "nodes".to_string(),
        node_name.to_string(),
        format!("{}={}", key, value),
    ]
}

async fn kubectl_label(node_name: &str, key: &str, value: &str) -> Result<()> {
    let output = Command::new("kubectl")
        .args(kubectl_label_args(node_name, key, value))
        .output()
        .await
        .context("Failed to run kubectl")?;

    if !output.status.success() {
        anyhow::bail!(
            "kubectl exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{k8s_config, test_config, FakeOrchestrator};

    #[tokio::test]
    async fn test_standalone_is_noop() {
        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        let gate = AdmissionGate::new(
            &ClusterContext::standalone(),
            &test_config(),
            Some(orchestrator.clone()),
        );

        assert!(gate.disable().await);
        assert!(gate.enable().await);
        assert!(orchestrator.labels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggles_node_label() {
        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        let config = k8s_config();
        let gate = AdmissionGate::new(
            &ClusterContext::orchestrated("node-1", 4),
            &config,
            Some(orchestrator.clone()),
        );

        assert!(gate.disable().await);
        assert!(gate.enable().await);

        assert_eq!(
            orchestrator.label_values("hyperpilot.io/be-enabled"),
            vec!["false".to_string(), "true".to_string()]
        );
        let labels = orchestrator.labels.lock().unwrap();
        assert!(labels.iter().all(|(node, _, _)| node == "node-1"));
    }

    #[tokio::test]
    async fn test_label_failure_is_reported() {
        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        orchestrator.set_unreachable(true);
        let gate = AdmissionGate::new(
            &ClusterContext::orchestrated("node-1", 4),
            &k8s_config(),
            Some(orchestrator),
        );

        assert!(!gate.disable().await);
    }

    #[test]
    fn test_kubectl_args() {
        assert_eq!(
            kubectl_label_args("node-1", "hyperpilot.io/be-enabled", "false"),
            vec![
                "label",
                "--overwrite",
                "nodes",
                "node-1",
                "hyperpilot.io/be-enabled=false"
            ]
        );
    }
}
