//! Kubernetes API orchestrator

use super::Orchestrator;
use crate::models::{PodContainer, PodInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PropagationPolicy};
use kube::Client;
use tracing::debug;

/// Orchestrator backed by the Kubernetes API server
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    /// Create a client from the in-cluster service account, or the local
    /// kubeconfig when running outside a cluster
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to initialize Kubernetes client")?;
        Ok(Self { client })
    }

    /// Reduce a pod object to the fields classification uses
    pub fn pod_info(pod: &Pod) -> PodInfo {
        let containers = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|c| PodContainer {
                        name: c.name.clone(),
                        container_id: c.container_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        PodInfo {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            containers,
        }
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .with_context(|| format!("Failed to list pods for selector {}", label_selector))?;

        Ok(list.items.iter().map(Self::pod_info).collect())
    }

    async fn node_cpu_capacity(&self, node_name: &str) -> Result<u32> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes
            .get(node_name)
            .await
            .with_context(|| format!("Failed to read node {}", node_name))?;

        let quantity = node
            .status
            .and_then(|s| s.capacity)
            .and_then(|c| c.get("cpu").cloned())
            .with_context(|| format!("Node {} reports no cpu capacity", node_name))?;

        parse_cpu_quantity(&quantity.0)
            .with_context(|| format!("Unparseable cpu capacity {:?}", quantity.0))
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Orphan),
            ..DeleteParams::default()
        };

        pods.delete(name, &params)
            .await
            .with_context(|| format!("Failed to delete pod {}/{}", namespace, name))?;

        debug!(pod = %name, namespace = %namespace, "Deleted pod");
        Ok(())
    }

    async fn set_node_label(&self, node_name: &str, key: &str, value: &str) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let mut labels = serde_json::Map::new();
        labels.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        let patch = serde_json::json!({ "metadata": { "labels": labels } });

        nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to label node {} with {}={}", node_name, key, value))?;
        Ok(())
    }
}

/// Parse a Kubernetes cpu quantity ("4", "3500m", "2.5") into whole cores.
///
/// Fractions are truncated; zero cores is rejected since the value is a divisor.
pub fn parse_cpu_quantity(quantity: &str) -> Option<u32> {
    let quantity = quantity.trim();
    let cores = if let Some(millis) = quantity.strip_suffix('m') {
        millis.parse::<u64>().ok()? / 1000
    } else {
        quantity.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)? as u64
    };

    u32::try_from(cores).ok().filter(|c| *c > 0)
}
