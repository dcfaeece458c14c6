//! Orchestrator access
//!
//! In orchestrated mode the controller reads pod labels to reclassify
//! containers, reads the node object for its core count, evicts best-effort
//! pods, and flips a node label that gates best-effort admission.

mod kubernetes;

pub use kubernetes::{parse_cpu_quantity, KubeOrchestrator};

use crate::models::PodInfo;
use anyhow::Result;
use async_trait::async_trait;

/// Trait for orchestrator implementations
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Pods in all namespaces matching a label selector
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>>;

    /// CPU capacity of a node, in whole cores
    async fn node_cpu_capacity(&self, node_name: &str) -> Result<u32>;

    /// Delete a pod immediately (zero grace period)
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()>;

    /// Set a label on a node, overwriting any existing value
    async fn set_node_label(&self, node_name: &str, key: &str, value: &str) -> Result<()>;
}
