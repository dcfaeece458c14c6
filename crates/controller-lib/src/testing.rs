//! In-memory runtime and orchestrator used by unit tests

use crate::config::ControllerConfig;
use crate::models::{ContainerInfo, CpuCounters, PodContainer, PodInfo};
use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerRuntime;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub const CONFIG_JSON: &str = r#"{
    "mode": "docker",
    "period": 1,
    "min_shares": 2,
    "BE_growth_rate": 1.1,
    "BE_shrink_rate": 0.9,
    "slack_threshold_grow": 0.1,
    "slack_threshold_shrink": 0.05,
    "load_threshold_grow": 80,
    "load_threshold_shrink": 90
}"#;

pub fn test_config() -> ControllerConfig {
    ControllerConfig::from_json(CONFIG_JSON).unwrap()
}

pub fn k8s_config() -> ControllerConfig {
    let mut config = test_config();
    config.mode = crate::models::Mode::K8s;
    config
}

#[derive(Debug, Clone, Default)]
struct FakeContainer {
    info: ContainerInfo,
    counters: CpuCounters,
    fail_inspect: bool,
    fail_stats: bool,
}

/// Runtime keeping containers in a map; ids are listed in sorted order
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    pub unreachable: Mutex<bool>,
    pub fail_updates: Mutex<bool>,
    pub updates: Mutex<Vec<(String, u64)>>,
    pub killed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, shares: u64, class_label: Option<&str>) {
        let mut labels = HashMap::new();
        if let Some(value) = class_label {
            labels.insert("hyperpilot.io/wclass".to_string(), value.to_string());
        }
        let info = ContainerInfo {
            id: id.to_string(),
            name: format!("{}-name", id),
            cpu_shares: shares,
            labels,
        };
        self.containers.lock().unwrap().insert(
            id.to_string(),
            FakeContainer {
                info,
                ..FakeContainer::default()
            },
        );
    }

    pub fn set_counters(&self, id: &str, counters: CpuCounters) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.counters = counters;
        }
    }

    pub fn fail_inspect(&self, id: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.fail_inspect = true;
        }
    }

    pub fn fail_stats(&self, id: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.fail_stats = true;
        }
    }

    pub fn shares(&self, id: &str) -> Option<u64> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .map(|c| c.info.cpu_shares)
    }

    pub fn updates(&self) -> Vec<(String, u64)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<String>> {
        if *self.unreachable.lock().unwrap() {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let containers = self.containers.lock().unwrap();
        match containers.get(id) {
            Some(c) if !c.fail_inspect => Ok(c.info.clone()),
            Some(_) => Err(anyhow!("inspect failed for {}", id)),
            None => Err(anyhow!("no such container {}", id)),
        }
    }

    async fn update_shares(&self, id: &str, shares: u64) -> Result<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(anyhow!("update rejected"));
        }
        let mut containers = self.containers.lock().unwrap();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| anyhow!("no such container {}", id))?;
        c.info.cpu_shares = shares;
        self.updates.lock().unwrap().push((id.to_string(), shares));
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| anyhow!("no such container {}", id))?;
        self.killed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn cpu_counters(&self, id: &str) -> Result<CpuCounters> {
        let containers = self.containers.lock().unwrap();
        match containers.get(id) {
            Some(c) if !c.fail_stats => Ok(c.counters),
            Some(_) => Err(anyhow!("stats failed for {}", id)),
            None => Err(anyhow!("no such container {}", id)),
        }
    }
}

/// Orchestrator answering label selectors from a fixed table
#[derive(Default)]
pub struct FakeOrchestrator {
    pods: Mutex<HashMap<String, Vec<PodInfo>>>,
    pub cpu_cores: Mutex<u32>,
    pub unreachable: Mutex<bool>,
    pub deleted: Mutex<Vec<(String, String)>>,
    pub labels: Mutex<Vec<(String, String, String)>>,
}

impl FakeOrchestrator {
    pub fn new(cpu_cores: u32) -> Self {
        Self {
            cpu_cores: Mutex::new(cpu_cores),
            ..Self::default()
        }
    }

    pub fn add_pod(&self, selector: &str, pod: PodInfo) {
        self.pods
            .lock()
            .unwrap()
            .entry(selector.to_string())
            .or_default()
            .push(pod);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    /// Values written for a node label, in order
    pub fn label_values(&self, key: &str) -> Vec<String> {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| k == key)
            .map(|(_, _, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>> {
        if *self.unreachable.lock().unwrap() {
            return Err(anyhow!("api server unreachable"));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(label_selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn node_cpu_capacity(&self, _node_name: &str) -> Result<u32> {
        if *self.unreachable.lock().unwrap() {
            return Err(anyhow!("api server unreachable"));
        }
        Ok(*self.cpu_cores.lock().unwrap())
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(anyhow!("api server unreachable"));
        }
        self.deleted
            .lock()
            .unwrap()
            .push((name.to_string(), namespace.to_string()));
        Ok(())
    }

    async fn set_node_label(&self, node_name: &str, key: &str, value: &str) -> Result<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(anyhow!("api server unreachable"));
        }
        self.labels.lock().unwrap().push((
            node_name.to_string(),
            key.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}

/// Pod scheduled on `node` with one container per runtime id
pub fn pod(name: &str, namespace: &str, node: &str, container_ids: &[&str]) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: Some(node.to_string()),
        containers: container_ids
            .iter()
            .enumerate()
            .map(|(i, id)| PodContainer {
                name: format!("{}-c{}", name, i),
                container_id: Some(format!("docker://{}", id)),
            })
            .collect(),
    }
}
