//! Core data models for the shares controller

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Runtime label value that marks a container as best-effort
pub const BEST_EFFORT_LABEL_VALUE: &str = "BE";

/// Workload class used by the control policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadClass {
    /// Latency-sensitive, never throttled by the controller
    HighPriority,
    /// Throughput work, shrunk or killed to protect HP SLOs
    BestEffort,
}

impl WorkloadClass {
    /// Classify from a runtime label value
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some(BEST_EFFORT_LABEL_VALUE) => WorkloadClass::BestEffort,
            _ => WorkloadClass::HighPriority,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadClass::HighPriority => "HP",
            WorkloadClass::BestEffort => "BE",
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pod identity of a workload in orchestrated mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

/// A running container tracked for one control cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub class: WorkloadClass,
    pub shares: u64,
    pub cpu_percent: f64,
    pub pod: Option<PodRef>,
}

impl Workload {
    pub fn is_best_effort(&self) -> bool {
        self.class == WorkloadClass::BestEffort
    }
}

/// Container attributes as reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub cpu_shares: u64,
    pub labels: HashMap<String, String>,
}

/// Cumulative CPU counters from a runtime stats snapshot, with the previous sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuCounters {
    pub total_usage: f64,
    pub system_cpu_usage: f64,
    pub prev_total_usage: f64,
    pub prev_system_cpu_usage: f64,
}

impl CpuCounters {
    /// System-wide CPU percent for this container.
    ///
    /// Zero unless both the container delta and the system delta are positive.
    pub fn percent(&self) -> f64 {
        let cpu_delta = self.total_usage - self.prev_total_usage;
        let system_delta = self.system_cpu_usage - self.prev_system_cpu_usage;
        if cpu_delta > 0.0 && system_delta > 0.0 {
            cpu_delta / system_delta * 100.0
        } else {
            0.0
        }
    }
}

/// A pod as seen by the orchestrator, reduced to what classification needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub containers: Vec<PodContainer>,
}

/// Container status entry of a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodContainer {
    pub name: String,
    /// Runtime id with scheme, e.g. `docker://<id>`
    pub container_id: Option<String>,
}

impl PodContainer {
    /// Runtime id with any `<scheme>://` prefix removed
    pub fn runtime_id(&self) -> Option<&str> {
        self.container_id
            .as_deref()
            .map(|id| id.split_once("://").map_or(id, |(_, rest)| rest))
            .filter(|id| !id.is_empty())
    }
}

/// Operating mode of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Standalone host, Docker only
    Docker,
    /// Kubernetes node
    K8s,
}

impl Mode {
    pub fn is_orchestrated(&self) -> bool {
        matches!(self, Mode::K8s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Docker => "docker",
            Mode::K8s => "k8s",
        }
    }
}

/// Host-level context shared by every stage of a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterContext {
    pub mode: Mode,
    pub node_name: String,
    pub cpu_cores: u32,
    /// HP application whose SLO drives the controller
    pub qos_app: String,
}

impl ClusterContext {
    pub fn standalone() -> Self {
        Self {
            mode: Mode::Docker,
            node_name: String::new(),
            cpu_cores: 0,
            qos_app: String::new(),
        }
    }

    pub fn orchestrated(node_name: impl Into<String>, cpu_cores: u32) -> Self {
        Self {
            mode: Mode::K8s,
            node_name: node_name.into(),
            cpu_cores,
            qos_app: String::new(),
        }
    }
}

/// Per-class summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    pub hp_containers: u32,
    pub be_containers: u32,
    pub hp_shares: u64,
    pub be_shares: u64,
    pub hp_cpu_percent: f64,
    pub be_cpu_percent: f64,
}

impl CycleStats {
    pub fn add(&mut self, class: WorkloadClass, shares: u64) {
        match class {
            WorkloadClass::HighPriority => {
                self.hp_containers += 1;
                self.hp_shares += shares;
            }
            WorkloadClass::BestEffort => {
                self.be_containers += 1;
                self.be_shares += shares;
            }
        }
    }

    /// Move one workload from the HP totals to the BE totals
    pub fn promote_to_best_effort(&mut self, shares: u64) {
        self.hp_containers = self.hp_containers.saturating_sub(1);
        self.hp_shares = self.hp_shares.saturating_sub(shares);
        self.be_containers += 1;
        self.be_shares += shares;
    }

    /// Fill per-class CPU totals from sampled workloads
    pub fn record_cpu(&mut self, workloads: &[Workload]) {
        self.hp_cpu_percent = 0.0;
        self.be_cpu_percent = 0.0;
        for w in workloads {
            match w.class {
                WorkloadClass::HighPriority => self.hp_cpu_percent += w.cpu_percent,
                WorkloadClass::BestEffort => self.be_cpu_percent += w.cpu_percent,
            }
        }
    }
}

/// The single action chosen by the policy in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Disable,
    Shrink,
    Grow,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Disable => "disable",
            Action::Shrink => "shrink",
            Action::Grow => "grow",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed control cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: i64,
    pub qos_app: String,
    pub slack: f64,
    pub cpu_percent: f64,
    pub action: Action,
    pub stats: CycleStats,
}
