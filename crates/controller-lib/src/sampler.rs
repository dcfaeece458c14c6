//! CPU utilization sampling
//!
//! Standalone mode sums per-container percentages computed from the
//! runtime's cumulative counters. Orchestrated mode reads node-wide usage
//! from the kubelet summary API. Either way the aggregate is clamped to
//! [0, 100]; a failed node read reports 100 so the policy leans towards
//! shrinking best-effort work instead of assuming an idle node.

use crate::models::{ClusterContext, Workload};
use crate::runtime::ContainerRuntime;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Utilization reported when node telemetry is unavailable
pub const PINNED_UTILIZATION: f64 = 100.0;

const NANOS_PER_CORE: f64 = 1e9;

/// Aggregate CPU utilization of one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilization {
    /// Aggregate CPU percent in [0, 100]
    pub percent: f64,
    /// Measurements that failed and were defaulted
    pub errors: usize,
}

#[derive(Debug, Deserialize)]
struct StatsSummary {
    node: NodeStats,
}

#[derive(Debug, Deserialize)]
struct NodeStats {
    cpu: NodeCpu,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeCpu {
    usage_nano_cores: f64,
}

/// Computes per-workload and aggregate CPU utilization
pub struct UtilizationSampler {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    telemetry_port: u16,
    telemetry_endpoint: Option<String>,
}

impl UtilizationSampler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, telemetry_port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            runtime,
            http,
            telemetry_port,
            telemetry_endpoint: None,
        })
    }

    /// Read node telemetry from a fixed URL instead of `http://<node>:<port>/stats/summary`
    pub fn with_telemetry_endpoint(mut self, url: impl Into<String>) -> Self {
        self.telemetry_endpoint = Some(url.into());
        self
    }

    fn telemetry_url(&self, node_name: &str) -> String {
        match &self.telemetry_endpoint {
            Some(url) => url.clone(),
            None => format!("http://{}:{}/stats/summary", node_name, self.telemetry_port),
        }
    }

    /// Sample utilization, storing each workload's own percent on the record
    pub async fn sample(&self, workloads: &mut [Workload], context: &ClusterContext) -> Utilization {
        let mut utilization = if context.mode.is_orchestrated() {
            self.sample_node(context).await
        } else {
            self.sample_local(workloads).await
        };

        utilization.percent = clamp_percent(utilization.percent);
        utilization
    }

    async fn sample_local(&self, workloads: &mut [Workload]) -> Utilization {
        let mut total = 0.0;
        let mut errors = 0;

        for workload in workloads.iter_mut() {
            workload.cpu_percent = 0.0;
            match self.runtime.cpu_counters(&workload.id).await {
                Ok(counters) => {
                    workload.cpu_percent = counters.percent();
                    total += workload.cpu_percent;
                }
                Err(e) => {
                    errors += 1;
                    warn!(container = %workload.name, error = %format!("{:#}", e), "Problem reading container CPU stats");
                }
            }
        }

        debug!(cpu_percent = total, containers = workloads.len(), "Sampled container CPU");
        Utilization {
            percent: total,
            errors,
        }
    }

    async fn sample_node(&self, context: &ClusterContext) -> Utilization {
        match self.read_node_usage(context).await {
            Ok(percent) => Utilization { percent, errors: 0 },
            Err(e) => {
                warn!(node = %context.node_name, error = %format!("{:#}", e), "Problem reading node CPU stats, assuming saturated");
                Utilization {
                    percent: PINNED_UTILIZATION,
                    errors: 1,
                }
            }
        }
    }

    /// Node CPU use as a percent of capacity: usageNanoCores over
    /// (cores * 1e9), scaled by 100 to match the per-container figures
    async fn read_node_usage(&self, context: &ClusterContext) -> Result<f64> {
        if context.cpu_cores == 0 {
            anyhow::bail!("node core count unknown");
        }

        let summary: StatsSummary = self
            .http
            .get(self.telemetry_url(&context.node_name))
            .send()
            .await
            .context("Failed to reach kubelet stats endpoint")?
            .error_for_status()
            .context("Kubelet stats endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse kubelet stats summary")?;

        let percent = summary.node.cpu.usage_nano_cores
            / (f64::from(context.cpu_cores) * NANOS_PER_CORE)
            * 100.0;

        if !percent.is_finite() {
            anyhow::bail!("non-finite node usage {}", percent);
        }
        Ok(percent)
    }
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        return PINNED_UTILIZATION;
    }
    percent.clamp(0.0, 100.0)
}
