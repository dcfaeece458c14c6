//! Share adjustment policy
//!
//! Each cycle picks exactly one action from the SLO slack and the aggregate
//! CPU utilization, in strict priority order:
//!
//! 1. Disable: slack < 0. Every best-effort workload is killed and admission
//!    is closed, whatever the load.
//! 2. Shrink: slack below the shrink threshold, or load above the shrink load.
//! 3. Grow: slack above the grow threshold and load below the grow load.
//!    Admission is reopened.
//! 4. Hold: nothing changes; admission is reopened.
//!
//! Best-effort workloads are adjusted independently of each other; there is
//! no shared pool being redistributed. High-priority workloads are never touched.
//! Disable evicts all best-effort work rather than just enough to recover.

use super::AdmissionGate;
use crate::config::ControllerConfig;
use crate::models::{Action, ClusterContext, PodRef, Workload};
use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerRuntime;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Choose the action for this cycle
pub fn decide(slack: f64, cpu_percent: f64, config: &ControllerConfig) -> Action {
    if slack < 0.0 {
        Action::Disable
    } else if slack < config.slack_threshold_shrink || cpu_percent > config.load_threshold_shrink {
        Action::Shrink
    } else if slack > config.slack_threshold_grow && cpu_percent < config.load_threshold_grow {
        Action::Grow
    } else {
        Action::Hold
    }
}

/// Grown weight: `floor(rate * shares)`, or double when that does not move
pub fn grow_shares(shares: u64, rate: f64) -> u64 {
    let grown = scale(shares, rate);
    if grown == shares {
        shares.saturating_mul(2)
    } else {
        grown
    }
}

/// Shrunk weight: `floor(rate * shares)`, or half when that does not move,
/// never below `min_shares`
pub fn shrink_shares(shares: u64, rate: f64, min_shares: u64) -> u64 {
    let shrunk = scale(shares, rate);
    let shrunk = if shrunk == shares { shares / 2 } else { shrunk };
    shrunk.max(min_shares)
}

fn scale(shares: u64, rate: f64) -> u64 {
    // f64 -> u64 casts saturate
    (rate * shares as f64).floor() as u64
}

/// What applying an action did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adjustment {
    /// Workloads whose weight was rewritten
    pub updated: usize,
    /// Workloads killed or evicted
    pub evicted: usize,
    /// Runtime or orchestrator calls that failed
    pub failures: usize,
}

/// Applies policy actions to best-effort workloads
pub struct ShareAdjuster {
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    gate: AdmissionGate,
}

impl ShareAdjuster {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Option<Arc<dyn Orchestrator>>,
        gate: AdmissionGate,
    ) -> Self {
        Self {
            runtime,
            orchestrator,
            gate,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Carry out `action`, updating the weight on each rewritten record
    pub async fn apply(
        &self,
        action: Action,
        workloads: &mut [Workload],
        context: &ClusterContext,
        config: &ControllerConfig,
    ) -> Adjustment {
        match action {
            Action::Disable => {
                let mut adjustment = self.disable(workloads, context).await;
                if !self.gate.disable().await {
                    adjustment.failures += 1;
                }
                adjustment
            }
            Action::Shrink => {
                self.resize(workloads, |shares| {
                    shrink_shares(shares, config.be_shrink_rate, config.min_shares)
                })
                .await
            }
            Action::Grow => {
                let mut adjustment = self
                    .resize(workloads, |shares| grow_shares(shares, config.be_growth_rate))
                    .await;
                if !self.gate.enable().await {
                    adjustment.failures += 1;
                }
                adjustment
            }
            Action::Hold => {
                let mut adjustment = Adjustment::default();
                if !self.gate.enable().await {
                    adjustment.failures += 1;
                }
                adjustment
            }
        }
    }

    async fn resize<F>(&self, workloads: &mut [Workload], next: F) -> Adjustment
    where
        F: Fn(u64) -> u64,
    {
        let mut adjustment = Adjustment::default();

        for workload in workloads.iter_mut().filter(|w| w.is_best_effort()) {
            let shares = next(workload.shares);
            match self.runtime.update_shares(&workload.id, shares).await {
                Ok(()) => {
                    debug!(container = %workload.name, from = workload.shares, to = shares, "Adjusted shares");
                    workload.shares = shares;
                    adjustment.updated += 1;
                }
                Err(e) => {
                    adjustment.failures += 1;
                    warn!(container = %workload.name, error = %format!("{:#}", e), "Cannot update shares for container");
                }
            }
        }

        adjustment
    }

    async fn disable(&self, workloads: &[Workload], context: &ClusterContext) -> Adjustment {
        let mut adjustment = Adjustment::default();
        // A pod can hold several local containers but is deleted once
        let mut evicted_pods: HashSet<&PodRef> = HashSet::new();

        for workload in workloads.iter().filter(|w| w.is_best_effort()) {
            match (&workload.pod, &self.orchestrator) {
                (Some(pod), Some(orchestrator)) if context.mode.is_orchestrated() => {
                    if !evicted_pods.insert(pod) {
                        continue;
                    }
                    match orchestrator.delete_pod(&pod.name, &pod.namespace).await {
                        Ok(()) => {
                            adjustment.evicted += 1;
                            debug!(pod = %pod.name, namespace = %pod.namespace, "Deleted best-effort pod");
                        }
                        Err(e) => {
                            adjustment.failures += 1;
                            warn!(pod = %pod.name, namespace = %pod.namespace, error = %format!("{:#}", e), "Cannot delete best-effort pod");
                        }
                    }
                }
                _ => match self.runtime.kill(&workload.id).await {
                    Ok(()) => {
                        adjustment.evicted += 1;
                        debug!(container = %workload.name, "Killed best-effort workload");
                    }
                    Err(e) => {
                        adjustment.failures += 1;
                        warn!(container = %workload.name, error = %format!("{:#}", e), "Cannot kill best-effort workload");
                    }
                },
            }
        }

        adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadClass;
    use crate::testing::{k8s_config, test_config, FakeOrchestrator, FakeRuntime};

    fn workload(id: &str, class: WorkloadClass, shares: u64) -> Workload {
        Workload {
            id: id.to_string(),
            name: format!("{}-name", id),
            class,
            shares,
            cpu_percent: 0.0,
            pod: None,
        }
    }

    fn adjuster(runtime: Arc<FakeRuntime>) -> ShareAdjuster {
        let gate = AdmissionGate::new(&ClusterContext::standalone(), &test_config(), None);
        ShareAdjuster::new(runtime, None, gate)
    }

    #[test]
    fn test_decide_priority() {
        let config = test_config();

        // Violation wins regardless of load
        assert_eq!(decide(-0.5, 0.0, &config), Action::Disable);
        assert_eq!(decide(-0.01, 99.0, &config), Action::Disable);

        // Shrink on low slack or high load
        assert_eq!(decide(0.02, 10.0, &config), Action::Shrink);
        assert_eq!(decide(0.5, 95.0, &config), Action::Shrink);
        assert_eq!(decide(0.0, 10.0, &config), Action::Shrink);

        // Grow needs both headroom and low load
        assert_eq!(decide(0.2, 30.0, &config), Action::Grow);
        assert_eq!(decide(0.2, 85.0, &config), Action::Hold);
        assert_eq!(decide(0.08, 30.0, &config), Action::Hold);
    }

    #[test]
    fn test_shrink_preferred_over_grow() {
        let mut config = test_config();
        // Overlapping thresholds: both conditions hold for slack 0.2, load 50
        config.slack_threshold_shrink = 0.3;
        config.slack_threshold_grow = 0.1;
        config.load_threshold_grow = 80.0;

        assert_eq!(decide(0.2, 50.0, &config), Action::Shrink);
    }

    #[test]
    fn test_shrink_shares() {
        assert_eq!(shrink_shares(100, 0.9, 2), 90);
        assert_eq!(shrink_shares(1024, 0.9, 2), 921);
        // Rounding stall halves, then clamps to the floor
        assert_eq!(shrink_shares(1, 0.9, 2), 2);
        assert_eq!(shrink_shares(2, 0.9, 2), 2);
        assert_eq!(shrink_shares(3, 0.9, 2), 2);
        assert_eq!(shrink_shares(20, 0.9, 50), 50);
    }

    #[test]
    fn test_shrink_strictly_decreases_above_floor() {
        for shares in 3..2000u64 {
            let shrunk = shrink_shares(shares, 0.95, 2);
            assert!(shrunk < shares, "{} did not shrink", shares);
            assert!(shrunk >= 2);
        }
    }

    #[test]
    fn test_grow_shares() {
        assert_eq!(grow_shares(50, 1.1), 55);
        assert_eq!(grow_shares(1000, 1.1), 1100);
        // Small weights stall under the multiplier and double instead
        assert_eq!(grow_shares(2, 1.1), 4);
        assert_eq!(grow_shares(9, 1.1), 18);
        assert_eq!(grow_shares(10, 1.1), 11);
    }

    #[test]
    fn test_grow_strictly_increases() {
        for shares in 1..2000u64 {
            let grown = grow_shares(shares, 1.05);
            assert!(grown > shares, "{} did not grow", shares);
            if (1.05 * shares as f64).floor() as u64 == shares {
                assert_eq!(grown, shares * 2);
            }
        }
    }

    #[tokio::test]
    async fn test_shrink_only_best_effort() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("hp", 1024, None);
        runtime.add("be", 100, Some("BE"));

        let mut workloads = vec![
            workload("hp", WorkloadClass::HighPriority, 1024),
            workload("be", WorkloadClass::BestEffort, 100),
        ];

        let adjustment = adjuster(runtime.clone())
            .apply(
                Action::Shrink,
                &mut workloads,
                &ClusterContext::standalone(),
                &test_config(),
            )
            .await;

        assert_eq!(adjustment.updated, 1);
        assert_eq!(workloads[0].shares, 1024);
        assert_eq!(workloads[1].shares, 90);
        assert_eq!(runtime.updates(), vec![("be".to_string(), 90)]);
    }

    #[tokio::test]
    async fn test_grow_each_best_effort_independently() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("a", 50, Some("BE"));
        runtime.add("b", 2, Some("BE"));

        let mut workloads = vec![
            workload("a", WorkloadClass::BestEffort, 50),
            workload("b", WorkloadClass::BestEffort, 2),
        ];

        adjuster(runtime.clone())
            .apply(
                Action::Grow,
                &mut workloads,
                &ClusterContext::standalone(),
                &test_config(),
            )
            .await;

        assert_eq!(runtime.shares("a"), Some(55));
        assert_eq!(runtime.shares("b"), Some(4));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_record() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("be", 100, Some("BE"));
        *runtime.fail_updates.lock().unwrap() = true;

        let mut workloads = vec![workload("be", WorkloadClass::BestEffort, 100)];
        let adjustment = adjuster(runtime)
            .apply(
                Action::Shrink,
                &mut workloads,
                &ClusterContext::standalone(),
                &test_config(),
            )
            .await;

        assert_eq!(adjustment.failures, 1);
        assert_eq!(workloads[0].shares, 100);
    }

    #[tokio::test]
    async fn test_hold_changes_nothing() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("be", 100, Some("BE"));

        let mut workloads = vec![workload("be", WorkloadClass::BestEffort, 100)];
        let adjustment = adjuster(runtime.clone())
            .apply(
                Action::Hold,
                &mut workloads,
                &ClusterContext::standalone(),
                &test_config(),
            )
            .await;

        assert_eq!(adjustment, Adjustment::default());
        assert!(runtime.updates().is_empty());
    }

    #[tokio::test]
    async fn test_disable_kills_best_effort_containers() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("hp", 1024, None);
        runtime.add("be1", 100, Some("BE"));
        runtime.add("be2", 100, Some("BE"));

        let mut workloads = vec![
            workload("hp", WorkloadClass::HighPriority, 1024),
            workload("be1", WorkloadClass::BestEffort, 100),
            workload("be2", WorkloadClass::BestEffort, 100),
        ];

        let adjustment = adjuster(runtime.clone())
            .apply(
                Action::Disable,
                &mut workloads,
                &ClusterContext::standalone(),
                &test_config(),
            )
            .await;

        assert_eq!(adjustment.evicted, 2);
        assert_eq!(runtime.killed(), vec!["be1".to_string(), "be2".to_string()]);
        assert_eq!(runtime.shares("hp"), Some(1024));
    }

    #[tokio::test]
    async fn test_disable_evicts_pods_and_closes_admission() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("be1", 100, None);
        runtime.add("be2", 100, Some("BE"));

        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        let context = ClusterContext::orchestrated("node-1", 4);
        let config = k8s_config();
        let gate = AdmissionGate::new(&context, &config, Some(orchestrator.clone()));
        let adjuster = ShareAdjuster::new(runtime.clone(), Some(orchestrator.clone()), gate);

        let mut be1 = workload("be1", WorkloadClass::BestEffort, 100);
        be1.pod = Some(PodRef {
            name: "batch".to_string(),
            namespace: "jobs".to_string(),
        });
        // Labelled BE on the runtime only, no pod identity
        let be2 = workload("be2", WorkloadClass::BestEffort, 100);
        let mut workloads = vec![be1, be2];

        let adjustment = adjuster
            .apply(Action::Disable, &mut workloads, &context, &config)
            .await;

        assert_eq!(adjustment.evicted, 2);
        assert_eq!(
            orchestrator.deleted(),
            vec![("batch".to_string(), "jobs".to_string())]
        );
        assert_eq!(runtime.killed(), vec!["be2".to_string()]);
        assert_eq!(
            orchestrator.label_values(&config.admission_label),
            vec!["false".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disable_deletes_shared_pod_once() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add("c1", 100, None);
        runtime.add("c2", 100, None);

        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        let context = ClusterContext::orchestrated("node-1", 4);
        let config = k8s_config();
        let gate = AdmissionGate::new(&context, &config, Some(orchestrator.clone()));
        let adjuster = ShareAdjuster::new(runtime.clone(), Some(orchestrator.clone()), gate);

        let batch = PodRef {
            name: "batch".to_string(),
            namespace: "jobs".to_string(),
        };
        let mut c1 = workload("c1", WorkloadClass::BestEffort, 100);
        c1.pod = Some(batch.clone());
        let mut c2 = workload("c2", WorkloadClass::BestEffort, 100);
        c2.pod = Some(batch);
        let mut workloads = vec![c1, c2];

        let adjustment = adjuster
            .apply(Action::Disable, &mut workloads, &context, &config)
            .await;

        assert_eq!(adjustment.evicted, 1);
        assert_eq!(adjustment.failures, 0);
        assert_eq!(
            orchestrator.deleted(),
            vec![("batch".to_string(), "jobs".to_string())]
        );
        assert!(runtime.killed().is_empty());
    }

    #[tokio::test]
    async fn test_grow_and_hold_reopen_admission() {
        let runtime = Arc::new(FakeRuntime::new());
        let orchestrator = Arc::new(FakeOrchestrator::new(4));
        let context = ClusterContext::orchestrated("node-1", 4);
        let config = k8s_config();
        let gate = AdmissionGate::new(&context, &config, Some(orchestrator.clone()));
        let adjuster = ShareAdjuster::new(runtime, Some(orchestrator.clone()), gate);

        adjuster.apply(Action::Grow, &mut [], &context, &config).await;
        adjuster.apply(Action::Hold, &mut [], &context, &config).await;
        adjuster.apply(Action::Shrink, &mut [], &context, &config).await;

        assert_eq!(
            orchestrator.label_values(&config.admission_label),
            vec!["true".to_string(), "true".to_string()]
        );
    }
}
