//! Observability infrastructure for the shares controller
//!
//! Provides:
//! - Prometheus metrics (cycle latency, utilization, slack, weights, actions)
//! - Structured JSON logging with tracing

use crate::models::{Action, CycleReport};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles: IntCounter,
    actions: IntCounterVec,
    cpu_utilization_percent: Gauge,
    slo_slack: Gauge,
    containers: IntGaugeVec,
    shares: IntGaugeVec,
    errors: IntCounterVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "shares_controller_cycle_duration_seconds",
                "Time spent in one control cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles: register_int_counter!(
                "shares_controller_cycles_total",
                "Total number of completed control cycles"
            )
            .expect("Failed to register cycles_total"),

            actions: register_int_counter_vec!(
                "shares_controller_actions_total",
                "Policy actions taken, by action",
                &["action"]
            )
            .expect("Failed to register actions_total"),

            cpu_utilization_percent: register_gauge!(
                "shares_controller_cpu_utilization_percent",
                "Aggregate CPU utilization observed in the last cycle"
            )
            .expect("Failed to register cpu_utilization_percent"),

            slo_slack: register_gauge!(
                "shares_controller_slo_slack",
                "SLO slack of the QoS application observed in the last cycle"
            )
            .expect("Failed to register slo_slack"),

            containers: register_int_gauge_vec!(
                "shares_controller_containers",
                "Tracked containers, by class",
                &["class"]
            )
            .expect("Failed to register containers"),

            shares: register_int_gauge_vec!(
                "shares_controller_shares",
                "Sum of CPU shares, by class",
                &["class"]
            )
            .expect("Failed to register shares"),

            errors: register_int_counter_vec!(
                "shares_controller_errors_total",
                "Failed collaborator calls, by source",
                &["source"]
            )
            .expect("Failed to register errors_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    /// Publish the gauges and counters carried by a cycle report
    pub fn record_cycle(&self, report: &CycleReport) {
        let inner = self.inner();
        inner.cycles.inc();
        inner
            .actions
            .with_label_values(&[report.action.as_str()])
            .inc();
        inner.cpu_utilization_percent.set(report.cpu_percent);
        inner.slo_slack.set(report.slack);

        let stats = &report.stats;
        inner
            .containers
            .with_label_values(&["HP"])
            .set(i64::from(stats.hp_containers));
        inner
            .containers
            .with_label_values(&["BE"])
            .set(i64::from(stats.be_containers));
        inner
            .shares
            .with_label_values(&["HP"])
            .set(saturating_i64(stats.hp_shares));
        inner
            .shares
            .with_label_values(&["BE"])
            .set(saturating_i64(stats.be_shares));
    }

    /// Count failed calls to a collaborator ("runtime", "orchestrator", "slo_oracle", "telemetry")
    pub fn inc_errors(&self, source: &str, count: u64) {
        if count > 0 {
            self.inner().errors.with_label_values(&[source]).inc_by(count);
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
    verbose: bool,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>, verbose: bool) -> Self {
        Self {
            node_name: node_name.into(),
            verbose,
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str, period_secs: f64) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            controller_version = %version,
            mode = %mode,
            period_secs = period_secs,
            "Shares controller started"
        );
    }

    /// Per-cycle statistics; info when verbose, debug otherwise
    pub fn log_cycle(&self, report: &CycleReport) {
        let stats = &report.stats;
        if self.verbose {
            info!(
                event = "cycle_complete",
                node = %self.node_name,
                cycle = report.cycle,
                timestamp = report.timestamp,
                qos_app = %report.qos_app,
                slack = report.slack,
                cpu_percent = report.cpu_percent,
                action = %report.action,
                hp_containers = stats.hp_containers,
                be_containers = stats.be_containers,
                hp_shares = stats.hp_shares,
                be_shares = stats.be_shares,
                hp_cpu_percent = stats.hp_cpu_percent,
                be_cpu_percent = stats.be_cpu_percent,
                "Control cycle complete"
            );
        } else {
            debug!(
                event = "cycle_complete",
                node = %self.node_name,
                cycle = report.cycle,
                slack = report.slack,
                cpu_percent = report.cpu_percent,
                action = %report.action,
                be_containers = stats.be_containers,
                be_shares = stats.be_shares,
                "Control cycle complete"
            );
        }
    }

    /// Phase transitions: disabling best-effort work is always visible
    pub fn log_action(&self, action: Action, slack: f64, cpu_percent: f64, affected: usize) {
        match action {
            Action::Disable => {
                warn!(
                    event = "phase_disable",
                    node = %self.node_name,
                    slack = slack,
                    cpu_percent = cpu_percent,
                    killed = affected,
                    "SLO violated, disabling best-effort workloads"
                );
            }
            Action::Shrink | Action::Grow if affected > 0 && self.verbose => {
                info!(
                    event = "share_update",
                    node = %self.node_name,
                    action = %action,
                    slack = slack,
                    cpu_percent = cpu_percent,
                    updated = affected,
                    "Adjusted best-effort shares"
                );
            }
            _ => {}
        }
    }

    pub fn log_shutdown(&self, reason: &str, cycles: u64) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            cycles = cycles,
            "Shares controller shutting down"
        );
    }
}
