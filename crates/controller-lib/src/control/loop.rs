//! Control loop driving discovery, sampling and share adjustment

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::{ClusterContext, CycleReport};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::orchestrator::Orchestrator;
use crate::policy::{decide, AdmissionGate, ShareAdjuster};
use crate::registry::WorkloadRegistry;
use crate::runtime::ContainerRuntime;
use crate::sampler::UtilizationSampler;
use crate::slack::SloSlackOracle;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info};

pub struct ControlLoop {
    config: ControllerConfig,
    context: ClusterContext,
    registry: WorkloadRegistry,
    sampler: UtilizationSampler,
    oracle: SloSlackOracle,
    adjuster: ShareAdjuster,
    health: HealthRegistry,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    cycle: u64,
}

impl ControlLoop {
    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Open best-effort admission, done once before the first cycle
    pub async fn enable_admission(&self) -> bool {
        self.adjuster.gate().enable().await
    }

    /// Run one cycle. Only losing the container runtime entirely is an error.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let start = Instant::now();

        let mut discovery = match self.registry.discover(&mut self.context, &self.config).await {
            Ok(discovery) => discovery,
            Err(e) => {
                self.health
                    .set_unhealthy(components::RUNTIME, e.to_string())
                    .await;
                return Err(e);
            }
        };

        let utilization = self
            .sampler
            .sample(&mut discovery.workloads, &self.context)
            .await;
        discovery.stats.record_cpu(&discovery.workloads);

        let reading = self.oracle.read(&self.context.qos_app).await;

        let action = decide(reading.slack, utilization.percent, &self.config);
        let adjustment = self
            .adjuster
            .apply(action, &mut discovery.workloads, &self.context, &self.config)
            .await;

        self.cycle += 1;
        let report = CycleReport {
            cycle: self.cycle,
            timestamp: chrono::Utc::now().timestamp(),
            qos_app: self.context.qos_app.clone(),
            slack: reading.slack,
            cpu_percent: utilization.percent,
            action,
            stats: discovery.stats,
        };

        self.logger.log_action(
            action,
            reading.slack,
            utilization.percent,
            adjustment.updated + adjustment.evicted,
        );
        self.logger.log_cycle(&report);

        // Standalone sampling failures are runtime failures; orchestrated
        // ones come from node telemetry.
        let (runtime_failures, telemetry_failures) = if self.context.mode.is_orchestrated() {
            (discovery.skipped, utilization.errors)
        } else {
            (discovery.skipped + utilization.errors, 0)
        };
        let slack_failures = usize::from(reading.defaulted);
        let orchestrator_failures = usize::from(discovery.orchestrator_degraded);

        self.health
            .report(components::RUNTIME, runtime_failures, "container calls failed")
            .await;
        self.health
            .report(components::TELEMETRY, telemetry_failures, "node telemetry unavailable")
            .await;
        self.health
            .report(components::SLO_ORACLE, slack_failures, "slack defaulted")
            .await;
        if self.context.mode.is_orchestrated() {
            self.health
                .report(
                    components::ORCHESTRATOR,
                    orchestrator_failures,
                    "orchestrator queries failed",
                )
                .await;
        }

        self.metrics.record_cycle(&report);
        self.metrics.inc_errors(components::RUNTIME, runtime_failures as u64);
        self.metrics.inc_errors(components::TELEMETRY, telemetry_failures as u64);
        self.metrics.inc_errors(components::SLO_ORACLE, slack_failures as u64);
        self.metrics
            .inc_errors(components::ORCHESTRATOR, orchestrator_failures as u64);
        self.metrics.inc_errors("adjuster", adjustment.failures as u64);
        self.metrics
            .observe_cycle_duration(start.elapsed().as_secs_f64());

        Ok(report)
    }

    /// Run cycles until `shutdown` fires. A cycle in flight always completes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            period_secs = self.config.period,
            mode = self.context.mode.as_str(),
            node = %self.context.node_name,
            "Starting control loop"
        );

        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, cycle = self.cycle, "Control cycle failed");
                self.logger.log_shutdown("runtime unavailable", self.cycle);
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.period()) => {}
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("signal", self.cycle);
                    return Ok(());
                }
            }
        }
    }
}

/// Builder wiring the collaborators of a control loop
pub struct ControlLoopBuilder {
    config: ControllerConfig,
    context: ClusterContext,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    oracle: Option<SloSlackOracle>,
    telemetry_endpoint: Option<String>,
    health: Option<HealthRegistry>,
    verbose: bool,
}

impl ControlLoopBuilder {
    pub fn new(config: ControllerConfig, context: ClusterContext) -> Self {
        Self {
            config,
            context,
            runtime: None,
            orchestrator: None,
            oracle: None,
            telemetry_endpoint: None,
            health: None,
            verbose: false,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Override the slack source chosen by the configuration
    pub fn oracle(mut self, oracle: SloSlackOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn telemetry_endpoint(mut self, url: impl Into<String>) -> Self {
        self.telemetry_endpoint = Some(url.into());
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Log per-cycle statistics at info level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn build(self) -> anyhow::Result<ControlLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        if self.context.mode.is_orchestrated() && self.orchestrator.is_none() {
            anyhow::bail!("Orchestrator is required in {:?} mode", self.context.mode);
        }

        let mut sampler = UtilizationSampler::new(runtime.clone(), self.config.telemetry_port)?;
        if let Some(url) = self.telemetry_endpoint {
            sampler = sampler.with_telemetry_endpoint(url);
        }

        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => SloSlackOracle::from_config(&self.config)?,
        };

        let gate = AdmissionGate::new(&self.context, &self.config, self.orchestrator.clone());
        let adjuster = ShareAdjuster::new(runtime.clone(), self.orchestrator.clone(), gate);
        let registry = WorkloadRegistry::new(runtime, self.orchestrator);
        let logger = StructuredLogger::new(self.context.node_name.clone(), self.verbose);

        Ok(ControlLoop {
            config: self.config,
            context: self.context,
            registry,
            sampler,
            oracle,
            adjuster,
            health: self.health.unwrap_or_default(),
            metrics: ControllerMetrics::new(),
            logger,
            cycle: 0,
        })
    }
}
