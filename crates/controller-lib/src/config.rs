//! Controller configuration
//!
//! Loaded from a JSON file with `SHARES_`-prefixed environment overrides.
//! The threshold and rate keys keep the names used by existing deployments
//! (`BE_growth_rate`, `slack_threshold_grow`, ...).

use crate::error::{ControllerError, Result};
use crate::models::Mode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest CPU-share weight the kernel accepts
pub const KERNEL_MIN_SHARES: u64 = 2;

/// How the admission label is written to the node object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionBackend {
    /// Merge-patch through the Kubernetes API
    Api,
    /// `kubectl label` subprocess
    Kubectl,
}

/// Where the SLO slack value is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlackSourceKind {
    QosStore,
    File,
}

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub mode: Mode,

    /// Control period in seconds
    pub period: f64,

    pub min_shares: u64,

    #[serde(alias = "BE_growth_rate")]
    pub be_growth_rate: f64,

    #[serde(alias = "BE_shrink_rate")]
    pub be_shrink_rate: f64,

    pub slack_threshold_grow: f64,
    pub slack_threshold_shrink: f64,
    pub load_threshold_grow: f64,
    pub load_threshold_shrink: f64,

    /// Label key carrying the workload class, on containers and pods
    #[serde(default = "default_class_label")]
    pub class_label: String,

    /// Pod label key marking the QoS-tracked application
    #[serde(default = "default_qos_label")]
    pub qos_label: String,

    /// Node label key toggled by the admission gate
    #[serde(default = "default_admission_label")]
    pub admission_label: String,

    #[serde(default = "default_admission_backend")]
    pub admission_backend: AdmissionBackend,

    #[serde(default = "default_slack_source")]
    pub slack_source: SlackSourceKind,

    #[serde(default = "default_slack_file")]
    pub slack_file: PathBuf,

    #[serde(default = "default_qos_store_url")]
    pub qos_store_url: String,

    /// Kubelet read-only port serving `/stats/summary`
    #[serde(default = "default_telemetry_port")]
    pub telemetry_port: u16,

    /// Environment variable holding the node name (downward API)
    #[serde(default = "default_node_name_env")]
    pub node_name_env: String,

    /// Port for /healthz, /readyz and /metrics; no server when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_class_label() -> String {
    "hyperpilot.io/wclass".to_string()
}

fn default_qos_label() -> String {
    "hyperpilot.io/qos".to_string()
}

fn default_admission_label() -> String {
    "hyperpilot.io/be-enabled".to_string()
}

fn default_admission_backend() -> AdmissionBackend {
    AdmissionBackend::Api
}

fn default_slack_source() -> SlackSourceKind {
    SlackSourceKind::QosStore
}

fn default_slack_file() -> PathBuf {
    PathBuf::from("slo_slack.txt")
}

fn default_qos_store_url() -> String {
    "http://qos-data-store:7781/v1/apps/metrics".to_string()
}

fn default_telemetry_port() -> u16 {
    10255
}

fn default_node_name_env() -> String {
    "MY_NODE_NAME".to_string()
}

impl ControllerConfig {
    /// Load configuration from a JSON file and the environment
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(config::Environment::with_prefix("SHARES").try_parsing(true))
            .build()?;

        let config: ControllerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON document, without environment overrides
    pub fn from_json(json: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()?;

        let config: ControllerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the control policy cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.period.is_finite() || self.period <= 0.0 {
            return Err(invalid(format!("period must be positive, got {}", self.period)));
        }
        if Duration::try_from_secs_f64(self.period).is_err() {
            return Err(invalid(format!("period {} is out of range", self.period)));
        }
        if self.min_shares < KERNEL_MIN_SHARES {
            return Err(invalid(format!(
                "min_shares must be at least {}, got {}",
                KERNEL_MIN_SHARES, self.min_shares
            )));
        }
        if !(self.be_shrink_rate > 0.0 && self.be_shrink_rate < 1.0) {
            return Err(invalid(format!(
                "BE_shrink_rate must be in (0, 1), got {}",
                self.be_shrink_rate
            )));
        }
        if !(self.be_growth_rate.is_finite() && self.be_growth_rate > 1.0) {
            return Err(invalid(format!(
                "BE_growth_rate must be greater than 1, got {}",
                self.be_growth_rate
            )));
        }
        for (key, value) in [
            ("class_label", &self.class_label),
            ("qos_label", &self.qos_label),
            ("admission_label", &self.admission_label),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{} must not be empty", key)));
            }
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period)
    }

    /// Label selector matching best-effort pods
    pub fn best_effort_selector(&self) -> String {
        format!("{}=BE", self.class_label)
    }

    /// Label selector matching the QoS-tracked application
    pub fn qos_selector(&self) -> String {
        format!("{}=true", self.qos_label)
    }
}

fn invalid(message: String) -> ControllerError {
    ControllerError::InvalidConfig(message)
}
