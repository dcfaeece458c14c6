//! SLO slack oracle
//!
//! Slack is a signed headroom value for the QoS application: negative means
//! the SLO is being violated. Any failure to obtain it yields 0.0, which the
//! policy treats as "at target".

use crate::config::{ControllerConfig, SlackSourceKind};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack value used whenever the real one cannot be read
pub const DEFAULT_SLACK: f64 = 0.0;

/// A slack reading and whether it had to be defaulted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlackReading {
    pub slack: f64,
    pub defaulted: bool,
}

impl SlackReading {
    fn measured(slack: f64) -> Self {
        Self {
            slack,
            defaulted: false,
        }
    }

    fn default_value() -> Self {
        Self {
            slack: DEFAULT_SLACK,
            defaulted: true,
        }
    }
}

enum Source {
    QosStore { http: reqwest::Client, url: String },
    File { path: PathBuf },
}

/// Reads SLO slack from the QoS data store or a local file
pub struct SloSlackOracle {
    source: Source,
}

impl SloSlackOracle {
    /// Oracle backed by the QoS data store metrics endpoint
    pub fn qos_store(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).with_context(|| format!("Invalid QoS data store URL {}", url))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            source: Source::QosStore { http, url },
        })
    }

    /// Oracle reading the first value of a whitespace-delimited file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File { path: path.into() },
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        match config.slack_source {
            SlackSourceKind::QosStore => Self::qos_store(config.qos_store_url.clone()),
            SlackSourceKind::File => Ok(Self::file(config.slack_file.clone())),
        }
    }

    /// Current slack of `app`; never fails
    pub async fn read(&self, app: &str) -> SlackReading {
        match &self.source {
            Source::QosStore { http, url } => read_qos_store(http, url, app).await,
            Source::File { path } => match read_slack_file(path).await {
                Ok(slack) => SlackReading::measured(slack),
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Problem reading SLO slack file");
                    SlackReading::default_value()
                }
            },
        }
    }
}

async fn read_qos_store(http: &reqwest::Client, url: &str, app: &str) -> SlackReading {
    debug!(app = %app, "Getting SLO slack");

    let body = match fetch_json(http, url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url = %url, error = %format!("{:#}", e), "Problem accessing QoS data store");
            return SlackReading::default_value();
        }
    };

    match extract_slack(&body, app) {
        Some(slack) => SlackReading::measured(slack),
        None => SlackReading::default_value(),
    }
}

async fn fetch_json(http: &reqwest::Client, url: &str) -> Result<Value> {
    let response = http
        .get(url)
        .send()
        .await
        .context("Failed to send request")?;

    // The store reports failures through the error flag, so the body is
    // parsed regardless of status.
    let text = response.text().await.context("Failed to read response")?;
    serde_json::from_str(&text).context("Response is not JSON")
}

/// Pull `data.<app>.metrics.slack` out of a store response.
///
/// `None` when the store flags an error or the app or metric is missing.
pub fn extract_slack(body: &Value, app: &str) -> Option<f64> {
    if body.get("error").and_then(Value::as_bool).unwrap_or(false) {
        warn!("QoS data store reported an error");
        return None;
    }

    let Some(entry) = body.get("data").and_then(|d| d.get(app)) else {
        warn!(app = %app, "QoS data store does not track workload");
        return None;
    };

    let slack = entry.get("metrics").and_then(|m| m.get("slack"));
    let value = match slack {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    if value.is_none() {
        debug!(app = %app, "No slack metric for workload");
    }
    value.filter(|v| v.is_finite())
}

/// First column of the first row of a whitespace-delimited numeric file
pub async fn read_slack_file(path: &std::path::Path) -> Result<f64> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_slack_file(&content)
}

fn parse_slack_file(content: &str) -> Result<f64> {
    let first = content
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .context("Slack file is empty")?;

    let slack: f64 = first
        .parse()
        .with_context(|| format!("Slack value {:?} is not a number", first))?;

    if !slack.is_finite() {
        anyhow::bail!("Slack value {} is not finite", slack);
    }
    Ok(slack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    async fn store_with_body(body: &str) -> (mockito::ServerGuard, SloSlackOracle) {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/apps/metrics")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let oracle =
            SloSlackOracle::qos_store(format!("{}/v1/apps/metrics", server.url())).unwrap();
        (server, oracle)
    }

    #[test]
    fn test_extract_slack() {
        let body = json!({
            "error": false,
            "data": {
                "frontend": { "metrics": { "slack": 0.25 } },
                "batch": { "metrics": {} },
                "legacy": { "metrics": { "slack": "-0.5" } }
            }
        });

        assert_eq!(extract_slack(&body, "frontend"), Some(0.25));
        assert_eq!(extract_slack(&body, "legacy"), Some(-0.5));
        assert_eq!(extract_slack(&body, "batch"), None);
        assert_eq!(extract_slack(&body, "missing"), None);
    }

    #[test]
    fn test_extract_slack_error_flag() {
        let body = json!({
            "error": true,
            "data": { "frontend": { "metrics": { "slack": 0.25 } } }
        });
        assert_eq!(extract_slack(&body, "frontend"), None);
    }

    #[tokio::test]
    async fn test_reads_slack_from_store() {
        let (_server, oracle) = store_with_body(
            r#"{"error": false, "data": {"frontend": {"metrics": {"slack": -0.5}}}}"#,
        )
        .await;

        let reading = oracle.read("frontend").await;
        assert_eq!(reading.slack, -0.5);
        assert!(!reading.defaulted);
    }

    #[tokio::test]
    async fn test_missing_app_defaults_to_zero() {
        let (_server, oracle) = store_with_body(
            r#"{"error": false, "data": {"frontend": {"metrics": {"slack": 0.3}}}}"#,
        )
        .await;

        let reading = oracle.read("").await;
        assert_eq!(reading.slack, DEFAULT_SLACK);
        assert!(reading.defaulted);
    }

    #[tokio::test]
    async fn test_error_flag_defaults_to_zero() {
        let (_server, oracle) = store_with_body(r#"{"error": true, "data": {}}"#).await;

        let reading = oracle.read("frontend").await;
        assert_eq!(reading.slack, DEFAULT_SLACK);
        assert!(reading.defaulted);
    }

    #[tokio::test]
    async fn test_non_json_defaults_to_zero() {
        let (_server, oracle) = store_with_body("<html>bad gateway</html>").await;

        let reading = oracle.read("frontend").await;
        assert_eq!(reading.slack, DEFAULT_SLACK);
        assert!(reading.defaulted);
    }

    #[tokio::test]
    async fn test_unreachable_store_defaults_to_zero() {
        let oracle = SloSlackOracle::qos_store("http://127.0.0.1:1/v1/apps/metrics").unwrap();

        let reading = oracle.read("frontend").await;
        assert_eq!(reading.slack, DEFAULT_SLACK);
        assert!(reading.defaulted);
    }

    #[test]
    fn test_rejects_invalid_store_url() {
        assert!(SloSlackOracle::qos_store("not a url").is_err());
    }

    #[test]
    fn test_parse_slack_file() {
        assert_eq!(parse_slack_file("0.15 0.3\n-1 2\n").unwrap(), 0.15);
        assert_eq!(parse_slack_file("  -0.2\n").unwrap(), -0.2);
        assert!(parse_slack_file("").is_err());
        assert!(parse_slack_file("slack\n").is_err());
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-0.05 1.0").unwrap();
        writeln!(file, "0.5 1.0").unwrap();

        let oracle = SloSlackOracle::file(file.path());
        let reading = oracle.read("ignored").await;
        assert_eq!(reading.slack, -0.05);
        assert!(!reading.defaulted);
    }

    #[tokio::test]
    async fn test_missing_file_defaults_to_zero() {
        let oracle = SloSlackOracle::file("/nonexistent/slo_slack.txt");
        let reading = oracle.read("frontend").await;
        assert_eq!(reading.slack, DEFAULT_SLACK);
        assert!(reading.defaulted);
    }
}
