//! Docker Engine API runtime
//!
//! Talks to the local Docker daemon (unix socket or `DOCKER_HOST`).

use super::ContainerRuntime;
use crate::models::{ContainerInfo, CpuCounters};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, StatsOptions,
    UpdateContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

/// Runtime backed by the Docker Engine API
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (socket path or `DOCKER_HOST`)
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to create Docker client")?;
        Ok(Self { docker })
    }

    /// Verify the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<String>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(summaries.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .with_context(|| format!("Failed to inspect container {}", id))?;

        let name = response
            .name
            .as_deref()
            .unwrap_or(id)
            .trim_start_matches('/')
            .to_string();

        // Docker reports 0 when the weight was never set explicitly
        let cpu_shares = response
            .host_config
            .and_then(|h| h.cpu_shares)
            .map(|s| u64::try_from(s).unwrap_or(0))
            .unwrap_or(0);

        let labels = response
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        Ok(ContainerInfo {
            id: id.to_string(),
            name,
            cpu_shares,
            labels,
        })
    }

    async fn update_shares(&self, id: &str, shares: u64) -> Result<()> {
        let cpu_shares = isize::try_from(shares)
            .with_context(|| format!("Share weight {} out of range", shares))?;

        let options = UpdateContainerOptions::<String> {
            cpu_shares: Some(cpu_shares),
            ..Default::default()
        };

        self.docker
            .update_container(id, options)
            .await
            .with_context(|| format!("Failed to update shares for container {}", id))?;

        debug!(container_id = %id, shares = shares, "Updated CPU shares");
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to kill container {}", id))?;
        Ok(())
    }

    async fn cpu_counters(&self, id: &str) -> Result<CpuCounters> {
        // A non-streaming, non-one-shot request makes the daemon take two
        // samples, so precpu_stats is populated.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = Box::pin(self.docker.stats(id, Some(options)));
        let stats = stream
            .next()
            .await
            .with_context(|| format!("No stats returned for container {}", id))?
            .with_context(|| format!("Failed to read stats for container {}", id))?;

        Ok(CpuCounters {
            total_usage: stats.cpu_stats.cpu_usage.total_usage as f64,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64,
            prev_total_usage: stats.precpu_stats.cpu_usage.total_usage as f64,
            prev_system_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64,
        })
    }
}
