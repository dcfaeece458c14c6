//! Container runtime access
//!
//! The controller needs a small slice of a container runtime: listing
//! running containers, reading their share weight and labels, writing the
//! share weight back, killing a container, and reading CPU counters.

mod docker;

pub use docker::DockerRuntime;

use crate::models::{ContainerInfo, CpuCounters};
use anyhow::Result;
use async_trait::async_trait;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of all running containers
    async fn list_containers(&self) -> Result<Vec<String>>;

    /// Name, CPU-share weight and labels of a container
    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    /// Write a new CPU-share weight
    async fn update_shares(&self, id: &str, shares: u64) -> Result<()>;

    /// Kill a running container
    async fn kill(&self, id: &str) -> Result<()>;

    /// Current and previous cumulative CPU counters
    async fn cpu_counters(&self, id: &str) -> Result<CpuCounters>;
}
