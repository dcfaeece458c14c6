//! Controller library for CPU share management on a shared node
//!
//! This crate provides the core functionality for:
//! - Discovering and classifying containers as high-priority or best-effort
//! - Sampling node and container CPU utilization
//! - Reading SLO slack for the latency-critical application
//! - Growing, shrinking or evicting best-effort CPU shares
//! - Health checks and observability

pub mod config;
pub mod control;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod sampler;
pub mod slack;

#[cfg(test)]
mod testing;

pub use config::ControllerConfig;
pub use control::{ControlLoop, ControlLoopBuilder};
pub use error::{ControllerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
