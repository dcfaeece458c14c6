//! The fixed-period control loop
//!
//! Each cycle discovers workloads, samples CPU, reads SLO slack, applies
//! one policy action and reports. Nothing is carried between cycles except
//! the cycle counter and the resolved QoS application name.

mod r#loop;
mod startup;


pub use r#loop::{ControlLoop, ControlLoopBuilder};
pub use startup::resolve_context;
