mod adjuster;
mod admission;

pub use adjuster::{decide, grow_shares, shrink_shares, Adjustment, ShareAdjuster};
pub use admission::AdmissionGate;
