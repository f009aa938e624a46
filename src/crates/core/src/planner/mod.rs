//! Per-agent work scheduling
//!
//! One prioritized pending queue, one interruption stack and a rolling
//! progress buffer per registered agent, fed by the task lifecycle topics
//! on the shared event feed. Periodically projects each agent's state into
//! a status report for passive consumers.

pub mod feed;
pub mod manager;
pub mod priority;
pub mod types;

pub use manager::{PlannerConfig, WorkPlanner};
pub use priority::compute_priority;
pub use types::*;
