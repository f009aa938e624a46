// AgentGrid Core Library - scheduling and collaboration logic
// Layering: Util -> Planner / Collab

pub mod collab;
pub mod planner;
pub mod util;

// Export main types
pub use util::errors::*;

// Export planner components
pub use planner::{PlannerConfig, StatusReport, WorkPlanner};

// Export collaboration components
pub use collab::{CollabConfig, CollabProtocol};

// Re-export the feed layer so hosts only need this crate
pub use agentgrid_core_types::{FeedEvent, FeedTopic};
pub use agentgrid_events::EventBus;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "AgentGrid Core";
