//! Shared low-level types for the AgentGrid core
//!
//! Lowest layer of the workspace: feed topics, the event envelope and the
//! task lifecycle payloads exchanged over the feed.

pub mod feed;
pub mod task;

pub use feed::*;
pub use task::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
