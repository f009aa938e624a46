//! Zone collaboration
//!
//! Agents join spatial zones to work together: a join/approval protocol
//! with a timeout fallback, lead election driven by live registry metrics,
//! and a shared negotiated work plan synced from the task feed. One live
//! session per zone, bounded globally.

pub mod feed;
pub mod protocol;
pub mod types;

pub use protocol::{CollabConfig, CollabProtocol};
pub use types::*;
