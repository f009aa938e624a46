//! Event feed
//!
//! In-process implementation of the shared event feed over tokio broadcast
//! channels. The host process may own a different transport; this bus is the
//! default used by embedded deployments and tests.
//!
//! Events are delivered to subscribers in publish order. Slow subscribers
//! lag and skip ahead rather than blocking publishers.

pub mod bus;

pub use bus::{EventBus, FeedReceiver, FeedRecvError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
