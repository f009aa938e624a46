use agentgrid_events::{FeedReceiver, FeedRecvError};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::manager::WorkPlanner;

/// Drain the feed into the planner until cancelled or the feed closes.
/// Handler invocations are serialized here, which is what makes each
/// mutation atomic relative to the rest of the feed.
pub(crate) async fn run_feed_loop(
    planner: Arc<WorkPlanner>,
    mut rx: FeedReceiver,
    cancel_token: CancellationToken,
) {
    debug!("Work planner feed loop started");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Work planner feed loop stopped");
                return;
            }
            next = rx.recv() => match next {
                Ok(event) => planner.handle_feed_event(&event),
                Err(FeedRecvError::Lagged(n)) => {
                    warn!("Work planner lagged behind the feed: skipped={}", n);
                }
                Err(_) => {
                    debug!("Feed closed, stopping work planner loop");
                    return;
                }
            }
        }
    }
}

/// Publish status reports for every agent on a fixed cadence.
pub(crate) async fn run_report_ticker(
    planner: Arc<WorkPlanner>,
    cancel_token: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; reports start one interval in.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Report ticker stopped");
                return;
            }
            _ = ticker.tick() => planner.publish_all_reports(),
        }
    }
}
