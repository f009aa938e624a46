use agentgrid_events::{FeedReceiver, FeedRecvError};
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::protocol::CollabProtocol;

/// Drain the feed into the protocol until cancelled or the feed closes.
pub(crate) async fn run_collab_feed_loop(
    protocol: Arc<CollabProtocol>,
    mut rx: FeedReceiver,
    cancel_token: CancellationToken,
) {
    debug!("Collab feed loop started");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Collab feed loop stopped");
                return;
            }
            next = rx.recv() => match next {
                Ok(event) => protocol.handle_feed_event(&event).await,
                Err(FeedRecvError::Lagged(n)) => {
                    warn!("Collab protocol lagged behind the feed: skipped={}", n);
                }
                Err(_) => {
                    debug!("Feed closed, stopping collab loop");
                    return;
                }
            }
        }
    }
}
