use serde::{Deserialize, Serialize};

/// Topics carried by the shared event feed.
///
/// Upstream producers (task router, execution engines) publish the task
/// lifecycle topics; the core publishes reports, join traffic and session
/// syncs. Consumers subscribe to the whole feed and filter by topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedTopic {
    TaskPosted,
    TaskClaimed,
    TaskProgress,
    TaskClosed,
    TaskFailed,
    ApprovalRequired,
    AgentStatusReport,
    ZoneJoinRequest,
    ZoneJoinResolved,
    ZoneCollabSync,
}

/// One event on the shared feed.
///
/// Payloads are plain JSON so producers outside this workspace can publish
/// without linking against the core's domain types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub topic: FeedTopic,
    pub payload: serde_json::Value,
    pub emitted_at_ms: i64,
}

impl FeedEvent {
    pub fn new(topic: FeedTopic, payload: serde_json::Value) -> Self {
        Self {
            topic,
            payload,
            emitted_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
