use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("recipient unavailable: {0}")]
    Unavailable(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One-way channel between agents.
///
/// Delivery is fire-and-forget: the core logs and swallows errors, and no
/// delivery confirmation is required. Ordering across recipients is not
/// guaranteed by this port.
#[async_trait]
pub trait AgentMessenger: Send + Sync {
    async fn send(
        &self,
        from_id: &str,
        to_id: &str,
        payload: serde_json::Value,
        provenance: &str,
    ) -> Result<(), MessagingError>;
}
