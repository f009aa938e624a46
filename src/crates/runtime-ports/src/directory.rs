use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Busy,
    Away,
    Offline,
}

/// Rolling performance metrics maintained by the registry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetricsSnapshot {
    /// Task success rate over the trailing seven days, 0.0..=1.0.
    pub success_rate_7d: f64,
}

/// Live view of a registered agent as the registry knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub role_tags: Vec<String>,
    #[serde(default)]
    pub equipped_skills: Vec<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub metrics: AgentMetricsSnapshot,
}

/// Read-only lookup into the agent registry.
///
/// Agents can deregister at any time, so a `None` result is an ordinary
/// outcome and callers skip the operation rather than failing.
pub trait AgentDirectory: Send + Sync {
    fn lookup(&self, agent_id: &str) -> Option<AgentProfile>;
}
