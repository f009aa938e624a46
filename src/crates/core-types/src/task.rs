use serde::{Deserialize, Serialize};

/// Who posted a task. Drives priority scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskUrgency {
    Critical,
    High,
    Medium,
    Low,
}

fn default_urgency() -> TaskUrgency {
    TaskUrgency::Medium
}

/// Wire payload for the task lifecycle topics (TASK_POSTED, TASK_CLAIMED,
/// TASK_PROGRESS, TASK_CLOSED, TASK_FAILED).
///
/// Producers fill the fields relevant to the topic; everything except the
/// event id is optional so partial events degrade to no-ops instead of
/// decode failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventPayload {
    pub event_id: String,
    /// Agent the event is addressed to. Events without it are ignored.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub source: Option<TaskSource>,
    #[serde(default = "default_urgency")]
    pub urgency: TaskUrgency,
    /// Pre-scored priority. When absent the planner scores the task itself.
    #[serde(default)]
    pub priority_score: Option<u8>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub progress_pct: Option<u8>,
    /// Free-text progress note (TASK_PROGRESS only).
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether other tasks depend on this one.
    #[serde(default)]
    pub has_dependents: bool,
    /// When the task was first posted, for waited-time scoring.
    #[serde(default)]
    pub posted_at_ms: Option<i64>,
    /// Markdown context restored from an interruption snapshot.
    #[serde(default)]
    pub resume_context: Option<String>,
    #[serde(default)]
    pub resumed_from_stack: bool,
    #[serde(default)]
    pub original_progress_pct: Option<u8>,
}

/// Wire payload for APPROVAL_REQUIRED.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequiredPayload {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub blocked_task_id: String,
    #[serde(default)]
    pub description: String,
}
