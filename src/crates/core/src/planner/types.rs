use agentgrid_core_types::{TaskEventPayload, TaskSource, TaskUrgency};
use serde::{Deserialize, Serialize};

use super::priority::compute_priority;

/// Live view of one task as the planner tracks it.
///
/// Created when a task is posted or claimed, mutated in place as progress
/// events arrive, dropped when the task closes or fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub event_id: String,
    pub intent: String,
    /// 0..=100, higher runs first.
    pub priority_score: u8,
    pub source: TaskSource,
    pub urgency: TaskUrgency,
    pub estimated_minutes: u32,
    pub progress_pct: u8,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at_ms: i64,
}

impl TaskSummary {
    /// Build a summary from a feed payload. Returns `None` when the payload
    /// cannot identify a task.
    pub fn from_payload(p: &TaskEventPayload, now_ms: i64) -> Option<Self> {
        if p.event_id.is_empty() {
            return None;
        }
        let source = p.source.unwrap_or(TaskSource::Agent);
        let waited_ms = p.posted_at_ms.map(|t| now_ms - t).unwrap_or(0);
        let priority_score = p
            .priority_score
            .map(|s| s.min(100))
            .unwrap_or_else(|| compute_priority(source, p.urgency, p.has_dependents, waited_ms));
        Some(Self {
            event_id: p.event_id.clone(),
            intent: p.intent.clone(),
            priority_score,
            source,
            urgency: p.urgency,
            estimated_minutes: p.estimated_minutes.unwrap_or(0),
            progress_pct: p.progress_pct.unwrap_or(0).min(100),
            dependencies: p.dependencies.clone(),
            created_at_ms: p.posted_at_ms.unwrap_or(now_ms),
        })
    }
}

/// An interrupted task together with the context needed to resume it
/// without losing accumulated progress.
///
/// Produced only by a forced interruption; popped exactly once when the
/// agent next becomes free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackedTaskSnapshot {
    pub task: TaskSummary,
    pub interrupted_at_ms: i64,
    /// Markdown summary of the work so far, capped at the configured
    /// snapshot length.
    pub context_snapshot: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    WaitingApproval,
    WaitingAgent,
    SkillMissing,
    ResourceLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    pub blocker_id: String,
    pub description: String,
    pub blocked_task_id: String,
    pub kind: BlockerKind,
    pub since_ms: i64,
}

/// Everything the planner knows about one registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkState {
    pub agent_id: String,
    pub agent_name: String,
    pub current_task: Option<TaskSummary>,
    /// LIFO stack of force-interrupted work.
    pub task_stack: Vec<StackedTaskSnapshot>,
    /// Kept sorted by `priority_score` descending.
    pub pending_queue: Vec<TaskSummary>,
    /// Rolling buffer of compact progress entries, consumed when an
    /// interruption snapshot is generated.
    pub progress_log: Vec<String>,
    pub completed_count: u64,
    pub blockers: Vec<Blocker>,
    pub last_report_at_ms: Option<i64>,
    pub registered_at_ms: i64,
}

impl AgentWorkState {
    pub fn new(agent_id: &str, agent_name: &str, now_ms: i64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            current_task: None,
            task_stack: Vec::new(),
            pending_queue: Vec::new(),
            progress_log: Vec::new(),
            completed_count: 0,
            blockers: Vec::new(),
            last_report_at_ms: None,
            registered_at_ms: now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTaskBrief {
    pub event_id: String,
    pub intent: String,
    pub priority_score: u8,
}

/// Read-only projection of an agent's work state, recomputed on demand and
/// published on AGENT_STATUS_REPORT. Never stored as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub agent_id: String,
    pub agent_name: String,
    pub current_task: Option<TaskSummary>,
    pub queue_depth: usize,
    pub queued_preview: Vec<QueuedTaskBrief>,
    pub stack_depth: usize,
    pub completed_count: u64,
    pub blockers: Vec<Blocker>,
    pub next_available_at_ms: i64,
    pub generated_at_ms: i64,
}

/// Counters behind the deliberately silent drop paths. Observability only;
/// functional behavior stays unchanged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropStats {
    pub queue_capacity_drops: u64,
    pub unaddressed_events: u64,
}
