use agentgrid_core_types::{TaskSource, TaskUrgency};

use super::types::{AgentWorkState, TaskSummary};

/// Tasks waiting longer than this get a boost so they cannot starve.
pub const WAIT_BOOST_AFTER_MS: i64 = 5 * 60 * 1000;

/// Score a task for queue ordering. Pure and deterministic.
///
/// Base 50, plus source and urgency weights, plus boosts for tasks that
/// block others or have waited too long. Clamped to 100.
pub fn compute_priority(
    source: TaskSource,
    urgency: TaskUrgency,
    has_dependents: bool,
    waited_ms: i64,
) -> u8 {
    let mut score: u32 = 50;
    score += match source {
        TaskSource::User => 40,
        TaskSource::System => 20,
        TaskSource::Agent => 0,
    };
    score += match urgency {
        TaskUrgency::Critical => 30,
        TaskUrgency::High => 20,
        TaskUrgency::Medium => 5,
        TaskUrgency::Low => 0,
    };
    if has_dependents {
        score += 10;
    }
    if waited_ms > WAIT_BOOST_AFTER_MS {
        score += 15;
    }
    score.min(100) as u8
}

/// Minutes left on a task given its reported progress.
pub fn remaining_minutes(task: &TaskSummary) -> f64 {
    task.estimated_minutes as f64 * (1.0 - task.progress_pct as f64 / 100.0)
}

/// Earliest time the agent could pick up new work: the remainder of the
/// current task plus everything already queued.
pub fn next_available_at_ms(state: &AgentWorkState, now_ms: i64) -> i64 {
    let mut minutes = state
        .current_task
        .as_ref()
        .map(remaining_minutes)
        .unwrap_or(0.0);
    minutes += state
        .pending_queue
        .iter()
        .map(|t| t.estimated_minutes as f64)
        .sum::<f64>();
    now_ms + (minutes * 60_000.0) as i64
}
