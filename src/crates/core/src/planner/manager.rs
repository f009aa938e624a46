use agentgrid_core_types::{
    ApprovalRequiredPayload, FeedEvent, FeedTopic, TaskEventPayload, TaskSource,
};
use agentgrid_events::EventBus;
use agentgrid_runtime_ports::AgentDirectory;
use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::feed::{run_feed_loop, run_report_ticker};
use super::priority::next_available_at_ms;
use super::types::*;
use crate::util::errors::{GridError, GridResult};

/// A newly posted task preempts the current one when it outscores it by at
/// least this margin.
pub const SELF_INTERRUPT_MARGIN: i16 = 30;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Cadence of AGENT_STATUS_REPORT publications.
    pub report_interval: Duration,
    /// Pending queue capacity per agent; excess inserts are dropped.
    pub max_pending_per_agent: usize,
    /// Rolling progress buffer length per agent.
    pub progress_log_capacity: usize,
    /// Clip applied to each progress buffer entry.
    pub progress_entry_max_chars: usize,
    /// Cap on a generated interruption snapshot.
    pub snapshot_max_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(60),
            max_pending_per_agent: 20,
            progress_log_capacity: 30,
            progress_entry_max_chars: 240,
            snapshot_max_chars: 4000,
        }
    }
}

#[derive(Default)]
struct DropCounters {
    queue_capacity_drops: AtomicU64,
    unaddressed_events: AtomicU64,
}

/// Per-agent work scheduler.
///
/// Owns one `AgentWorkState` per registered agent, reacts to the task
/// lifecycle topics on the feed, and publishes periodic status reports.
/// All mutations go through per-entry map locks; handlers never hold an
/// entry across an await point.
pub struct WorkPlanner {
    agents: DashMap<String, AgentWorkState>,
    bus: EventBus,
    directory: Arc<dyn AgentDirectory>,
    config: PlannerConfig,
    drops: DropCounters,
    cancel_token: CancellationToken,
    started: AtomicBool,
    /// Back-reference handed to the spawned loops.
    weak_self: Weak<WorkPlanner>,
}

impl WorkPlanner {
    pub fn new(bus: EventBus, directory: Arc<dyn AgentDirectory>) -> Arc<Self> {
        Self::with_config(bus, directory, PlannerConfig::default())
    }

    pub fn with_config(
        bus: EventBus,
        directory: Arc<dyn AgentDirectory>,
        config: PlannerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            agents: DashMap::new(),
            bus,
            directory,
            config,
            drops: DropCounters::default(),
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Spawn the feed intake loop and the report ticker. Safe to call once;
    /// repeated calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Work planner already started");
            return;
        }
        let Some(planner) = self.weak_self.upgrade() else {
            return;
        };
        let rx = self.bus.subscribe();
        tokio::spawn(run_feed_loop(
            Arc::clone(&planner),
            rx,
            self.cancel_token.clone(),
        ));
        tokio::spawn(run_report_ticker(
            planner,
            self.cancel_token.clone(),
            self.config.report_interval,
        ));
    }

    /// Cancel the feed loop and the report ticker. No report is published
    /// after this returns.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn register_agent(&self, agent_id: &str, agent_name: &str) {
        if self.agents.contains_key(agent_id) {
            debug!("Agent already registered: agent_id={}", agent_id);
            return;
        }
        let now = chrono::Utc::now().timestamp_millis();
        self.agents
            .insert(agent_id.to_string(), AgentWorkState::new(agent_id, agent_name, now));
    }

    /// Drops all queue state for the agent. No effect on other agents.
    pub fn unregister_agent(&self, agent_id: &str) {
        if self.agents.remove(agent_id).is_some() {
            debug!("Agent unregistered: agent_id={}", agent_id);
        }
    }

    /// Inject a task directly, bypassing the feed. The task is stamped as
    /// user-sourced top priority. With `pause_current` an in-progress task
    /// is snapshotted onto the stack so its context survives; without it
    /// the new task cuts to the front of the queue instead.
    pub fn force_task(
        &self,
        agent_id: &str,
        mut task: TaskSummary,
        pause_current: bool,
    ) -> GridResult<()> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| GridError::NotFound(format!("Agent not registered: {}", agent_id)))?;
        task.priority_score = 100;
        task.source = TaskSource::User;

        let state = entry.value_mut();
        match state.current_task.take() {
            None => {
                state.current_task = Some(task);
            }
            Some(current) if pause_current => {
                let snapshot = self.capture_snapshot(state, current);
                state.task_stack.push(snapshot);
                state.current_task = Some(task);
            }
            Some(current) => {
                state.current_task = Some(current);
                // Front insert: a forced task must not be capacity-dropped.
                state.pending_queue.insert(0, task);
            }
        }
        Ok(())
    }

    /// Pop the newest interruption snapshot and make its task current
    /// again, re-announcing it on the feed with the preserved context.
    /// Returns false (mutating nothing) when the stack is empty.
    pub fn resume_from_stack(&self, agent_id: &str) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut entry) => self.resume_locked(entry.value_mut()),
            None => false,
        }
    }

    pub fn build_status_report(&self, agent_id: &str) -> Option<StatusReport> {
        let entry = self.agents.get(agent_id)?;
        let now = chrono::Utc::now().timestamp_millis();
        Some(self.render_report(entry.value(), now))
    }

    /// Publish one status report per registered agent.
    pub fn publish_all_reports(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        for mut entry in self.agents.iter_mut() {
            let state = entry.value_mut();
            let report = self.render_report(state, now);
            self.publish_struct(FeedTopic::AgentStatusReport, &report);
            state.last_report_at_ms = Some(now);
        }
    }

    /// Clone of the agent's full work state, for host/UI reads.
    pub fn work_state(&self, agent_id: &str) -> Option<AgentWorkState> {
        self.agents.get(agent_id).map(|e| e.value().clone())
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn drop_stats(&self) -> DropStats {
        DropStats {
            queue_capacity_drops: self.drops.queue_capacity_drops.load(Ordering::Relaxed),
            unaddressed_events: self.drops.unaddressed_events.load(Ordering::Relaxed),
        }
    }

    /// Dispatch one feed event. Total over all event shapes: unknown
    /// agents, missing fields and undecodable payloads are skipped.
    pub fn handle_feed_event(&self, event: &FeedEvent) {
        match event.topic {
            FeedTopic::TaskPosted => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_posted(p);
                }
            }
            FeedTopic::TaskClaimed => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_claimed(p);
                }
            }
            FeedTopic::TaskProgress => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_progress(p);
                }
            }
            FeedTopic::TaskClosed => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_done(p, false);
                }
            }
            FeedTopic::TaskFailed => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_done(p, true);
                }
            }
            FeedTopic::ApprovalRequired => {
                if let Some(p) = decode::<ApprovalRequiredPayload>(&event.payload) {
                    self.on_approval_required(p);
                }
            }
            _ => {}
        }
    }

    fn on_task_posted(&self, p: TaskEventPayload) {
        let Some(agent_id) = p.agent_id.clone() else {
            self.count_unaddressed("TASK_POSTED without agent id");
            return;
        };
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            self.count_unaddressed(&format!("TASK_POSTED for unknown agent: {}", agent_id));
            return;
        };
        let state = entry.value_mut();

        // A stack resume publishes its own TASK_POSTED after the task is
        // already current again; skip the echo.
        let already_current = state
            .current_task
            .as_ref()
            .map(|t| t.event_id == p.event_id)
            .unwrap_or(false);
        if already_current || state.pending_queue.iter().any(|t| t.event_id == p.event_id) {
            return;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let Some(task) = TaskSummary::from_payload(&p, now) else {
            return;
        };

        let preempts = state
            .current_task
            .as_ref()
            .map(|cur| task.priority_score as i16 - cur.priority_score as i16 >= SELF_INTERRUPT_MARGIN)
            .unwrap_or(false);
        if preempts {
            // Preemption without a snapshot: the displaced task goes to the
            // front of the queue and its progress context is not captured.
            // Forced interruption is the path that preserves context.
            if let Some(displaced) = state.current_task.take() {
                debug!(
                    "Self-interrupt: agent_id={}, new={}, displaced={}",
                    agent_id, task.event_id, displaced.event_id
                );
                state.pending_queue.insert(0, displaced);
            }
            state.current_task = Some(task);
            return;
        }

        self.enqueue_sorted(&agent_id, state, task);
    }

    fn on_task_claimed(&self, p: TaskEventPayload) {
        let Some(agent_id) = p.agent_id.clone() else {
            self.count_unaddressed("TASK_CLAIMED without agent id");
            return;
        };
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            self.count_unaddressed(&format!("TASK_CLAIMED for unknown agent: {}", agent_id));
            return;
        };
        let state = entry.value_mut();

        let claimed = match state
            .pending_queue
            .iter()
            .position(|t| t.event_id == p.event_id)
        {
            Some(idx) => state.pending_queue.remove(idx),
            None => {
                let now = chrono::Utc::now().timestamp_millis();
                match TaskSummary::from_payload(&p, now) {
                    Some(task) => task,
                    None => return,
                }
            }
        };

        if let Some(current) = state.current_task.take() {
            if current.event_id != claimed.event_id {
                // A claim while busy displaces the current task to the
                // front of the queue rather than losing it.
                state.pending_queue.insert(0, current);
            }
        }
        state.current_task = Some(claimed);
    }

    fn on_task_progress(&self, p: TaskEventPayload) {
        let Some(agent_id) = p.agent_id.clone() else {
            self.count_unaddressed("TASK_PROGRESS without agent id");
            return;
        };
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            self.count_unaddressed(&format!("TASK_PROGRESS for unknown agent: {}", agent_id));
            return;
        };
        let state = entry.value_mut();

        let pct = p.progress_pct.map(|v| v.min(100));
        let matches_current = state
            .current_task
            .as_ref()
            .map(|t| t.event_id == p.event_id)
            .unwrap_or(false);

        if matches_current {
            if let (Some(task), Some(pct)) = (state.current_task.as_mut(), pct) {
                task.progress_pct = pct;
            }
            let label = p.note.clone().unwrap_or_else(|| p.intent.clone());
            let shown_pct = state
                .current_task
                .as_ref()
                .map(|t| t.progress_pct)
                .unwrap_or(0);
            let line = clip_with_marker(
                &format!("{}% {}", shown_pct, label),
                self.config.progress_entry_max_chars,
            );
            state.progress_log.push(line);
            if state.progress_log.len() > self.config.progress_log_capacity {
                state.progress_log.remove(0);
            }
        } else if let Some(pct) = pct {
            if let Some(queued) = state
                .pending_queue
                .iter_mut()
                .find(|t| t.event_id == p.event_id)
            {
                queued.progress_pct = pct;
            }
        }
    }

    fn on_task_done(&self, p: TaskEventPayload, failed: bool) {
        let Some(agent_id) = p.agent_id.clone() else {
            self.count_unaddressed("task completion without agent id");
            return;
        };
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            self.count_unaddressed(&format!("task completion for unknown agent: {}", agent_id));
            return;
        };
        let state = entry.value_mut();
        let task_id = p.event_id.clone();

        state.pending_queue.retain(|t| t.event_id != task_id);
        state.blockers.retain(|b| b.blocked_task_id != task_id);

        let was_current = state
            .current_task
            .as_ref()
            .map(|t| t.event_id == task_id)
            .unwrap_or(false);
        if was_current {
            state.current_task = None;
            state.progress_log.clear();
            if !failed {
                state.completed_count += 1;
            }
        }

        // Interrupted work resumes before anything newly queued.
        if state.current_task.is_none() && !self.resume_locked(state) && !state.pending_queue.is_empty()
        {
            state.current_task = Some(state.pending_queue.remove(0));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let report = self.render_report(state, now);
        self.publish_struct(FeedTopic::AgentStatusReport, &report);
        state.last_report_at_ms = Some(now);
    }

    fn on_approval_required(&self, p: ApprovalRequiredPayload) {
        let Some(agent_id) = p.agent_id.clone() else {
            self.count_unaddressed("APPROVAL_REQUIRED without agent id");
            return;
        };
        let Some(mut entry) = self.agents.get_mut(&agent_id) else {
            self.count_unaddressed(&format!("APPROVAL_REQUIRED for unknown agent: {}", agent_id));
            return;
        };
        let now = chrono::Utc::now().timestamp_millis();
        entry.value_mut().blockers.push(Blocker {
            blocker_id: format!("blk-{}", uuid::Uuid::new_v4()),
            description: p.description,
            blocked_task_id: p.blocked_task_id,
            kind: BlockerKind::WaitingApproval,
            since_ms: now,
        });
    }

    fn resume_locked(&self, state: &mut AgentWorkState) -> bool {
        let Some(snapshot) = state.task_stack.pop() else {
            return false;
        };
        let task = snapshot.task.clone();
        state.current_task = Some(task.clone());

        let payload = TaskEventPayload {
            event_id: task.event_id.clone(),
            agent_id: Some(state.agent_id.clone()),
            intent: task.intent.clone(),
            source: Some(task.source),
            urgency: task.urgency,
            priority_score: Some(task.priority_score),
            estimated_minutes: Some(task.estimated_minutes),
            progress_pct: Some(task.progress_pct),
            note: None,
            dependencies: task.dependencies.clone(),
            has_dependents: false,
            posted_at_ms: Some(task.created_at_ms),
            resume_context: Some(snapshot.context_snapshot),
            resumed_from_stack: true,
            original_progress_pct: Some(task.progress_pct),
        };
        self.publish_struct(FeedTopic::TaskPosted, &payload);
        debug!(
            "Resumed from stack: agent_id={}, event_id={}",
            state.agent_id, task.event_id
        );
        true
    }

    fn enqueue_sorted(&self, agent_id: &str, state: &mut AgentWorkState, task: TaskSummary) {
        if state.pending_queue.len() >= self.config.max_pending_per_agent {
            self.drops
                .queue_capacity_drops
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                "Pending queue full, dropping task: agent_id={}, event_id={}",
                agent_id, task.event_id
            );
            return;
        }
        let pos = state
            .pending_queue
            .partition_point(|t| t.priority_score >= task.priority_score);
        state.pending_queue.insert(pos, task);
    }

    fn capture_snapshot(&self, state: &mut AgentWorkState, task: TaskSummary) -> StackedTaskSnapshot {
        let now = chrono::Utc::now().timestamp_millis();
        let context = render_context_snapshot(&task, &state.progress_log, self.config.snapshot_max_chars);
        state.progress_log.clear();
        StackedTaskSnapshot {
            task,
            interrupted_at_ms: now,
            context_snapshot: context,
        }
    }

    fn render_report(&self, state: &AgentWorkState, now_ms: i64) -> StatusReport {
        let agent_name = self
            .directory
            .lookup(&state.agent_id)
            .map(|p| p.name)
            .unwrap_or_else(|| state.agent_name.clone());
        StatusReport {
            agent_id: state.agent_id.clone(),
            agent_name,
            current_task: state.current_task.clone(),
            queue_depth: state.pending_queue.len(),
            queued_preview: state
                .pending_queue
                .iter()
                .take(5)
                .map(|t| QueuedTaskBrief {
                    event_id: t.event_id.clone(),
                    intent: t.intent.clone(),
                    priority_score: t.priority_score,
                })
                .collect(),
            stack_depth: state.task_stack.len(),
            completed_count: state.completed_count,
            blockers: state.blockers.clone(),
            next_available_at_ms: next_available_at_ms(state, now_ms),
            generated_at_ms: now_ms,
        }
    }

    fn publish_struct<T: Serialize>(&self, topic: FeedTopic, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.bus.publish_payload(topic, payload),
            Err(e) => warn!("Failed to encode feed payload: topic={:?}, error={}", topic, e),
        }
    }

    fn count_unaddressed(&self, reason: &str) {
        self.drops.unaddressed_events.fetch_add(1, Ordering::Relaxed);
        debug!("Skipped feed event: {}", reason);
    }
}

fn render_context_snapshot(task: &TaskSummary, entries: &[String], max_chars: usize) -> String {
    let mut md = format!(
        "## Interrupted work: {}\n\n- progress: {}%\n- estimated minutes: {}\n",
        task.intent, task.progress_pct, task.estimated_minutes
    );
    if !entries.is_empty() {
        md.push_str("\n### Recent activity\n");
        for entry in entries {
            md.push_str("- ");
            md.push_str(entry);
            md.push('\n');
        }
    }
    clip_with_marker(&md, max_chars)
}

/// Clip to a character budget, marking the cut. Character-based so multi-byte
/// text never splits mid-codepoint.
fn clip_with_marker(s: &str, max_chars: usize) -> String {
    const MARKER: &str = "...[truncated]";
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(MARKER.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(MARKER);
    out
}

fn decode<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Undecodable feed payload ignored: error={}", e);
            None
        }
    }
}
