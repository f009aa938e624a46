use agentgrid_core::planner::{PlannerConfig, TaskSummary, WorkPlanner};
use agentgrid_core::{EventBus, FeedEvent, FeedTopic};
use agentgrid_core_types::{TaskSource, TaskUrgency};
use agentgrid_events::FeedRecvError;
use agentgrid_runtime_ports::{AgentDirectory, AgentMetricsSnapshot, AgentProfile, AgentStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

struct StaticDirectory {
    agents: HashMap<String, AgentProfile>,
}

impl StaticDirectory {
    fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        let agents = entries
            .iter()
            .map(|(id, name)| {
                (
                    id.to_string(),
                    AgentProfile {
                        name: name.to_string(),
                        role_tags: vec![],
                        equipped_skills: vec![],
                        status: AgentStatus::Online,
                        metrics: AgentMetricsSnapshot::default(),
                    },
                )
            })
            .collect();
        Arc::new(Self { agents })
    }
}

impl AgentDirectory for StaticDirectory {
    fn lookup(&self, agent_id: &str) -> Option<AgentProfile> {
        self.agents.get(agent_id).cloned()
    }
}

fn planner_with(bus: &EventBus, entries: &[(&str, &str)]) -> Arc<WorkPlanner> {
    WorkPlanner::new(bus.clone(), StaticDirectory::with(entries))
}

fn posted(agent_id: &str, event_id: &str, score: u8) -> FeedEvent {
    FeedEvent::new(
        FeedTopic::TaskPosted,
        json!({
            "eventId": event_id,
            "agentId": agent_id,
            "intent": format!("work on {}", event_id),
            "priorityScore": score,
            "estimatedMinutes": 5,
            "source": "agent",
        }),
    )
}

fn claimed(agent_id: &str, event_id: &str, score: u8, estimated_minutes: u32) -> FeedEvent {
    FeedEvent::new(
        FeedTopic::TaskClaimed,
        json!({
            "eventId": event_id,
            "agentId": agent_id,
            "intent": format!("work on {}", event_id),
            "priorityScore": score,
            "estimatedMinutes": estimated_minutes,
            "source": "agent",
        }),
    )
}

fn progress(agent_id: &str, event_id: &str, pct: u8, note: &str) -> FeedEvent {
    FeedEvent::new(
        FeedTopic::TaskProgress,
        json!({
            "eventId": event_id,
            "agentId": agent_id,
            "progressPct": pct,
            "note": note,
        }),
    )
}

fn closed(agent_id: &str, event_id: &str) -> FeedEvent {
    FeedEvent::new(
        FeedTopic::TaskClosed,
        json!({ "eventId": event_id, "agentId": agent_id }),
    )
}

fn forced(event_id: &str) -> TaskSummary {
    TaskSummary {
        event_id: event_id.to_string(),
        intent: format!("forced {}", event_id),
        priority_score: 0,
        source: TaskSource::Agent,
        urgency: TaskUrgency::High,
        estimated_minutes: 3,
        progress_pct: 0,
        dependencies: vec![],
        created_at_ms: 0,
    }
}

fn drain(rx: &mut agentgrid_events::FeedReceiver) -> Vec<FeedEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(e) => events.push(e),
            Err(FeedRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

#[test]
fn pending_queue_stays_sorted_by_priority() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    for (id, score) in [("t1", 55u8), ("t2", 90), ("t3", 10), ("t4", 70), ("t5", 70)] {
        planner.handle_feed_event(&posted("a1", id, score));
    }

    let state = planner.work_state("a1").expect("state");
    let scores: Vec<u8> = state.pending_queue.iter().map(|t| t.priority_score).collect();
    assert_eq!(scores.len(), 5);
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "queue out of order: {scores:?}");
}

#[test]
fn unscored_posts_are_ranked_by_computed_priority() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    let low = FeedEvent::new(
        FeedTopic::TaskPosted,
        json!({ "eventId": "bg", "agentId": "a1", "source": "agent", "urgency": "low" }),
    );
    let high = FeedEvent::new(
        FeedTopic::TaskPosted,
        json!({ "eventId": "urgent", "agentId": "a1", "source": "user", "urgency": "critical" }),
    );
    planner.handle_feed_event(&low);
    planner.handle_feed_event(&high);

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.pending_queue[0].event_id, "urgent");
    assert_eq!(state.pending_queue[1].event_id, "bg");
}

#[test]
fn register_and_unregister_are_idempotent() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");
    planner.register_agent("a1", "Mason");
    assert_eq!(planner.agent_count(), 1);

    planner.handle_feed_event(&posted("a1", "t1", 60));
    planner.register_agent("a1", "Mason");
    assert_eq!(
        planner.work_state("a1").expect("state").pending_queue.len(),
        1,
        "re-register must not reset queue state"
    );

    planner.unregister_agent("a1");
    planner.unregister_agent("a1");
    assert_eq!(planner.agent_count(), 0);
}

#[test]
fn force_with_pause_snapshots_current_and_resume_wins_over_queue() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "t1", 60, 10));
    planner.handle_feed_event(&progress("a1", "t1", 25, "drafted the outline"));
    planner.handle_feed_event(&progress("a1", "t1", 50, "filled in the middle section"));
    planner.handle_feed_event(&posted("a1", "queued", 80));

    planner
        .force_task("a1", forced("hotfix"), true)
        .expect("force");

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.task_stack.len(), 1);
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "hotfix");
    assert_eq!(state.current_task.as_ref().expect("current").priority_score, 100);
    assert_eq!(
        state.current_task.as_ref().expect("current").source,
        TaskSource::User
    );
    assert!(state.progress_log.is_empty(), "buffer consumed by snapshot");

    let snapshot = &state.task_stack[0];
    assert_eq!(snapshot.task.event_id, "t1");
    assert_eq!(snapshot.task.progress_pct, 50);
    assert!(snapshot.context_snapshot.contains("drafted the outline"));
    assert!(snapshot.context_snapshot.contains("filled in the middle section"));
    assert!(snapshot.context_snapshot.chars().count() <= 4000);

    drain(&mut rx);
    planner.handle_feed_event(&closed("a1", "hotfix"));

    let state = planner.work_state("a1").expect("state");
    assert_eq!(
        state.current_task.as_ref().expect("current").event_id,
        "t1",
        "stacked work resumes before the queue"
    );
    assert_eq!(state.pending_queue[0].event_id, "queued");
    assert!(state.task_stack.is_empty());

    let events = drain(&mut rx);
    let resume = events
        .iter()
        .find(|e| e.topic == FeedTopic::TaskPosted)
        .expect("synthetic resume post");
    assert_eq!(resume.payload["resumedFromStack"], true);
    assert_eq!(resume.payload["originalProgressPct"], 50);
    assert!(resume.payload["resumeContext"]
        .as_str()
        .expect("context")
        .contains("drafted the outline"));
    assert!(events.iter().any(|e| e.topic == FeedTopic::AgentStatusReport));
}

#[test]
fn force_without_pause_cuts_queue_front() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "t1", 60, 10));
    planner.handle_feed_event(&posted("a1", "queued", 80));
    planner.force_task("a1", forced("soon"), false).expect("force");

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "t1");
    assert_eq!(state.pending_queue[0].event_id, "soon");
    assert!(state.task_stack.is_empty(), "no snapshot without pause");
}

#[test]
fn resume_on_empty_stack_is_a_no_op() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");
    planner.handle_feed_event(&posted("a1", "t1", 60));

    assert!(!planner.resume_from_stack("a1"));

    let state = planner.work_state("a1").expect("state");
    assert!(state.current_task.is_none());
    assert_eq!(state.pending_queue.len(), 1);
    assert!(!planner.resume_from_stack("ghost"));
}

#[test]
fn big_priority_gap_preempts_without_snapshot() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "slow", 40, 10));
    planner.handle_feed_event(&progress("a1", "slow", 30, "halfway through discovery"));
    planner.handle_feed_event(&posted("a1", "urgent", 90));

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "urgent");
    assert_eq!(state.pending_queue[0].event_id, "slow");
    assert!(state.task_stack.is_empty(), "self-interrupt takes no snapshot");
    assert!(
        !state.progress_log.is_empty(),
        "self-interrupt leaves the buffer alone"
    );
}

#[test]
fn small_priority_gap_queues_instead_of_preempting() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "slow", 40, 10));
    planner.handle_feed_event(&posted("a1", "close-call", 69));

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "slow");
    assert_eq!(state.pending_queue[0].event_id, "close-call");
}

#[test]
fn queue_capacity_drops_are_silent_but_counted() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    for i in 0..25 {
        planner.handle_feed_event(&posted("a1", &format!("t{}", i), 50));
    }

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.pending_queue.len(), 20);
    assert_eq!(planner.drop_stats().queue_capacity_drops, 5);
}

#[test]
fn claim_while_busy_requeues_displaced_task_at_front() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "first", 60, 5));
    planner.handle_feed_event(&claimed("a1", "second", 40, 5));

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "second");
    assert_eq!(state.pending_queue[0].event_id, "first");
}

#[test]
fn close_clears_blockers_and_promotes_next_task() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "t1", 60, 5));
    planner.handle_feed_event(&posted("a1", "t2", 55));
    planner.handle_feed_event(&FeedEvent::new(
        FeedTopic::ApprovalRequired,
        json!({ "agentId": "a1", "blockedTaskId": "t1", "description": "needs sign-off" }),
    ));

    assert_eq!(planner.work_state("a1").expect("state").blockers.len(), 1);

    drain(&mut rx);
    planner.handle_feed_event(&closed("a1", "t1"));

    let state = planner.work_state("a1").expect("state");
    assert!(state.blockers.is_empty());
    assert_eq!(state.current_task.as_ref().expect("current").event_id, "t2");
    assert_eq!(state.completed_count, 1);

    let events = drain(&mut rx);
    let report = events
        .iter()
        .find(|e| e.topic == FeedTopic::AgentStatusReport)
        .expect("report after close");
    assert_eq!(report.payload["agentId"], "a1");
    assert_eq!(report.payload["completedCount"], 1);
}

#[test]
fn failed_task_does_not_count_as_completed() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "t1", 60, 5));
    planner.handle_feed_event(&FeedEvent::new(
        FeedTopic::TaskFailed,
        json!({ "eventId": "t1", "agentId": "a1" }),
    ));

    let state = planner.work_state("a1").expect("state");
    assert!(state.current_task.is_none());
    assert_eq!(state.completed_count, 0);
}

#[test]
fn next_available_time_adds_remaining_and_queued_minutes() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&claimed("a1", "t1", 60, 10));
    planner.handle_feed_event(&progress("a1", "t1", 50, "half done"));
    planner.handle_feed_event(&posted("a1", "t2", 55));

    let report = planner.build_status_report("a1").expect("report");
    // 5 minutes left on the current task + 5 queued.
    assert_eq!(report.next_available_at_ms - report.generated_at_ms, 600_000);
    assert_eq!(report.queue_depth, 1);
    assert_eq!(report.agent_name, "Mason");
}

#[test]
fn rolling_progress_buffer_is_bounded_and_clipped() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");
    planner.handle_feed_event(&claimed("a1", "t1", 60, 10));

    let long_note = "x".repeat(1000);
    for i in 0..40 {
        planner.handle_feed_event(&progress("a1", "t1", (i * 2).min(100) as u8, &long_note));
    }

    let state = planner.work_state("a1").expect("state");
    assert_eq!(state.progress_log.len(), 30);
    assert!(state.progress_log.iter().all(|e| e.chars().count() <= 240));
}

#[test]
fn events_without_resolvable_agent_are_skipped_and_counted() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");

    planner.handle_feed_event(&FeedEvent::new(
        FeedTopic::TaskPosted,
        json!({ "eventId": "t1" }),
    ));
    planner.handle_feed_event(&posted("ghost", "t2", 50));

    assert_eq!(planner.drop_stats().unaddressed_events, 2);
    assert!(planner
        .work_state("a1")
        .expect("state")
        .pending_queue
        .is_empty());
}

#[test]
fn publish_all_reports_covers_every_agent() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let planner = planner_with(&bus, &[("a1", "Mason"), ("a2", "Ada")]);
    planner.register_agent("a1", "Mason");
    planner.register_agent("a2", "Ada");

    planner.publish_all_reports();

    let events = drain(&mut rx);
    let reports: Vec<&FeedEvent> = events
        .iter()
        .filter(|e| e.topic == FeedTopic::AgentStatusReport)
        .collect();
    assert_eq!(reports.len(), 2);
    assert!(planner
        .work_state("a1")
        .expect("state")
        .last_report_at_ms
        .is_some());
}

#[test]
fn long_snapshot_is_truncated_with_marker() {
    let bus = EventBus::default();
    let planner = planner_with(&bus, &[("a1", "Mason")]);
    planner.register_agent("a1", "Mason");
    planner.handle_feed_event(&claimed("a1", "t1", 60, 10));

    let chunk = "a detailed account of what happened ".repeat(10);
    for _ in 0..30 {
        planner.handle_feed_event(&progress("a1", "t1", 10, &chunk));
    }
    planner.force_task("a1", forced("hotfix"), true).expect("force");

    let state = planner.work_state("a1").expect("state");
    let snapshot = &state.task_stack[0].context_snapshot;
    assert_eq!(snapshot.chars().count(), 4000);
    assert!(snapshot.ends_with("...[truncated]"));
}

#[test]
fn config_defaults_match_contract() {
    let config = PlannerConfig::default();
    assert_eq!(config.report_interval.as_secs(), 60);
    assert_eq!(config.max_pending_per_agent, 20);
    assert_eq!(config.progress_log_capacity, 30);
    assert_eq!(config.snapshot_max_chars, 4000);
}
