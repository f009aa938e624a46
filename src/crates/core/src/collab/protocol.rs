use agentgrid_core_types::{FeedEvent, FeedTopic, TaskEventPayload};
use agentgrid_events::EventBus;
use agentgrid_runtime_ports::{AgentDirectory, AgentMessenger, AgentProfile};
use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::feed::run_collab_feed_loop;
use super::types::*;
use crate::util::errors::{GridError, GridResult};

#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// How long an agent-triggered join may stay pending before the
    /// timeout fallback approves it.
    pub join_timeout: Duration,
    /// Global cap on live sessions; overflow evicts the session with the
    /// fewest members.
    pub max_sessions: usize,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(30),
            max_sessions: 50,
        }
    }
}

struct PendingJoin {
    request: ZoneJoinRequest,
    timer_token: CancellationToken,
}

/// Zone collaboration coordinator.
///
/// Owns the per-zone sessions and the pending join set. Join resolutions
/// may arrive through the API, through the feed, or from a timeout timer;
/// whichever comes first wins and the rest become no-ops.
pub struct CollabProtocol {
    sessions: DashMap<String, ZoneCollabSession>,
    pending: DashMap<String, PendingJoin>,
    bus: EventBus,
    directory: Arc<dyn AgentDirectory>,
    messenger: Arc<dyn AgentMessenger>,
    config: CollabConfig,
    cancel_token: CancellationToken,
    started: AtomicBool,
    /// Back-reference handed to timer tasks and the feed loop.
    weak_self: Weak<CollabProtocol>,
}

impl CollabProtocol {
    pub fn new(
        bus: EventBus,
        directory: Arc<dyn AgentDirectory>,
        messenger: Arc<dyn AgentMessenger>,
    ) -> Arc<Self> {
        Self::with_config(bus, directory, messenger, CollabConfig::default())
    }

    pub fn with_config(
        bus: EventBus,
        directory: Arc<dyn AgentDirectory>,
        messenger: Arc<dyn AgentMessenger>,
        config: CollabConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            sessions: DashMap::new(),
            pending: DashMap::new(),
            bus,
            directory,
            messenger,
            config,
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Spawn the feed intake loop. Safe to call once; repeated calls are
    /// ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Collab protocol already started");
            return;
        }
        let Some(protocol) = self.weak_self.upgrade() else {
            return;
        };
        let rx = self.bus.subscribe();
        tokio::spawn(run_collab_feed_loop(
            protocol,
            rx,
            self.cancel_token.clone(),
        ));
    }

    /// Cancel the feed loop and every pending join timer.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.pending.clear();
    }

    /// Ask to join a zone's session.
    ///
    /// A user-triggered join is immediate and returns `None`. Any other
    /// trigger registers a pending request and returns its id; the outcome
    /// arrives later as a ZONE_JOIN_RESOLVED event. An agent the registry
    /// no longer knows is skipped silently.
    pub async fn request_join(
        &self,
        agent_id: &str,
        zone_id: &str,
        trigger: JoinTrigger,
    ) -> GridResult<Option<String>> {
        let Some(profile) = self.directory.lookup(agent_id) else {
            debug!("Join skipped, agent not in registry: agent_id={}", agent_id);
            return Ok(None);
        };

        if trigger == JoinTrigger::User {
            self.admit_member(agent_id, &profile, zone_id).await;
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let request = ZoneJoinRequest {
            request_id: format!("join-{}", uuid::Uuid::new_v4()),
            agent_id: agent_id.to_string(),
            zone_id: zone_id.to_string(),
            trigger,
            status: match trigger {
                JoinTrigger::Summon => JoinStatus::PendingUser,
                _ => JoinStatus::PendingAgents,
            },
            requested_at_ms: now,
        };
        let request_id = request.request_id.clone();

        // Child token: resolution cancels it individually, shutdown cancels
        // them all through the parent.
        let timer_token = self.cancel_token.child_token();
        self.pending.insert(
            request_id.clone(),
            PendingJoin {
                request: request.clone(),
                timer_token: timer_token.clone(),
            },
        );
        self.publish_struct(FeedTopic::ZoneJoinRequest, &request);

        // The timer only holds a weak reference; a dropped protocol means
        // there is nothing left to resolve.
        let weak = self.weak_self.clone();
        let timeout = self.config.join_timeout;
        let timer_request_id = request_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(protocol) = weak.upgrade() {
                        protocol.handle_join_timeout(&timer_request_id).await;
                    }
                }
            }
        });

        Ok(Some(request_id))
    }

    /// Apply an explicit resolution. Idempotent against requests that were
    /// already resolved or never existed; a ZONE_JOIN_RESOLVED event is
    /// published in every case.
    pub async fn resolve_join(&self, resolution: ZoneJoinResolution) -> GridResult<()> {
        match self.pending.remove(&resolution.request_id) {
            Some((_, pj)) => {
                pj.timer_token.cancel();
                self.complete_join(
                    pj.request,
                    resolution.approved,
                    resolution.decided_by,
                    resolution.reason,
                )
                .await;
            }
            None => {
                debug!(
                    "Resolution for unknown or already resolved request: request_id={}",
                    resolution.request_id
                );
                self.publish_struct(FeedTopic::ZoneJoinResolved, &resolution);
            }
        }
        Ok(())
    }

    /// Remove a member from a zone's session. Deletes the session when it
    /// empties; re-elects a lead when the lead departs.
    pub async fn remove_member(&self, agent_id: &str, zone_id: &str) -> GridResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let emptied = {
            let Some(mut entry) = self.sessions.get_mut(zone_id) else {
                debug!("Remove from unknown zone ignored: zone_id={}", zone_id);
                return Ok(());
            };
            let session = entry.value_mut();
            match session.members.iter().position(|m| m.agent_id == agent_id) {
                None => return Ok(()),
                Some(pos) => {
                    let removed = session.members.remove(pos);
                    session.updated_at_ms = now;
                    let emptied = session.members.is_empty();
                    if !emptied && removed.role == MemberRole::Lead {
                        self.reelect_lead(session);
                    }
                    emptied
                }
            }
        };
        if emptied {
            self.sessions.remove(zone_id);
            debug!("Zone session closed: zone_id={}", zone_id);
        } else {
            self.sync_session(zone_id);
        }
        Ok(())
    }

    /// Replace the session's negotiated plan wholesale.
    pub async fn update_work_plan(&self, zone_id: &str, plan: SharedWorkPlan) -> GridResult<()> {
        {
            let mut entry = self.sessions.get_mut(zone_id).ok_or_else(|| {
                GridError::NotFound(format!("Zone session not found: {}", zone_id))
            })?;
            let session = entry.value_mut();
            session.work_plan = plan;
            session.updated_at_ms = chrono::Utc::now().timestamp_millis();
        }
        self.sync_session(zone_id);
        Ok(())
    }

    pub fn session_snapshot(&self, zone_id: &str) -> GridResult<ZoneCollabSession> {
        self.sessions
            .get(zone_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GridError::NotFound(format!("Zone session not found: {}", zone_id)))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch one feed event. Total over all event shapes.
    pub async fn handle_feed_event(&self, event: &FeedEvent) {
        match event.topic {
            FeedTopic::ZoneJoinResolved => {
                if let Some(res) = decode::<ZoneJoinResolution>(&event.payload) {
                    // Only external resolutions for a still-pending request
                    // matter; our own publications echo back here.
                    if self.pending.contains_key(&res.request_id) {
                        let _ = self.resolve_join(res).await;
                    }
                }
            }
            FeedTopic::TaskClosed => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_completion(&p.event_id, false);
                }
            }
            FeedTopic::TaskFailed => {
                if let Some(p) = decode::<TaskEventPayload>(&event.payload) {
                    self.on_task_completion(&p.event_id, true);
                }
            }
            _ => {}
        }
    }

    async fn handle_join_timeout(&self, request_id: &str) {
        let Some((_, pj)) = self.pending.remove(request_id) else {
            return;
        };
        let request = pj.request;
        debug!(
            "Join request timed out: request_id={}, zone_id={}",
            request.request_id, request.zone_id
        );

        let lead = self.sessions.get(&request.zone_id).and_then(|entry| {
            entry
                .value()
                .members
                .iter()
                .find(|m| m.role == MemberRole::Lead && m.join_status == JoinStatus::Active)
                .cloned()
        });

        // The lead is notified but not waited on; the join proceeds either
        // way. Without a lead the system decides.
        let decided_by = match lead {
            Some(lead) => {
                let notice = serde_json::json!({
                    "type": "join_timeout_notice",
                    "requestId": request.request_id,
                    "agentId": request.agent_id,
                    "zoneId": request.zone_id,
                });
                if let Err(e) = self
                    .messenger
                    .send(&request.agent_id, &lead.agent_id, notice, "zone-join-timeout")
                    .await
                {
                    warn!(
                        "Failed to notify lead of timed-out join: zone_id={}, error={}",
                        request.zone_id, e
                    );
                }
                DecidedBy::Agent
            }
            None => DecidedBy::System,
        };

        self.complete_join(request, true, decided_by, None).await;
    }

    async fn complete_join(
        &self,
        request: ZoneJoinRequest,
        approved: bool,
        decided_by: DecidedBy,
        reason: Option<String>,
    ) {
        if approved {
            match self.directory.lookup(&request.agent_id) {
                Some(profile) => {
                    self.admit_member(&request.agent_id, &profile, &request.zone_id)
                        .await;
                }
                None => debug!(
                    "Approved join skipped, agent left the registry: agent_id={}",
                    request.agent_id
                ),
            }
        }
        let resolution = ZoneJoinResolution {
            request_id: request.request_id,
            agent_id: Some(request.agent_id),
            zone_id: Some(request.zone_id),
            approved,
            decided_by,
            reason,
        };
        self.publish_struct(FeedTopic::ZoneJoinResolved, &resolution);
    }

    async fn admit_member(&self, agent_id: &str, profile: &AgentProfile, zone_id: &str) {
        self.ensure_session(zone_id);
        let now = chrono::Utc::now().timestamp_millis();

        let announce_to: Vec<String> = {
            let Some(mut entry) = self.sessions.get_mut(zone_id) else {
                return;
            };
            let session = entry.value_mut();
            if session.members.iter().any(|m| m.agent_id == agent_id) {
                debug!(
                    "Already a member, join ignored: agent_id={}, zone_id={}",
                    agent_id, zone_id
                );
                return;
            }
            let has_active_lead = session
                .members
                .iter()
                .any(|m| m.role == MemberRole::Lead && m.join_status == JoinStatus::Active);
            let targets = session
                .members
                .iter()
                .filter(|m| m.join_status == JoinStatus::Active)
                .map(|m| m.agent_id.clone())
                .collect();
            session.members.push(CollabMember {
                agent_id: agent_id.to_string(),
                agent_name: profile.name.clone(),
                role: if has_active_lead {
                    MemberRole::Contributor
                } else {
                    MemberRole::Lead
                },
                join_status: JoinStatus::Active,
                capabilities: profile.equipped_skills.clone(),
                joined_at_ms: now,
            });
            session.updated_at_ms = now;
            targets
        };

        let announcement = serde_json::json!({
            "type": "capability_announcement",
            "agentId": agent_id,
            "agentName": profile.name,
            "zoneId": zone_id,
            "capabilities": profile.equipped_skills,
        });
        for to in &announce_to {
            if let Err(e) = self
                .messenger
                .send(agent_id, to, announcement.clone(), "zone-capability-announcement")
                .await
            {
                warn!(
                    "Capability announcement failed: to={}, zone_id={}, error={}",
                    to, zone_id, e
                );
            }
        }

        self.sync_session(zone_id);
    }

    fn ensure_session(&self, zone_id: &str) {
        if self.sessions.contains_key(zone_id) {
            return;
        }
        if self.sessions.len() >= self.config.max_sessions {
            let victim = self
                .sessions
                .iter()
                .min_by_key(|e| e.value().members.len())
                .map(|e| e.key().clone());
            if let Some(zone) = victim {
                self.sessions.remove(&zone);
                warn!(
                    "Session cap reached, evicted smallest session: zone_id={}",
                    zone
                );
            }
        }
        let now = chrono::Utc::now().timestamp_millis();
        self.sessions.insert(
            zone_id.to_string(),
            ZoneCollabSession {
                session_id: format!("collab-{}", uuid::Uuid::new_v4()),
                zone_id: zone_id.to_string(),
                members: Vec::new(),
                work_plan: SharedWorkPlan::default(),
                created_at_ms: now,
                updated_at_ms: now,
            },
        );
    }

    fn reelect_lead(&self, session: &mut ZoneCollabSession) {
        let mut best: Option<(usize, f64)> = None;
        for (idx, member) in session.members.iter().enumerate() {
            if member.join_status != JoinStatus::Active {
                continue;
            }
            let rate = self
                .directory
                .lookup(&member.agent_id)
                .map(|p| p.metrics.success_rate_7d)
                .unwrap_or(0.0);
            // Strictly greater keeps the earliest member on ties.
            if best.map(|(_, b)| rate > b).unwrap_or(true) {
                best = Some((idx, rate));
            }
        }
        if let Some((idx, _)) = best {
            for (i, member) in session.members.iter_mut().enumerate() {
                if i == idx {
                    member.role = MemberRole::Lead;
                } else if member.role == MemberRole::Lead {
                    member.role = MemberRole::Contributor;
                }
            }
            debug!(
                "Lead re-elected: zone_id={}, agent_id={}",
                session.zone_id, session.members[idx].agent_id
            );
        }
    }

    fn on_task_completion(&self, event_id: &str, failed: bool) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut changed_zones: Vec<String> = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            let mut changed = false;
            for task in session.work_plan.tasks.iter_mut() {
                if task.task_id == event_id {
                    task.status = if failed {
                        PlanTaskStatus::Blocked
                    } else {
                        PlanTaskStatus::Done
                    };
                    changed = true;
                }
            }
            if changed {
                session.updated_at_ms = now;
                session.work_plan.revised_at_ms = now;
                changed_zones.push(session.zone_id.clone());
            }
        }
        for zone in changed_zones {
            self.sync_session(&zone);
        }
    }

    fn sync_session(&self, zone_id: &str) {
        let snapshot = self.sessions.get(zone_id).map(|e| e.value().clone());
        if let Some(session) = snapshot {
            self.publish_struct(FeedTopic::ZoneCollabSync, &session);
        }
    }

    fn publish_struct<T: Serialize>(&self, topic: FeedTopic, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.bus.publish_payload(topic, payload),
            Err(e) => warn!("Failed to encode feed payload: topic={:?}, error={}", topic, e),
        }
    }
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
