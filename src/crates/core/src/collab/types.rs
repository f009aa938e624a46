use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Lead,
    Contributor,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    PendingUser,
    PendingAgents,
    Active,
    Rejected,
}

/// What initiated a join. A user action joins synchronously; agent-driven
/// and summoned joins go through the pending/approval window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinTrigger {
    User,
    Agent,
    Summon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabMember {
    pub agent_id: String,
    pub agent_name: String,
    pub role: MemberRole,
    pub join_status: JoinStatus,
    /// Skills announced to the other members on join.
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub joined_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTaskStatus {
    Planned,
    InProgress,
    Blocked,
    Done,
}

/// One entry of the negotiated work plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 1 = highest, 10 = lowest.
    pub priority: u8,
    pub status: PlanTaskStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedWorkPlan {
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
    #[serde(default)]
    pub revised_at_ms: i64,
}

/// Collaboration state for one zone. At most one live session per zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCollabSession {
    pub session_id: String,
    pub zone_id: String,
    /// Unique by agent id. Exactly one Lead among active members whenever
    /// the session is non-empty.
    pub members: Vec<CollabMember>,
    pub work_plan: SharedWorkPlan,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// A join awaiting approval. Lives in the pending set until resolved or
/// timed out, then is gone for good; retrying creates a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneJoinRequest {
    pub request_id: String,
    pub agent_id: String,
    pub zone_id: String,
    pub trigger: JoinTrigger,
    pub status: JoinStatus,
    pub requested_at_ms: i64,
}

/// Outcome of a join request, explicit or timeout-driven. Also the wire
/// payload of ZONE_JOIN_RESOLVED.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneJoinResolution {
    pub request_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub approved: bool,
    pub decided_by: DecidedBy,
    #[serde(default)]
    pub reason: Option<String>,
}
