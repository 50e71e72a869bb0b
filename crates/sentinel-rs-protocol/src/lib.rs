//! Shared data model for Sentinel requests, memory, drift, decisions and incidents.

mod collaborator;

pub use collaborator::{Completion, CompletionError, CompletionResponse, Embedder, EmbeddingError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a stored memory record.
pub type MemoryId = Uuid;
/// Unique identifier for a policy decision.
pub type DecisionId = Uuid;
/// Unique identifier for an incident.
pub type IncidentId = Uuid;
/// Sequence number assigned to a committed incident.
pub type SequenceNumber = u64;

/// Identity of an inbound guarded call.
///
/// Missing fields deserialize as empty strings so that an incomplete payload
/// reaches the boundary and is rejected there instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestContext {
    /// Caller identity.
    #[serde(default)]
    pub user_id: String,
    /// Session the caller claims to be in.
    #[serde(default)]
    pub session_id: String,
    /// Context boundary (tenant, thread) the call targets.
    #[serde(default)]
    pub scope: String,
    /// Intent label used for memory eligibility and drift history.
    #[serde(default)]
    pub intent: String,
}

impl RequestContext {
    /// Build a context from its four fields.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        scope: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            scope: scope.into(),
            intent: intent.into(),
        }
    }

    /// Value of a single field.
    pub fn field(&self, field: ContextField) -> &str {
        match field {
            ContextField::UserId => &self.user_id,
            ContextField::SessionId => &self.session_id,
            ContextField::Scope => &self.scope,
            ContextField::Intent => &self.intent,
        }
    }

    /// First field that is empty or whitespace-only, in declaration order.
    pub fn missing_field(&self) -> Option<ContextField> {
        ContextField::ALL
            .into_iter()
            .find(|field| self.field(*field).trim().is_empty())
    }
}

/// Named field of a [`RequestContext`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    UserId,
    SessionId,
    Scope,
    Intent,
}

impl ContextField {
    /// All fields in declaration order.
    pub const ALL: [ContextField; 4] = [
        ContextField::UserId,
        ContextField::SessionId,
        ContextField::Scope,
        ContextField::Intent,
    ];

    /// Wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextField::UserId => "user_id",
            ContextField::SessionId => "session_id",
            ContextField::Scope => "scope",
            ContextField::Intent => "intent",
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of knowledge a memory record carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryType {
    Fact,
    Preference,
    Decision,
}

impl MemoryType {
    /// All memory types.
    pub const ALL: [MemoryType; 3] = [
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Decision,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "FACT",
            MemoryType::Preference => "PREFERENCE",
            MemoryType::Decision => "DECISION",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown memory type name.
#[derive(Debug, thiserror::Error)]
#[error("unknown memory type: {0}")]
pub struct UnknownMemoryType(pub String);

impl FromStr for MemoryType {
    type Err = UnknownMemoryType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownMemoryType(value.to_string()))
    }
}

/// Persisted memory record. Never mutated; corrections are new records
/// sharing the superseded record's conflict key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryRecord {
    /// Record identifier.
    pub id: MemoryId,
    /// Memory type.
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Scope the record belongs to.
    pub scope: String,
    /// Optional intent restriction; `None` makes the record scope-wide.
    #[serde(default)]
    pub intent: Option<String>,
    /// Grouping key linking records about the same subject.
    pub conflict_key: String,
    /// Record content.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Memory record draft passed to the store, which assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub scope: String,
    pub intent: Option<String>,
    pub conflict_key: String,
    pub content: String,
}

impl NewMemory {
    /// Create a scope-wide memory draft.
    pub fn new(
        memory_type: MemoryType,
        scope: impl Into<String>,
        conflict_key: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            memory_type,
            scope: scope.into(),
            intent: None,
            conflict_key: conflict_key.into(),
            content: content.into(),
        }
    }

    /// Restrict the draft to a single intent.
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

/// Registration of a user on a scope with its valid sessions.
///
/// Registrations are append-only; the latest registration for a
/// `(user_id, scope)` pair supersedes earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeRegistration {
    pub user_id: String,
    pub scope: String,
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl ScopeRegistration {
    /// Active registration for the given sessions, stamped now.
    pub fn active(
        user_id: impl Into<String>,
        scope: impl Into<String>,
        sessions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            scope: scope.into(),
            sessions: sessions.into_iter().map(Into::into).collect(),
            active: true,
            registered_at: Utc::now(),
        }
    }

    /// Registration that deactivates a scope for a user.
    pub fn revoked(user_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope: scope.into(),
            sessions: Vec::new(),
            active: false,
            registered_at: Utc::now(),
        }
    }
}

/// A model response under comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSample {
    pub response_id: String,
    pub text: String,
}

impl ResponseSample {
    pub fn new(response_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            text: text.into(),
        }
    }
}

/// Persisted response used as the drift baseline for a `(scope, intent)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseRecord {
    pub scope: String,
    pub intent: String,
    pub response_id: String,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Sample view of the stored response.
    pub fn sample(&self) -> ResponseSample {
        ResponseSample::new(self.response_id.clone(), self.text.clone())
    }
}

/// Reason code for a rejected request context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryReason {
    /// A mandatory context field was absent or blank.
    MissingField,
    /// No active registration for the user on the requested scope.
    ScopeMismatch,
    /// The scope is registered but the session is not.
    SessionMismatch,
}

impl BoundaryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryReason::MissingField => "missing_field",
            BoundaryReason::ScopeMismatch => "scope_mismatch",
            BoundaryReason::SessionMismatch => "session_mismatch",
        }
    }
}

impl fmt::Display for BoundaryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the context boundary check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundaryResult {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<BoundaryReason>,
    /// Human-readable detail, e.g. the name of the missing field.
    #[serde(default)]
    pub detail: Option<String>,
}

impl BoundaryResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
            detail: None,
        }
    }

    pub fn rejected(reason: BoundaryReason, detail: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            detail: Some(detail.into()),
        }
    }
}

/// Ordered, conflict-free memory set proposed for injection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MemorySelection {
    /// Injectable records ordered by `(created_at, id)`.
    pub records: Vec<MemoryRecord>,
    /// Conflict keys whose whole group was withheld, sorted.
    pub excluded_conflicts: Vec<String>,
}

impl MemorySelection {
    /// Ids of the injectable records in injection order.
    pub fn injected_ids(&self) -> Vec<MemoryId> {
        self.records.iter().map(|record| record.id).collect()
    }
}

/// Drift classification for a pair of responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Stable,
    Drifting,
    Unknown,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Stable => "stable",
            DriftStatus::Drifting => "drifting",
            DriftStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-metric comparison of two responses to the same intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftMeasurement {
    pub intent: String,
    /// Baseline response id; `None` when no baseline existed.
    #[serde(default)]
    pub previous_response_id: Option<String>,
    pub current_response_id: String,
    /// Cosine similarity in `[-1, 1]`; `None` when unmeasurable.
    #[serde(default)]
    pub embedding_similarity: Option<f64>,
    /// Relative length change in `[0, 1]`; recorded for explanation only.
    pub length_delta_ratio: f64,
    /// Normalized token edit distance in `[0, 1]`; `None` when unmeasurable.
    #[serde(default)]
    pub structural_diff_score: Option<f64>,
    pub status: DriftStatus,
    /// Why the measurement is `unknown`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmeasurable_reason: Option<String>,
}

/// Outcome of the policy gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    Allow,
    Block,
    FlagReview,
}

impl PolicyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyOutcome::Allow => "allow",
            PolicyOutcome::Block => "block",
            PolicyOutcome::FlagReview => "flag_review",
        }
    }
}

impl fmt::Display for PolicyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a policy rule condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRuleName {
    BoundaryRejected,
    MemoryConflict,
    DriftDetected,
    DriftUnmeasurable,
}

impl PolicyRuleName {
    /// All rule conditions in their default evaluation order.
    pub const ALL: [PolicyRuleName; 4] = [
        PolicyRuleName::BoundaryRejected,
        PolicyRuleName::MemoryConflict,
        PolicyRuleName::DriftDetected,
        PolicyRuleName::DriftUnmeasurable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRuleName::BoundaryRejected => "boundary_rejected",
            PolicyRuleName::MemoryConflict => "memory_conflict",
            PolicyRuleName::DriftDetected => "drift_detected",
            PolicyRuleName::DriftUnmeasurable => "drift_unmeasurable",
        }
    }
}

impl fmt::Display for PolicyRuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs the policy gate decided on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyInputs {
    pub boundary_result: BoundaryResult,
    pub conflict_flags: Vec<String>,
    pub drift_status: DriftStatus,
}

/// Decision produced by the policy gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDecision {
    pub decision_id: DecisionId,
    pub inputs: PolicyInputs,
    pub outcome: PolicyOutcome,
    /// Every matching rule, in rule-table order.
    pub reasons: Vec<PolicyRuleName>,
    /// Policy configuration version that produced the decision.
    pub policy_version: String,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == PolicyOutcome::Allow
    }
}

/// Full input/metric/decision tuple for one guarded request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentLogEntry {
    pub incident_id: IncidentId,
    pub recorded_at: DateTime<Utc>,
    pub policy_version: String,
    pub context: RequestContext,
    /// Injected memory ids in selection order.
    pub injected_memory_ids: Vec<MemoryId>,
    pub excluded_conflicts: Vec<String>,
    pub boundary: BoundaryResult,
    pub drift: DriftMeasurement,
    pub decision: PolicyDecision,
}

impl IncidentLogEntry {
    pub fn outcome(&self) -> PolicyOutcome {
        self.decision.outcome
    }
}

/// Divergence between a logged decision and its replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayMismatch {
    pub incident_id: IncidentId,
    pub detected_at: DateTime<Utc>,
    /// Sequence number of the replayed incident.
    pub source_sequence: SequenceNumber,
    pub source_incident_id: IncidentId,
    pub logged_policy_version: String,
    pub active_policy_version: String,
    pub logged_outcome: PolicyOutcome,
    pub replayed_outcome: PolicyOutcome,
    pub logged_reasons: Vec<PolicyRuleName>,
    pub replayed_reasons: Vec<PolicyRuleName>,
    pub logged_drift_status: DriftStatus,
    pub replayed_drift_status: DriftStatus,
}

/// Any record written to the incident log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Incident {
    /// A guarded request decision.
    Decision(IncidentLogEntry),
    /// Replay of a logged decision diverged.
    ReplayMismatch(ReplayMismatch),
}

impl Incident {
    pub fn incident_id(&self) -> IncidentId {
        match self {
            Incident::Decision(entry) => entry.incident_id,
            Incident::ReplayMismatch(mismatch) => mismatch.incident_id,
        }
    }

    pub fn as_decision(&self) -> Option<&IncidentLogEntry> {
        match self {
            Incident::Decision(entry) => Some(entry),
            Incident::ReplayMismatch(_) => None,
        }
    }
}

/// Incident paired with the sequence number it was committed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggedIncident {
    pub sequence: SequenceNumber,
    pub incident: Incident,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn missing_context_fields_deserialize_blank() {
        let ctx: RequestContext =
            serde_json::from_value(json!({ "user_id": "u1", "scope": "billing" })).expect("ctx");
        assert_eq!(ctx.missing_field(), Some(ContextField::SessionId));
    }

    #[test]
    fn whitespace_counts_as_missing() {
        let ctx = RequestContext::new("u1", "s1", "billing", "   ");
        assert_eq!(ctx.missing_field(), Some(ContextField::Intent));
    }

    #[test]
    fn memory_type_wire_names() {
        assert_eq!(
            serde_json::to_value(MemoryType::Preference).expect("serialize"),
            json!("PREFERENCE")
        );
        assert_eq!("decision".parse::<MemoryType>().expect("parse"), MemoryType::Decision);
        assert!("OPINION".parse::<MemoryType>().is_err());
    }

    #[test]
    fn incident_is_tagged_by_kind() {
        let mismatch = ReplayMismatch {
            incident_id: Uuid::nil(),
            detected_at: Utc::now(),
            source_sequence: 3,
            source_incident_id: Uuid::nil(),
            logged_policy_version: "v1".to_string(),
            active_policy_version: "v2".to_string(),
            logged_outcome: PolicyOutcome::Allow,
            replayed_outcome: PolicyOutcome::FlagReview,
            logged_reasons: Vec::new(),
            replayed_reasons: vec![PolicyRuleName::DriftDetected],
            logged_drift_status: DriftStatus::Stable,
            replayed_drift_status: DriftStatus::Drifting,
        };
        let value = serde_json::to_value(Incident::ReplayMismatch(mismatch)).expect("serialize");
        assert_eq!(value["kind"], json!("replay_mismatch"));
        assert_eq!(value["replayed_reasons"], json!(["drift_detected"]));
        assert_eq!(value["replayed_outcome"], json!("flag_review"));
    }
}
