//! Error types for the guard core.

use sentinel_rs_config::ConfigError;
use sentinel_rs_protocol::{
    CompletionError, DecisionId, PolicyOutcome, PolicyRuleName, SequenceNumber,
};
use sentinel_rs_store::StoreError;
use thiserror::Error;

/// Errors returned by guard operations.
///
/// Boundary rejections, memory conflicts and unmeasurable drift are not
/// errors; they are reported through the policy decision.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Reading or writing the record store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The incident could not be committed; the request must not proceed.
    #[error("incident log write failed: {0}")]
    AuditWriteFailed(#[source] StoreError),
    /// An incident entry is incomplete or internally inconsistent.
    #[error("invalid incident entry: {0}")]
    InvalidIncident(String),
    /// `PolicyGate::enforce` was given a decision that is not `allow`.
    #[error("policy violation ({outcome}) for decision {decision_id}: {}", format_reasons(.reasons))]
    PolicyViolation {
        decision_id: DecisionId,
        outcome: PolicyOutcome,
        reasons: Vec<PolicyRuleName>,
    },
    /// The completion collaborator failed.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
    /// Guard construction was given an invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// No incident with this sequence number exists.
    #[error("unknown incident sequence: {0}")]
    UnknownIncident(SequenceNumber),
    /// The guard was asked to run without a completion collaborator.
    #[error("no completion backend configured")]
    MissingCompletion,
}

impl GuardError {
    /// Whether the request was refused because it could not be audited.
    pub fn is_fail_closed(&self) -> bool {
        matches!(self, GuardError::AuditWriteFailed(_))
    }
}

fn format_reasons(reasons: &[PolicyRuleName]) -> String {
    reasons
        .iter()
        .map(PolicyRuleName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
