//! Declarative policy gate.

use crate::GuardError;
use log::debug;
use sentinel_rs_config::PolicyConfig;
use sentinel_rs_protocol::{
    BoundaryResult, DecisionId, DriftMeasurement, DriftStatus, PolicyDecision, PolicyInputs,
    PolicyOutcome, PolicyRuleName,
};
use uuid::Uuid;

/// One row of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRule {
    pub condition: PolicyRuleName,
    pub outcome: PolicyOutcome,
}

impl PolicyRule {
    fn matches(&self, inputs: &PolicyInputs) -> bool {
        match self.condition {
            PolicyRuleName::BoundaryRejected => !inputs.boundary_result.accepted,
            PolicyRuleName::MemoryConflict => !inputs.conflict_flags.is_empty(),
            PolicyRuleName::DriftDetected => inputs.drift_status == DriftStatus::Drifting,
            PolicyRuleName::DriftUnmeasurable => inputs.drift_status == DriftStatus::Unknown,
        }
    }
}

/// Ordered rule table tagged with a version.
///
/// The first matching rule decides the outcome; every matching rule is
/// reported, in table order. No match means `allow`.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    rules: Vec<PolicyRule>,
    version: String,
}

impl PolicyGate {
    pub fn new(config: &PolicyConfig) -> Result<Self, GuardError> {
        config.validate()?;
        Ok(Self {
            rules: config
                .rules
                .iter()
                .map(|rule| PolicyRule {
                    condition: rule.rule,
                    outcome: rule.outcome,
                })
                .collect(),
            version: config.version.clone(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Evaluate the rule table without building a decision.
    pub fn evaluate(&self, inputs: &PolicyInputs) -> (PolicyOutcome, Vec<PolicyRuleName>) {
        let matched: Vec<&PolicyRule> =
            self.rules.iter().filter(|rule| rule.matches(inputs)).collect();
        let outcome = matched
            .first()
            .map(|rule| rule.outcome)
            .unwrap_or(PolicyOutcome::Allow);
        (outcome, matched.iter().map(|rule| rule.condition).collect())
    }

    /// Decide on the outputs of the boundary, memory and drift stages.
    pub fn decide(
        &self,
        boundary: &BoundaryResult,
        conflicts: &[String],
        drift: &DriftMeasurement,
    ) -> PolicyDecision {
        let inputs = PolicyInputs {
            boundary_result: boundary.clone(),
            conflict_flags: conflicts.to_vec(),
            drift_status: drift.status,
        };
        self.decide_inputs(Uuid::new_v4(), inputs)
    }

    /// Decide on prepared inputs under a given decision id.
    pub fn decide_inputs(&self, decision_id: DecisionId, inputs: PolicyInputs) -> PolicyDecision {
        let (outcome, reasons) = self.evaluate(&inputs);
        debug!(
            "policy decided (decision_id={}, outcome={}, reasons={:?}, version={})",
            decision_id, outcome, reasons, self.version
        );
        PolicyDecision {
            decision_id,
            inputs,
            outcome,
            reasons,
            policy_version: self.version.clone(),
        }
    }

    /// Outcome for releasing the response itself.
    ///
    /// A `memory_conflict` match only withholds the conflicted records, which
    /// selection already excluded, so it is skipped here. The first other
    /// matching rule decides; none means `allow`.
    pub fn release_outcome(&self, decision: &PolicyDecision) -> PolicyOutcome {
        decision
            .reasons
            .iter()
            .filter(|reason| **reason != PolicyRuleName::MemoryConflict)
            .find_map(|reason| {
                self.rules
                    .iter()
                    .find(|rule| rule.condition == *reason)
                    .map(|rule| rule.outcome)
            })
            .unwrap_or(PolicyOutcome::Allow)
    }

    /// Pass an allowed decision through; anything else is a violation.
    pub fn enforce(&self, decision: PolicyDecision) -> Result<PolicyDecision, GuardError> {
        if decision.is_allowed() {
            return Ok(decision);
        }
        Err(GuardError::PolicyViolation {
            decision_id: decision.decision_id,
            outcome: decision.outcome,
            reasons: decision.reasons,
        })
    }
}
