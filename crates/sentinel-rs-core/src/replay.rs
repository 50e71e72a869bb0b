//! Deterministic replay of logged decisions.

use crate::{DriftThresholds, GuardError, IncidentRecorder, PolicyGate};
use chrono::Utc;
use log::{info, warn};
use sentinel_rs_protocol::{
    Incident, IncidentLogEntry, PolicyDecision, PolicyInputs, ReplayMismatch, SequenceNumber,
};
use serde::Serialize;
use uuid::Uuid;

/// Result of replaying one logged decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayVerdict {
    /// The replayed decision agrees with the log.
    Match(PolicyDecision),
    /// The replay diverged; the mismatch was committed under `sequence`.
    Mismatch {
        sequence: SequenceNumber,
        mismatch: Box<ReplayMismatch>,
    },
}

impl ReplayVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, ReplayVerdict::Match(_))
    }
}

/// Summary of a full-log audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    /// Decision incidents replayed.
    pub replayed: usize,
    pub matched: usize,
    /// Mismatch incidents committed by this audit.
    pub mismatches: Vec<ReplayMismatch>,
    /// Mismatch incidents already in the log, which are not replayed.
    pub skipped: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Recomputes policy decisions from logged incidents.
///
/// Only the stored metrics and conflict keys are used. The embedding and
/// completion backends are never called.
#[derive(Clone)]
pub struct ReplayEngine {
    gate: PolicyGate,
    thresholds: DriftThresholds,
    recorder: IncidentRecorder,
}

impl ReplayEngine {
    pub fn new(gate: PolicyGate, thresholds: DriftThresholds, recorder: IncidentRecorder) -> Self {
        Self {
            gate,
            thresholds,
            recorder,
        }
    }

    /// Recompute the decision for a logged entry under the active policy.
    pub fn replay(&self, entry: &IncidentLogEntry) -> PolicyDecision {
        let inputs = PolicyInputs {
            boundary_result: entry.boundary.clone(),
            conflict_flags: entry.excluded_conflicts.clone(),
            drift_status: self.thresholds.status_of(&entry.drift),
        };
        self.gate.decide_inputs(entry.decision.decision_id, inputs)
    }

    /// Replay an entry and commit a mismatch incident if it diverges.
    pub fn verify(
        &self,
        sequence: SequenceNumber,
        entry: &IncidentLogEntry,
    ) -> Result<ReplayVerdict, GuardError> {
        let replayed = self.replay(entry);
        let logged = &entry.decision;
        if replayed.outcome == logged.outcome
            && replayed.reasons == logged.reasons
            && replayed.inputs.drift_status == entry.drift.status
        {
            return Ok(ReplayVerdict::Match(replayed));
        }
        warn!(
            "replay diverged (sequence={}, logged={}, replayed={})",
            sequence, logged.outcome, replayed.outcome
        );
        let mismatch = ReplayMismatch {
            incident_id: Uuid::new_v4(),
            detected_at: Utc::now(),
            source_sequence: sequence,
            source_incident_id: entry.incident_id,
            logged_policy_version: entry.policy_version.clone(),
            active_policy_version: self.gate.version().to_string(),
            logged_outcome: logged.outcome,
            replayed_outcome: replayed.outcome,
            logged_reasons: logged.reasons.clone(),
            replayed_reasons: replayed.reasons,
            logged_drift_status: entry.drift.status,
            replayed_drift_status: replayed.inputs.drift_status,
        };
        let mismatch_sequence = self.recorder.record_mismatch(mismatch.clone())?;
        Ok(ReplayVerdict::Mismatch {
            sequence: mismatch_sequence,
            mismatch: Box::new(mismatch),
        })
    }

    /// Replay one incident from the log by sequence number.
    pub fn verify_sequence(&self, sequence: SequenceNumber) -> Result<ReplayVerdict, GuardError> {
        let logged = self.recorder.incident(sequence)?;
        match logged.incident {
            Incident::Decision(entry) => self.verify(sequence, &entry),
            Incident::ReplayMismatch(_) => Err(GuardError::InvalidIncident(format!(
                "sequence {sequence} is a replay mismatch, not a decision"
            ))),
        }
    }

    /// Replay every decision currently in the log.
    pub fn audit(&self) -> Result<AuditReport, GuardError> {
        let mut report = AuditReport::default();
        for logged in self.recorder.incidents()? {
            let Incident::Decision(entry) = logged.incident else {
                report.skipped += 1;
                continue;
            };
            report.replayed += 1;
            match self.verify(logged.sequence, &entry)? {
                ReplayVerdict::Match(_) => report.matched += 1,
                ReplayVerdict::Mismatch { mismatch, .. } => report.mismatches.push(*mismatch),
            }
        }
        info!(
            "audit finished (replayed={}, matched={}, mismatches={})",
            report.replayed,
            report.matched,
            report.mismatches.len()
        );
        Ok(report)
    }
}
