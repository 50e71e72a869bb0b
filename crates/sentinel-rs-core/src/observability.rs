//! Incident recording.

use crate::GuardError;
use log::{error, info};
use sentinel_rs_protocol::{
    DriftStatus, Incident, IncidentLogEntry, LoggedIncident, ReplayMismatch, SequenceNumber,
};
use sentinel_rs_store::IncidentLog;
use std::sync::Arc;

/// Validates incidents and commits them to the incident log.
#[derive(Clone)]
pub struct IncidentRecorder {
    log: Arc<dyn IncidentLog>,
}

impl IncidentRecorder {
    pub fn new(log: Arc<dyn IncidentLog>) -> Self {
        Self { log }
    }

    /// Commit a decision entry and return its sequence number.
    ///
    /// Incomplete or inconsistent entries are refused before anything is
    /// written. A failed write is reported as [`GuardError::AuditWriteFailed`].
    pub fn record(&self, entry: IncidentLogEntry) -> Result<SequenceNumber, GuardError> {
        validate_entry(&entry)?;
        let incident_id = entry.incident_id;
        let outcome = entry.outcome();
        let sequence = self.commit(&Incident::Decision(entry))?;
        info!(
            "incident recorded (sequence={}, incident_id={}, outcome={})",
            sequence, incident_id, outcome
        );
        Ok(sequence)
    }

    /// Commit a replay mismatch as its own incident.
    pub fn record_mismatch(&self, mismatch: ReplayMismatch) -> Result<SequenceNumber, GuardError> {
        let source = mismatch.source_sequence;
        let sequence = self.commit(&Incident::ReplayMismatch(mismatch))?;
        error!(
            "replay mismatch recorded (sequence={}, source_sequence={})",
            sequence, source
        );
        Ok(sequence)
    }

    /// All committed incidents in sequence order.
    pub fn incidents(&self) -> Result<Vec<LoggedIncident>, GuardError> {
        Ok(self.log.read_all()?)
    }

    /// One committed incident.
    pub fn incident(&self, sequence: SequenceNumber) -> Result<LoggedIncident, GuardError> {
        self.log
            .read(sequence)?
            .ok_or(GuardError::UnknownIncident(sequence))
    }

    fn commit(&self, incident: &Incident) -> Result<SequenceNumber, GuardError> {
        self.log.append(incident).map_err(|err| {
            error!(
                "incident log write failed (incident_id={}): {}",
                incident.incident_id(),
                err
            );
            GuardError::AuditWriteFailed(err)
        })
    }
}

/// Check that an entry is complete and agrees with itself.
pub fn validate_entry(entry: &IncidentLogEntry) -> Result<(), GuardError> {
    let invalid = |message: &str| Err(GuardError::InvalidIncident(message.to_string()));
    let decision = &entry.decision;

    if entry.policy_version.trim().is_empty() {
        return invalid("policy_version is empty");
    }
    if decision.policy_version != entry.policy_version {
        return invalid("decision policy_version differs from entry policy_version");
    }
    if decision.inputs.boundary_result != entry.boundary {
        return invalid("decision boundary input differs from entry boundary");
    }
    if decision.inputs.conflict_flags != entry.excluded_conflicts {
        return invalid("decision conflict flags differ from excluded conflicts");
    }
    if decision.inputs.drift_status != entry.drift.status {
        return invalid("decision drift status differs from drift measurement");
    }
    if !decision.is_allowed() && decision.reasons.is_empty() {
        return invalid("non-allow outcome without reasons");
    }
    if entry.drift.intent != entry.context.intent {
        return invalid("drift intent differs from request intent");
    }

    if entry.boundary.accepted {
        if entry.boundary.reason.is_some() {
            return invalid("accepted boundary carries a rejection reason");
        }
        if entry.context.missing_field().is_some() {
            return invalid("accepted boundary with incomplete context");
        }
        if entry.drift.current_response_id.trim().is_empty() {
            return invalid("current_response_id is empty");
        }
    } else {
        if entry.boundary.reason.is_none() {
            return invalid("rejected boundary without a reason");
        }
        if !entry.injected_memory_ids.is_empty() {
            return invalid("memory injected past a rejected boundary");
        }
    }

    let measured = entry.drift.embedding_similarity.is_some()
        && entry.drift.structural_diff_score.is_some();
    match entry.drift.status {
        DriftStatus::Unknown => {
            if entry.drift.embedding_similarity.is_some()
                || entry.drift.structural_diff_score.is_some()
            {
                return invalid("unknown drift with recorded similarity metrics");
            }
            if entry.drift.unmeasurable_reason.is_none() {
                return invalid("unknown drift without a reason");
            }
        }
        DriftStatus::Stable | DriftStatus::Drifting if !measured => {
            return invalid("measured drift status without both metrics");
        }
        _ => {}
    }
    if !(0.0..=1.0).contains(&entry.drift.length_delta_ratio) {
        return invalid("length_delta_ratio outside [0, 1]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicyGate;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use sentinel_rs_config::PolicyConfig;
    use sentinel_rs_protocol::{BoundaryResult, DriftMeasurement, RequestContext};
    use sentinel_rs_store::InMemoryIncidentLog;
    use sentinel_rs_test_utils::FailingIncidentLog;
    use uuid::Uuid;

    fn entry() -> IncidentLogEntry {
        let gate = PolicyGate::new(&PolicyConfig::default()).expect("gate");
        let boundary = BoundaryResult::accepted();
        let drift = DriftMeasurement {
            intent: "explain".to_string(),
            previous_response_id: Some("r1".to_string()),
            current_response_id: "r2".to_string(),
            embedding_similarity: Some(0.95),
            length_delta_ratio: 0.0,
            structural_diff_score: Some(0.0),
            status: DriftStatus::Stable,
            unmeasurable_reason: None,
        };
        let decision = gate.decide(&boundary, &[], &drift);
        IncidentLogEntry {
            incident_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            policy_version: gate.version().to_string(),
            context: RequestContext::new("u1", "s1", "billing", "explain"),
            injected_memory_ids: Vec::new(),
            excluded_conflicts: Vec::new(),
            boundary,
            drift,
            decision,
        }
    }

    #[test]
    fn records_valid_entries_in_sequence() {
        let recorder = IncidentRecorder::new(Arc::new(InMemoryIncidentLog::new()));
        assert_eq!(recorder.record(entry()).expect("record"), 1);
        assert_eq!(recorder.record(entry()).expect("record"), 2);
        assert_eq!(recorder.incidents().expect("read").len(), 2);
        assert!(matches!(
            recorder.incident(3),
            Err(GuardError::UnknownIncident(3))
        ));
    }

    #[test]
    fn refuses_inconsistent_entries() {
        let recorder = IncidentRecorder::new(Arc::new(InMemoryIncidentLog::new()));

        let mut blank_version = entry();
        blank_version.policy_version = " ".to_string();
        let mut drifted_inputs = entry();
        drifted_inputs.drift.status = DriftStatus::Drifting;
        let mut silent_block = entry();
        silent_block.decision.outcome = sentinel_rs_protocol::PolicyOutcome::Block;
        let mut injected_past_rejection = entry();
        injected_past_rejection.boundary = BoundaryResult::rejected(
            sentinel_rs_protocol::BoundaryReason::ScopeMismatch,
            "no registration",
        );
        injected_past_rejection.decision.inputs.boundary_result =
            injected_past_rejection.boundary.clone();
        injected_past_rejection.injected_memory_ids = vec![Uuid::new_v4()];

        for bad in [blank_version, drifted_inputs, silent_block, injected_past_rejection] {
            assert!(matches!(
                recorder.record(bad),
                Err(GuardError::InvalidIncident(_))
            ));
        }
        assert!(recorder.incidents().expect("read").is_empty());
    }

    #[test]
    fn write_failure_fails_closed() {
        let recorder = IncidentRecorder::new(Arc::new(FailingIncidentLog));
        let err = recorder.record(entry()).unwrap_err();
        assert!(err.is_fail_closed());
    }
}
