//! Replay and audit of logged decisions.

use pretty_assertions::assert_eq;
use sentinel_rs_config::PolicyConfig;
use sentinel_rs_core::{Guard, GuardError, PolicyGate, ReplayEngine, ReplayVerdict};
use sentinel_rs_protocol::{
    Incident, MemoryType, NewMemory, PolicyOutcome, RequestContext, ResponseSample,
};
use sentinel_rs_test_utils::{StubEmbedder, context, registered_config};
use std::sync::Arc;

const BASELINE: &str = "Refunds are issued within five days.";
const REWORDED: &str = "Refunds may be issued after review by our finance team.";

/// Build a guard and push a mix of outcomes through it.
async fn populated_guard() -> (Guard, Arc<StubEmbedder>) {
    let embedder = Arc::new(
        StubEmbedder::new()
            .with(BASELINE, vec![1.0, 0.0])
            .with(REWORDED, vec![0.58, 0.814_656]),
    );
    let guard = Guard::builder(registered_config("billing"), embedder.clone())
        .build()
        .expect("guard");
    let ctx = context("billing", "explain_policy");
    let samples = [("r1", BASELINE), ("r2", BASELINE), ("r3", REWORDED)];
    for (id, text) in samples {
        guard
            .evaluate(ctx.clone(), ResponseSample::new(id, text))
            .await
            .expect("evaluate");
    }
    guard
        .evaluate(
            RequestContext::new("u2", "s1", "billing", "explain_policy"),
            ResponseSample::new("r4", BASELINE),
        )
        .await
        .expect("rejected");
    guard
        .memory()
        .store(NewMemory::new(MemoryType::Fact, "billing", "plan", "annual"))
        .expect("m1");
    guard
        .memory()
        .store(NewMemory::new(MemoryType::Fact, "billing", "plan", "monthly"))
        .expect("m2");
    guard
        .evaluate(ctx, ResponseSample::new("r5", REWORDED))
        .await
        .expect("conflict");
    (guard, embedder)
}

/// Every logged decision replays to the same outcome without the embedder.
#[tokio::test]
async fn audit_of_untouched_log_is_clean() {
    let (guard, embedder) = populated_guard().await;
    let calls_before = embedder.calls();
    let outcomes: Vec<_> = guard
        .recorder()
        .incidents()
        .expect("incidents")
        .iter()
        .filter_map(|logged| logged.incident.as_decision().map(|entry| entry.outcome()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            PolicyOutcome::FlagReview,
            PolicyOutcome::Allow,
            PolicyOutcome::FlagReview,
            PolicyOutcome::Block,
            PolicyOutcome::Block,
        ]
    );

    let report = guard.replay_engine().audit().expect("audit");
    assert!(report.is_clean());
    assert_eq!(report.replayed, 5);
    assert_eq!(report.matched, 5);
    assert_eq!(embedder.calls(), calls_before);
    assert_eq!(guard.recorder().incidents().expect("incidents").len(), 5);
}

/// Replay reuses the logged decision id and reproduces reasons.
#[tokio::test]
async fn replay_reproduces_logged_decision() {
    let (guard, _) = populated_guard().await;
    let engine = guard.replay_engine();
    for logged in guard.recorder().incidents().expect("incidents") {
        let entry = logged.incident.as_decision().expect("decision");
        assert_eq!(engine.replay(entry), entry.decision);
    }
}

/// A corrupted entry produces a first-class mismatch incident.
#[tokio::test]
async fn corrupted_entry_is_reported_as_mismatch() {
    let (guard, _) = populated_guard().await;
    let mut forged = guard
        .recorder()
        .incident(3)
        .expect("incident")
        .incident
        .as_decision()
        .cloned()
        .expect("decision");
    forged.incident_id = uuid::Uuid::new_v4();
    forged.decision.outcome = PolicyOutcome::Allow;
    let forged_sequence = guard.recorder().record(forged).expect("record forged");

    let report = guard.replay_engine().audit().expect("audit");
    assert_eq!(report.replayed, 6);
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.source_sequence, forged_sequence);
    assert_eq!(mismatch.logged_outcome, PolicyOutcome::Allow);
    assert_eq!(mismatch.replayed_outcome, PolicyOutcome::FlagReview);

    let incidents = guard.recorder().incidents().expect("incidents");
    let last = incidents.last().expect("last");
    assert_eq!(last.sequence, forged_sequence + 1);
    assert!(matches!(last.incident, Incident::ReplayMismatch(_)));

    let again = guard.replay_engine().audit().expect("second audit");
    assert_eq!(again.skipped, 1);
    assert_eq!(again.mismatches.len(), 1);
}

/// Changing the active policy surfaces divergence from the logged version.
#[tokio::test]
async fn policy_change_is_detected() {
    let (guard, _) = populated_guard().await;
    let mut config = PolicyConfig::with_drift_outcomes(PolicyOutcome::Block, PolicyOutcome::FlagReview);
    config.version = "v2".to_string();
    let engine = ReplayEngine::new(
        PolicyGate::new(&config).expect("gate"),
        guard.thresholds(),
        guard.recorder().clone(),
    );
    match engine.verify_sequence(3).expect("verify") {
        ReplayVerdict::Mismatch { mismatch, sequence } => {
            assert_eq!(sequence, 6);
            assert_eq!(mismatch.logged_policy_version, "v1");
            assert_eq!(mismatch.active_policy_version, "v2");
            assert_eq!(mismatch.replayed_outcome, PolicyOutcome::Block);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert!(engine.verify_sequence(1).expect("verify").is_match());
}

/// Only decision incidents can be replayed.
#[tokio::test]
async fn verify_sequence_rejects_unknown_and_mismatch_entries() {
    let (guard, _) = populated_guard().await;
    let engine = guard.replay_engine();
    assert!(matches!(
        engine.verify_sequence(99),
        Err(GuardError::UnknownIncident(99))
    ));

    let strict = ReplayEngine::new(
        PolicyGate::new(&PolicyConfig::with_drift_outcomes(
            PolicyOutcome::Block,
            PolicyOutcome::FlagReview,
        ))
        .expect("gate"),
        guard.thresholds(),
        guard.recorder().clone(),
    );
    let ReplayVerdict::Mismatch { sequence, .. } = strict.verify_sequence(3).expect("verify") else {
        panic!("expected mismatch");
    };
    assert!(matches!(
        engine.verify_sequence(sequence),
        Err(GuardError::InvalidIncident(_))
    ));
}
