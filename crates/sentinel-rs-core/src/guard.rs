//! The guarded request pipeline.

use crate::drift::{self, NOT_MEASURED};
use crate::{
    AllowedTypes, BoundaryManager, DriftDetector, DriftThresholds, GuardError, IncidentRecorder,
    MemoryController, PolicyGate, ReplayEngine,
};
use chrono::Utc;
use log::{info, warn};
use sentinel_rs_config::{SentinelConfig, StoreConfig, StoreProvider};
use sentinel_rs_protocol::{
    BoundaryResult, Completion, DriftMeasurement, DriftStatus, Embedder, IncidentLogEntry,
    MemoryRecord, MemorySelection, PolicyDecision, PolicyOutcome, RequestContext, ResponseRecord,
    ResponseSample, SequenceNumber,
};
use sentinel_rs_store::{
    FileIncidentLog, FileRecordStore, InMemoryIncidentLog, InMemoryRecordStore, IncidentLog,
    RecordStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Store root used by the file provider when no path is configured.
const DEFAULT_STORE_DIR: &str = ".sentinel/store";
const INCIDENT_LOG_FILE: &str = "incidents.jsonl";

/// Open the record store and incident log described by config.
pub fn open_stores(
    config: &StoreConfig,
) -> Result<(Arc<dyn RecordStore>, Arc<dyn IncidentLog>), GuardError> {
    match config.provider {
        StoreProvider::Memory => Ok((
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryIncidentLog::new()),
        )),
        StoreProvider::File => {
            let root = config
                .path
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
            let records = FileRecordStore::new(&root)?;
            let incidents = FileIncidentLog::open(root.join(INCIDENT_LOG_FILE))?;
            Ok((Arc::new(records), Arc::new(incidents)))
        }
    }
}

/// A committed decision and the memory injected for it.
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    pub sequence: SequenceNumber,
    pub entry: IncidentLogEntry,
    /// Injected records in selection order.
    pub memories: Vec<MemoryRecord>,
    /// Outcome for the response itself. Differs from the decision outcome
    /// when the only blocking match is a memory conflict.
    pub release: PolicyOutcome,
}

impl GuardVerdict {
    pub fn decision(&self) -> &PolicyDecision {
        &self.entry.decision
    }

    /// Whether the response may be returned to the caller.
    pub fn is_allowed(&self) -> bool {
        self.release == PolicyOutcome::Allow
    }
}

/// Result of [`Guard::run`].
#[derive(Debug, Clone)]
pub struct GuardRun {
    pub verdict: GuardVerdict,
    /// Completion text, present only when the release outcome is `allow`.
    pub output: Option<String>,
}

/// Builder wiring the guard's collaborators.
pub struct GuardBuilder {
    config: SentinelConfig,
    embedder: Arc<dyn Embedder>,
    completion: Option<Arc<dyn Completion>>,
    records: Option<Arc<dyn RecordStore>>,
    incidents: Option<Arc<dyn IncidentLog>>,
}

impl GuardBuilder {
    pub fn new(config: SentinelConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            completion: None,
            records: None,
            incidents: None,
        }
    }

    pub fn completion(mut self, completion: Arc<dyn Completion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Use these stores instead of the ones described by `config.store`.
    pub fn stores(mut self, records: Arc<dyn RecordStore>, incidents: Arc<dyn IncidentLog>) -> Self {
        self.records = Some(records);
        self.incidents = Some(incidents);
        self
    }

    /// Validate config, open stores and apply seed registrations.
    pub fn build(self) -> Result<Guard, GuardError> {
        self.config.validate()?;
        let (records, incidents) = match (self.records, self.incidents) {
            (Some(records), Some(incidents)) => (records, incidents),
            _ => open_stores(&self.config.store)?,
        };
        let boundary = BoundaryManager::new(records.clone());
        let seeded = boundary.seed(&self.config.boundary.registrations)?;
        let guard = Guard {
            boundary,
            memory: MemoryController::new(
                records.clone(),
                AllowedTypes::from_config(&self.config.memory)?,
            ),
            drift: DriftDetector::from_config(self.embedder, &self.config.drift),
            gate: PolicyGate::new(&self.config.policy)?,
            recorder: IncidentRecorder::new(incidents),
            records,
            completion: self.completion,
        };
        info!(
            "guard ready (policy_version={}, seeded_registrations={})",
            guard.gate.version(),
            seeded
        );
        Ok(guard)
    }
}

/// Runs requests through boundary, memory, drift, policy and audit.
pub struct Guard {
    boundary: BoundaryManager,
    memory: MemoryController,
    drift: DriftDetector,
    gate: PolicyGate,
    recorder: IncidentRecorder,
    records: Arc<dyn RecordStore>,
    completion: Option<Arc<dyn Completion>>,
}

impl Guard {
    pub fn builder(config: SentinelConfig, embedder: Arc<dyn Embedder>) -> GuardBuilder {
        GuardBuilder::new(config, embedder)
    }

    pub fn boundary(&self) -> &BoundaryManager {
        &self.boundary
    }

    pub fn memory(&self) -> &MemoryController {
        &self.memory
    }

    pub fn gate(&self) -> &PolicyGate {
        &self.gate
    }

    pub fn recorder(&self) -> &IncidentRecorder {
        &self.recorder
    }

    /// Replay engine bound to this guard's policy, thresholds and log.
    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(
            self.gate.clone(),
            self.drift.thresholds(),
            self.recorder.clone(),
        )
    }

    pub fn thresholds(&self) -> DriftThresholds {
        self.drift.thresholds()
    }

    /// Evaluate a response produced outside the guard.
    ///
    /// The incident is committed before this returns. If it cannot be
    /// committed the call fails with [`GuardError::AuditWriteFailed`].
    pub async fn evaluate(
        &self,
        ctx: RequestContext,
        current: ResponseSample,
    ) -> Result<GuardVerdict, GuardError> {
        let boundary = self.boundary.evaluate(&ctx)?;
        let selection = if boundary.accepted {
            self.memory.select_for(&ctx)?
        } else {
            MemorySelection::default()
        };
        self.conclude(ctx, boundary, selection, current).await
    }

    /// Complete `prompt` with the selected memory, then evaluate the result.
    ///
    /// The completion backend is not called for a rejected context. The
    /// output is released only when [`GuardVerdict::is_allowed`] holds; a
    /// memory conflict alone withholds the conflicted records, not the
    /// response.
    pub async fn run(&self, ctx: RequestContext, prompt: &str) -> Result<GuardRun, GuardError> {
        let completion = self
            .completion
            .as_ref()
            .ok_or(GuardError::MissingCompletion)?;
        let boundary = self.boundary.evaluate(&ctx)?;
        if !boundary.accepted {
            let verdict = self
                .conclude(
                    ctx,
                    boundary,
                    MemorySelection::default(),
                    ResponseSample::new("", ""),
                )
                .await?;
            return Ok(GuardRun {
                verdict,
                output: None,
            });
        }

        let selection = self.memory.select_for(&ctx)?;
        let response = completion
            .complete(prompt, &selection.records)
            .await
            .inspect_err(|err| warn!("completion failed (scope={}): {}", ctx.scope, err))?;
        let verdict = self
            .conclude(
                ctx,
                boundary,
                selection,
                ResponseSample::new(response.response_id, response.text.clone()),
            )
            .await?;
        let output = verdict.is_allowed().then_some(response.text);
        Ok(GuardRun { verdict, output })
    }

    async fn conclude(
        &self,
        ctx: RequestContext,
        boundary: BoundaryResult,
        selection: MemorySelection,
        current: ResponseSample,
    ) -> Result<GuardVerdict, GuardError> {
        let drift = if boundary.accepted {
            let previous = self
                .records
                .last_response(&ctx.scope, &ctx.intent)?
                .map(|record| record.sample());
            self.drift
                .measure(&ctx.intent, previous.as_ref(), &current)
                .await
        } else {
            drift::unmeasured(&ctx.intent, None, &current, 0.0, NOT_MEASURED)
        };

        let decision = self
            .gate
            .decide(&boundary, &selection.excluded_conflicts, &drift);
        let entry = IncidentLogEntry {
            incident_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            policy_version: self.gate.version().to_string(),
            injected_memory_ids: selection.injected_ids(),
            excluded_conflicts: selection.excluded_conflicts,
            context: ctx,
            boundary,
            drift,
            decision,
        };
        let sequence = self.recorder.record(entry.clone())?;
        let release = self.gate.release_outcome(&entry.decision);

        if entry.boundary.accepted && becomes_baseline(&entry.drift) {
            let stored = self.records.record_response(ResponseRecord {
                scope: entry.context.scope.clone(),
                intent: entry.context.intent.clone(),
                response_id: current.response_id,
                text: current.text,
                recorded_at: entry.recorded_at,
            });
            // The decision is already committed; a lost baseline only
            // affects the next measurement.
            if let Err(err) = stored {
                warn!(
                    "response history write failed (sequence={}, scope={}, intent={}): {}",
                    sequence, entry.context.scope, entry.context.intent, err
                );
            }
        }
        Ok(GuardVerdict {
            sequence,
            entry,
            memories: selection.records,
            release,
        })
    }
}

/// A response replaces the drift baseline only when it was measured stable
/// against it, or when there was no baseline yet.
fn becomes_baseline(drift: &DriftMeasurement) -> bool {
    match drift.status {
        DriftStatus::Stable => true,
        DriftStatus::Drifting => false,
        DriftStatus::Unknown => drift.previous_response_id.is_none(),
    }
}
