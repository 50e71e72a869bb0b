use sentinel_rs_protocol::{
    Incident, LoggedIncident, MemoryRecord, NewMemory, ResponseRecord, ScopeRegistration,
    SequenceNumber,
};
use sentinel_rs_store::{InMemoryRecordStore, IncidentLog, RecordStore, StoreError};

/// Incident log whose writes always fail, as if the disk were gone.
pub struct FailingIncidentLog;

impl IncidentLog for FailingIncidentLog {
    fn append(&self, _incident: &Incident) -> Result<SequenceNumber, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk unavailable")))
    }

    fn read_all(&self) -> Result<Vec<LoggedIncident>, StoreError> {
        Ok(Vec::new())
    }
}

/// In-memory record store that refuses to persist response history.
#[derive(Default)]
pub struct FailingHistoryStore {
    inner: InMemoryRecordStore,
}

impl FailingHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for FailingHistoryStore {
    fn store_memory(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError> {
        self.inner.store_memory(memory)
    }

    fn memories(&self, scope: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        self.inner.memories(scope)
    }

    fn register_scope(&self, registration: ScopeRegistration) -> Result<(), StoreError> {
        self.inner.register_scope(registration)
    }

    fn scope_registrations(&self, user_id: &str) -> Result<Vec<ScopeRegistration>, StoreError> {
        self.inner.scope_registrations(user_id)
    }

    fn record_response(&self, _response: ResponseRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("history volume full")))
    }

    fn last_response(
        &self,
        scope: &str,
        intent: &str,
    ) -> Result<Option<ResponseRecord>, StoreError> {
        self.inner.last_response(scope, intent)
    }
}
