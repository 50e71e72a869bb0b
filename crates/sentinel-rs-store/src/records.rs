//! Memory records, scope registrations and response history.

use crate::StoreError;
use crate::jsonl::{self, KeyedLocks};
use chrono::Utc;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use sentinel_rs_protocol::{MemoryRecord, NewMemory, ResponseRecord, ScopeRegistration};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Persistent store for everything the guard reads besides the incident log.
///
/// Writes within one scope are serialized; writes to different scopes may
/// interleave. Nothing is ever updated in place.
pub trait RecordStore: Send + Sync {
    /// Validate and persist a memory draft, assigning its id and timestamp.
    fn store_memory(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError>;

    /// All memory records of a scope, in write order.
    fn memories(&self, scope: &str) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Append a registration; it supersedes earlier ones for the same pair.
    fn register_scope(&self, registration: ScopeRegistration) -> Result<(), StoreError>;

    /// Latest registration per scope for a user, sorted by scope.
    fn scope_registrations(&self, user_id: &str) -> Result<Vec<ScopeRegistration>, StoreError>;

    /// Latest registration of a user on one scope.
    fn scope_registration(
        &self,
        user_id: &str,
        scope: &str,
    ) -> Result<Option<ScopeRegistration>, StoreError> {
        Ok(self
            .scope_registrations(user_id)?
            .into_iter()
            .find(|registration| registration.scope == scope))
    }

    /// Append a response to the history of its `(scope, intent)`.
    fn record_response(&self, response: ResponseRecord) -> Result<(), StoreError>;

    /// Most recent response recorded for a `(scope, intent)`.
    fn last_response(
        &self,
        scope: &str,
        intent: &str,
    ) -> Result<Option<ResponseRecord>, StoreError>;
}

fn build_record(memory: NewMemory) -> Result<MemoryRecord, StoreError> {
    require("scope", &memory.scope)?;
    require("conflict_key", &memory.conflict_key)?;
    require("content", &memory.content)?;
    if let Some(intent) = &memory.intent {
        require("intent", intent)?;
    }
    Ok(MemoryRecord {
        id: Uuid::new_v4(),
        memory_type: memory.memory_type,
        scope: memory.scope,
        intent: memory.intent,
        conflict_key: memory.conflict_key,
        content: memory.content,
        created_at: Utc::now(),
    })
}

fn check_registration(registration: &ScopeRegistration) -> Result<(), StoreError> {
    require("user_id", &registration.user_id)?;
    require("scope", &registration.scope)?;
    if registration.active && registration.sessions.iter().any(|s| s.trim().is_empty()) {
        return Err(StoreError::InvalidRecord(
            "registration sessions must not be blank".to_string(),
        ));
    }
    Ok(())
}

fn check_response(response: &ResponseRecord) -> Result<(), StoreError> {
    require("scope", &response.scope)?;
    require("intent", &response.intent)?;
    require("response_id", &response.response_id)
}

fn require(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::InvalidRecord(format!("{field} must not be empty")));
    }
    Ok(())
}

fn latest_per_scope(
    user_id: &str,
    registrations: impl IntoIterator<Item = ScopeRegistration>,
) -> Vec<ScopeRegistration> {
    let mut latest = BTreeMap::new();
    for registration in registrations {
        if registration.user_id == user_id {
            latest.insert(registration.scope.clone(), registration);
        }
    }
    latest.into_values().collect()
}

/// Process-local store, used for tests and the `memory` store provider.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    memories: RwLock<HashMap<String, Vec<MemoryRecord>>>,
    registrations: RwLock<Vec<ScopeRegistration>>,
    responses: RwLock<HashMap<(String, String), ResponseRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn store_memory(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError> {
        let record = build_record(memory)?;
        self.memories
            .write()
            .entry(record.scope.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn memories(&self, scope: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self.memories.read().get(scope).cloned().unwrap_or_default())
    }

    fn register_scope(&self, registration: ScopeRegistration) -> Result<(), StoreError> {
        check_registration(&registration)?;
        self.registrations.write().push(registration);
        Ok(())
    }

    fn scope_registrations(&self, user_id: &str) -> Result<Vec<ScopeRegistration>, StoreError> {
        Ok(latest_per_scope(user_id, self.registrations.read().iter().cloned()))
    }

    fn record_response(&self, response: ResponseRecord) -> Result<(), StoreError> {
        check_response(&response)?;
        let key = (response.scope.clone(), response.intent.clone());
        self.responses.write().insert(key, response);
        Ok(())
    }

    fn last_response(
        &self,
        scope: &str,
        intent: &str,
    ) -> Result<Option<ResponseRecord>, StoreError> {
        Ok(self
            .responses
            .read()
            .get(&(scope.to_string(), intent.to_string()))
            .cloned())
    }
}

/// JSONL-backed record store.
///
/// Layout under the root directory:
/// `memories/<scope>.jsonl`, `responses/<scope>.jsonl` and `scopes.jsonl`.
pub struct FileRecordStore {
    root: PathBuf,
    scope_locks: KeyedLocks,
    registration_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("memories"))?;
        fs::create_dir_all(root.join("responses"))?;
        info!("initialized file record store (root={})", root.display());
        Ok(Self {
            root,
            scope_locks: KeyedLocks::default(),
            registration_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn memory_path(&self, scope: &str) -> PathBuf {
        self.root
            .join("memories")
            .join(format!("{}.jsonl", jsonl::file_stem(scope)))
    }

    fn response_path(&self, scope: &str) -> PathBuf {
        self.root
            .join("responses")
            .join(format!("{}.jsonl", jsonl::file_stem(scope)))
    }

    fn registrations_path(&self) -> PathBuf {
        self.root.join("scopes.jsonl")
    }
}

impl RecordStore for FileRecordStore {
    fn store_memory(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError> {
        let record = build_record(memory)?;
        let lock = self.scope_locks.get(&record.scope);
        let _guard = lock.lock();
        jsonl::append_line(&self.memory_path(&record.scope), &record)?;
        debug!(
            "stored memory record (scope={}, type={}, conflict_key={}, id={})",
            record.scope, record.memory_type, record.conflict_key, record.id
        );
        Ok(record)
    }

    fn memories(&self, scope: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        if scope.trim().is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<MemoryRecord> = jsonl::read_lines(&self.memory_path(scope))?;
        // A record whose scope field disagrees with its file is never served.
        Ok(records
            .into_iter()
            .filter(|record| record.scope == scope)
            .collect())
    }

    fn register_scope(&self, registration: ScopeRegistration) -> Result<(), StoreError> {
        check_registration(&registration)?;
        let _guard = self.registration_lock.lock();
        jsonl::append_line(&self.registrations_path(), &registration)?;
        info!(
            "registered scope (user_id={}, scope={}, sessions={}, active={})",
            registration.user_id,
            registration.scope,
            registration.sessions.len(),
            registration.active
        );
        Ok(())
    }

    fn scope_registrations(&self, user_id: &str) -> Result<Vec<ScopeRegistration>, StoreError> {
        let all: Vec<ScopeRegistration> = jsonl::read_lines(&self.registrations_path())?;
        Ok(latest_per_scope(user_id, all))
    }

    fn record_response(&self, response: ResponseRecord) -> Result<(), StoreError> {
        check_response(&response)?;
        let lock = self.scope_locks.get(&response.scope);
        let _guard = lock.lock();
        jsonl::append_line(&self.response_path(&response.scope), &response)?;
        debug!(
            "recorded response (scope={}, intent={}, response_id={})",
            response.scope, response.intent, response.response_id
        );
        Ok(())
    }

    fn last_response(
        &self,
        scope: &str,
        intent: &str,
    ) -> Result<Option<ResponseRecord>, StoreError> {
        if scope.trim().is_empty() {
            return Ok(None);
        }
        let history: Vec<ResponseRecord> = jsonl::read_lines(&self.response_path(scope))?;
        Ok(history
            .into_iter()
            .rev()
            .find(|response| response.scope == scope && response.intent == intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sentinel_rs_protocol::MemoryType;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn response(scope: &str, intent: &str, id: &str) -> ResponseRecord {
        ResponseRecord {
            scope: scope.to_string(),
            intent: intent.to_string(),
            response_id: id.to_string(),
            text: format!("text for {id}"),
            recorded_at: Utc::now(),
        }
    }

    fn exercise(store: &dyn RecordStore) {
        let fact = store
            .store_memory(NewMemory::new(MemoryType::Fact, "billing", "plan", "pro"))
            .expect("store");
        store
            .store_memory(
                NewMemory::new(MemoryType::Preference, "billing", "tone", "formal")
                    .with_intent("refund"),
            )
            .expect("store");
        store
            .store_memory(NewMemory::new(MemoryType::Fact, "support", "plan", "free"))
            .expect("store");

        let billing = store.memories("billing").expect("memories");
        assert_eq!(billing.len(), 2);
        assert_eq!(billing[0], fact);
        assert_eq!(billing[1].intent.as_deref(), Some("refund"));
        assert!(store.memories("unknown").expect("memories").is_empty());

        store
            .register_scope(ScopeRegistration::active("u1", "billing", ["s1"]))
            .expect("register");
        store
            .register_scope(ScopeRegistration::active("u1", "support", ["s1"]))
            .expect("register");
        store
            .register_scope(ScopeRegistration::revoked("u1", "billing"))
            .expect("revoke");
        let latest = store.scope_registration("u1", "billing").expect("lookup");
        assert_eq!(latest.map(|r| r.active), Some(false));
        let scopes: Vec<_> = store
            .scope_registrations("u1")
            .expect("list")
            .into_iter()
            .map(|r| r.scope)
            .collect();
        assert_eq!(scopes, vec!["billing".to_string(), "support".to_string()]);
        assert_eq!(store.scope_registration("u2", "billing").expect("lookup"), None);

        store.record_response(response("billing", "refund", "r1")).expect("record");
        store.record_response(response("billing", "upgrade", "r2")).expect("record");
        store.record_response(response("billing", "refund", "r3")).expect("record");
        let last = store.last_response("billing", "refund").expect("last");
        assert_eq!(last.map(|r| r.response_id), Some("r3".to_string()));
        assert_eq!(store.last_response("support", "refund").expect("last"), None);
    }

    #[test]
    fn in_memory_store_behaviour() {
        exercise(&InMemoryRecordStore::new());
    }

    #[test]
    fn file_store_behaviour() {
        let temp = tempdir().expect("tempdir");
        exercise(&FileRecordStore::new(temp.path()).expect("store"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let stored = {
            let store = FileRecordStore::new(temp.path()).expect("store");
            store
                .store_memory(NewMemory::new(MemoryType::Decision, "ops/eu", "region", "eu-west"))
                .expect("store")
        };
        let reopened = FileRecordStore::new(temp.path()).expect("store");
        assert_eq!(reopened.memories("ops/eu").expect("memories"), vec![stored]);
        assert!(reopened.memories("ops").expect("memories").is_empty());
    }

    #[test]
    fn blank_fields_are_rejected() {
        let store = InMemoryRecordStore::new();
        let err = store
            .store_memory(NewMemory::new(MemoryType::Fact, "billing", " ", "x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(msg) if msg.contains("conflict_key")));
        let err = store
            .store_memory(NewMemory::new(MemoryType::Fact, "billing", "k", "x").with_intent(""))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store
            .register_scope(ScopeRegistration::active("", "billing", ["s1"]))
            .is_err());
        assert!(store.memories("billing").expect("memories").is_empty());
    }

    #[test]
    fn concurrent_writes_to_one_scope_are_all_kept() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(FileRecordStore::new(temp.path()).expect("store"));
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for n in 0..10 {
                        store
                            .store_memory(NewMemory::new(
                                MemoryType::Fact,
                                "shared",
                                format!("key-{idx}-{n}"),
                                "value",
                            ))
                            .expect("store");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(store.memories("shared").expect("memories").len(), 80);
    }
}
