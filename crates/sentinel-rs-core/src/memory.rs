//! Memory selection and conflict resolution.

use crate::GuardError;
use globset::{Glob, GlobMatcher};
use log::{debug, info, warn};
use sentinel_rs_config::MemoryConfig;
use sentinel_rs_protocol::{MemoryRecord, MemorySelection, MemoryType, NewMemory, RequestContext};
use sentinel_rs_store::RecordStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Memory types each scope may inject, compiled from config.
#[derive(Debug, Clone)]
pub struct AllowedTypes {
    default: Vec<MemoryType>,
    exact: HashMap<String, Vec<MemoryType>>,
    patterns: Vec<(GlobMatcher, Vec<MemoryType>)>,
}

impl AllowedTypes {
    /// Compile scope entries. Entries without glob metacharacters match
    /// exactly and take precedence; otherwise the first matching glob wins.
    pub fn from_config(config: &MemoryConfig) -> Result<Self, GuardError> {
        let mut exact = HashMap::new();
        let mut patterns = Vec::new();
        for entry in &config.scopes {
            if entry.pattern.contains(['*', '?', '[', '{']) {
                let matcher = Glob::new(&entry.pattern)
                    .map_err(|err| sentinel_rs_config::ConfigError::InvalidPattern {
                        pattern: entry.pattern.clone(),
                        message: err.to_string(),
                    })?
                    .compile_matcher();
                patterns.push((matcher, entry.allowed_types.clone()));
            } else {
                exact
                    .entry(entry.pattern.clone())
                    .or_insert_with(|| entry.allowed_types.clone());
            }
        }
        Ok(Self {
            default: config.default_allowed_types.clone(),
            exact,
            patterns,
        })
    }

    pub fn for_scope(&self, scope: &str) -> &[MemoryType] {
        if let Some(types) = self.exact.get(scope) {
            return types;
        }
        self.patterns
            .iter()
            .find(|(matcher, _)| matcher.is_match(scope))
            .map(|(_, types)| types.as_slice())
            .unwrap_or(&self.default)
    }
}

impl Default for AllowedTypes {
    fn default() -> Self {
        Self {
            default: MemoryType::ALL.to_vec(),
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }
}

/// Select the injectable records for a scope and intent.
///
/// Records outside the scope, of a type not in `allowed_types`, or tied to a
/// different intent are dropped. Any conflict key whose surviving records
/// disagree on content is withheld entirely. The rest is ordered by
/// `(created_at, id)`.
pub fn select_records(
    records: impl IntoIterator<Item = MemoryRecord>,
    scope: &str,
    intent: &str,
    allowed_types: &[MemoryType],
) -> MemorySelection {
    let mut groups: BTreeMap<String, Vec<MemoryRecord>> = BTreeMap::new();
    for record in records {
        let eligible = record.scope == scope
            && allowed_types.contains(&record.memory_type)
            && record.intent.as_deref().is_none_or(|own| own == intent);
        if eligible {
            groups
                .entry(record.conflict_key.clone())
                .or_default()
                .push(record);
        }
    }

    let mut selected = Vec::new();
    let mut excluded_conflicts = Vec::new();
    for (key, group) in groups {
        let contents: BTreeSet<&str> = group.iter().map(|r| r.content.as_str()).collect();
        if contents.len() > 1 {
            excluded_conflicts.push(key);
        } else {
            selected.extend(group);
        }
    }
    selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    MemorySelection {
        records: selected,
        excluded_conflicts,
    }
}

/// Store-backed memory control.
#[derive(Clone)]
pub struct MemoryController {
    store: Arc<dyn RecordStore>,
    allowed: AllowedTypes,
}

impl MemoryController {
    pub fn new(store: Arc<dyn RecordStore>, allowed: AllowedTypes) -> Self {
        Self { store, allowed }
    }

    /// Explicitly persist a memory record.
    pub fn store(&self, memory: NewMemory) -> Result<MemoryRecord, GuardError> {
        let record = self.store.store_memory(memory)?;
        info!(
            "memory stored (scope={}, type={}, conflict_key={}, id={})",
            record.scope, record.memory_type, record.conflict_key, record.id
        );
        Ok(record)
    }

    /// Types configured for a scope.
    pub fn allowed_types(&self, scope: &str) -> &[MemoryType] {
        self.allowed.for_scope(scope)
    }

    /// Select injectable memory with explicit type allowances.
    pub fn select(
        &self,
        scope: &str,
        intent: &str,
        allowed_types: &[MemoryType],
    ) -> Result<MemorySelection, GuardError> {
        let records = self.store.memories(scope)?;
        let candidates = records.len();
        let selection = select_records(records, scope, intent, allowed_types);
        if !selection.excluded_conflicts.is_empty() {
            warn!(
                "memory conflicts withheld (scope={}, intent={}, keys={:?})",
                scope, intent, selection.excluded_conflicts
            );
        }
        debug!(
            "memory selected (scope={}, intent={}, candidates={}, selected={})",
            scope,
            intent,
            candidates,
            selection.records.len()
        );
        Ok(selection)
    }

    /// Select injectable memory using the types configured for the scope.
    pub fn select_for(&self, ctx: &RequestContext) -> Result<MemorySelection, GuardError> {
        self.select(&ctx.scope, &ctx.intent, self.allowed_types(&ctx.scope))
    }
}
