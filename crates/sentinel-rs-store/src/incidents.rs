//! Append-only incident log with global sequence numbers.

use crate::StoreError;
use crate::jsonl;
use log::{debug, info};
use parking_lot::Mutex;
use sentinel_rs_protocol::{Incident, LoggedIncident, SequenceNumber};
use std::path::{Path, PathBuf};

/// Durable, append-only log of incidents.
///
/// Sequence numbers start at 1 and increase by one per committed entry. An
/// entry is visible to readers only after it is fully written.
pub trait IncidentLog: Send + Sync {
    /// Commit an incident and return the sequence number it was assigned.
    fn append(&self, incident: &Incident) -> Result<SequenceNumber, StoreError>;

    /// Every committed incident in sequence order.
    fn read_all(&self) -> Result<Vec<LoggedIncident>, StoreError>;

    /// A single committed incident.
    fn read(&self, sequence: SequenceNumber) -> Result<Option<LoggedIncident>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|logged| logged.sequence == sequence))
    }
}

/// Process-local incident log.
#[derive(Debug, Default)]
pub struct InMemoryIncidentLog {
    entries: Mutex<Vec<LoggedIncident>>,
}

impl InMemoryIncidentLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncidentLog for InMemoryIncidentLog {
    fn append(&self, incident: &Incident) -> Result<SequenceNumber, StoreError> {
        let mut entries = self.entries.lock();
        let sequence = entries.len() as SequenceNumber + 1;
        entries.push(LoggedIncident {
            sequence,
            incident: incident.clone(),
        });
        Ok(sequence)
    }

    fn read_all(&self) -> Result<Vec<LoggedIncident>, StoreError> {
        Ok(self.entries.lock().clone())
    }
}

/// JSONL incident log; one `LoggedIncident` per line.
pub struct FileIncidentLog {
    path: PathBuf,
    /// Next sequence number to assign. Held for the whole write.
    next_sequence: Mutex<SequenceNumber>,
}

impl FileIncidentLog {
    /// Open an existing log or start a new one at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing: Vec<LoggedIncident> = jsonl::read_lines(&path)?;
        let next = existing.last().map(|logged| logged.sequence + 1).unwrap_or(1);
        info!(
            "opened incident log (path={}, entries={}, next_sequence={})",
            path.display(),
            existing.len(),
            next
        );
        Ok(Self {
            path,
            next_sequence: Mutex::new(next),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn last_sequence(&self) -> Result<Option<SequenceNumber>, StoreError> {
        let existing: Vec<LoggedIncident> = jsonl::read_lines(&self.path)?;
        Ok(existing.last().map(|logged| logged.sequence))
    }
}

impl IncidentLog for FileIncidentLog {
    fn append(&self, incident: &Incident) -> Result<SequenceNumber, StoreError> {
        let mut next = self.next_sequence.lock();
        let logged = LoggedIncident {
            sequence: *next,
            incident: incident.clone(),
        };
        if let Err(err) = jsonl::append_line(&self.path, &logged) {
            // The line may still be on disk if the rollback failed; never
            // hand out a sequence number that a reader can already see.
            if let Ok(Some(last)) = self.last_sequence() {
                *next = (*next).max(last + 1);
            }
            return Err(err);
        }
        *next += 1;
        debug!(
            "appended incident (sequence={}, incident_id={})",
            logged.sequence,
            incident.incident_id()
        );
        Ok(logged.sequence)
    }

    fn read_all(&self) -> Result<Vec<LoggedIncident>, StoreError> {
        jsonl::read_lines(&self.path)
    }
}
