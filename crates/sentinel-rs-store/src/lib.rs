//! Durable storage for Sentinel: memory records, scope registrations,
//! response history and the append-only incident log.

mod error;
mod incidents;
mod jsonl;
mod records;

pub use error::StoreError;
pub use incidents::{FileIncidentLog, InMemoryIncidentLog, IncidentLog};
pub use records::{FileRecordStore, InMemoryRecordStore, RecordStore};
