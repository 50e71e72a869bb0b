//! Guard pipeline for LLM endpoints.
//!
//! A request passes the context boundary, receives a conflict-free memory
//! selection, has its response compared against the previous response for
//! the same intent, and is gated by an ordered rule table. Every decision is
//! committed to the incident log and can be replayed from it.

pub mod boundary;
pub mod drift;
pub mod error;
pub mod guard;
pub mod memory;
pub mod observability;
pub mod policy;
pub mod replay;

pub use boundary::{BoundaryManager, ContextMismatch, ScopeRegistry, check_compatible};
pub use drift::{DriftDetector, DriftThresholds};
pub use error::GuardError;
pub use guard::{Guard, GuardBuilder, GuardRun, GuardVerdict, open_stores};
pub use memory::{AllowedTypes, MemoryController};
pub use observability::IncidentRecorder;
pub use policy::{PolicyGate, PolicyRule};
pub use replay::{AuditReport, ReplayEngine, ReplayVerdict};
