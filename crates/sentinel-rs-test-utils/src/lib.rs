//! Test helpers shared across Sentinel crates.

pub mod completion;
pub mod embedder;
pub mod fixtures;
pub mod store;

pub use completion::{FailingCompletion, FixedCompletion};
pub use embedder::{FailingEmbedder, SlowEmbedder, StubEmbedder};
pub use fixtures::{context, registered_config};
pub use store::{FailingHistoryStore, FailingIncidentLog};
