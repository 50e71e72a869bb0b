use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by record stores and incident logs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A committed line could not be decoded.
    #[error("corrupt line {line} in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// A record was rejected before being written.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
