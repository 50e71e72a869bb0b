//! Interfaces for the external services the guard consumes.

use crate::MemoryRecord;
use async_trait::async_trait;

/// Errors returned by an embedding backend.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The backend request failed.
    #[error("embedding request failed: {0}")]
    Request(String),
    /// The request did not finish within the deadline.
    #[error("embedding timed out after {0}ms")]
    Timeout(u64),
    /// The backend answered with something that is not a usable vector.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Text embedding function. Implementations own any retry policy.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Errors returned by a completion backend.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The backend request failed.
    #[error("completion request failed: {0}")]
    Request(String),
    /// The backend answered without usable text.
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

/// Text produced by a completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    /// Backend-assigned response identifier.
    pub response_id: String,
    /// Generated text.
    pub text: String,
}

/// Completion function producing the response under guard.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Complete a prompt with the injected memory records as context.
    async fn complete(
        &self,
        prompt: &str,
        memories: &[MemoryRecord],
    ) -> Result<CompletionResponse, CompletionError>;
}
