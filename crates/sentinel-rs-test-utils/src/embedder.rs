use async_trait::async_trait;
use parking_lot::Mutex;
use sentinel_rs_protocol::{Embedder, EmbeddingError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Embedder returning fixed vectors per text. Unknown texts fail.
#[derive(Default)]
pub struct StubEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, text: &str, vector: Vec<f32>) -> Self {
        self.insert(text, vector);
        self
    }

    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().insert(text.to_string(), vector);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .lock()
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Request(format!("no stub vector for {text:?}")))
    }
}

/// Embedder that always fails.
pub struct FailingEmbedder {
    message: String,
}

impl FailingEmbedder {
    pub fn request(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Request(self.message.clone()))
    }
}

/// Embedder that sleeps before answering with a unit vector.
pub struct SlowEmbedder {
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0, 0.0])
    }
}
