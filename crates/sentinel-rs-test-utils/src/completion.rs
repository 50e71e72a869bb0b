use async_trait::async_trait;
use parking_lot::Mutex;
use sentinel_rs_protocol::{Completion, CompletionError, CompletionResponse, MemoryRecord};

/// Completion returning queued responses in order, repeating the last one.
/// Records every prompt and the memory it was given.
pub struct FixedCompletion {
    responses: Mutex<Vec<CompletionResponse>>,
    calls: Mutex<Vec<(String, Vec<MemoryRecord>)>>,
}

impl FixedCompletion {
    pub fn new(response_id: &str, text: &str) -> Self {
        Self::sequence(&[(response_id, text)])
    }

    pub fn sequence(responses: &[(&str, &str)]) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .iter()
                    .rev()
                    .map(|(response_id, text)| CompletionResponse {
                        response_id: response_id.to_string(),
                        text: text.to_string(),
                    })
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<MemoryRecord>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Completion for FixedCompletion {
    async fn complete(
        &self,
        prompt: &str,
        memories: &[MemoryRecord],
    ) -> Result<CompletionResponse, CompletionError> {
        self.calls
            .lock()
            .push((prompt.to_string(), memories.to_vec()));
        let mut responses = self.responses.lock();
        let response = if responses.len() > 1 {
            responses.pop()
        } else {
            responses.first().cloned()
        };
        response.ok_or_else(|| CompletionError::InvalidResponse("no response queued".to_string()))
    }
}

/// Completion that always fails.
pub struct FailingCompletion;

#[async_trait]
impl Completion for FailingCompletion {
    async fn complete(
        &self,
        _prompt: &str,
        _memories: &[MemoryRecord],
    ) -> Result<CompletionResponse, CompletionError> {
        Err(CompletionError::Request("completion backend offline".to_string()))
    }
}
