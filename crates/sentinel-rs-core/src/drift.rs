//! Response drift measurement.

use futures_util::future;
use log::{debug, warn};
use regex::Regex;
use sentinel_rs_config::DriftConfig;
use sentinel_rs_protocol::{
    DriftMeasurement, DriftStatus, Embedder, EmbeddingError, ResponseSample,
};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Reason recorded when there is no earlier response to compare against.
pub const NO_BASELINE: &str = "no_baseline";
/// Reason recorded when the boundary rejected the request before measuring.
pub const NOT_MEASURED: &str = "boundary_rejected";

static TOKEN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").ok());

/// Static drift thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftThresholds {
    /// Similarity strictly below this is drift.
    pub similarity: f64,
    /// Structural difference strictly above this is drift.
    pub structural: f64,
}

impl DriftThresholds {
    pub fn from_config(config: &DriftConfig) -> Self {
        Self {
            similarity: config.similarity_threshold,
            structural: config.structural_threshold,
        }
    }

    /// Classify a measured pair of metrics.
    pub fn classify(&self, similarity: f64, structural: f64) -> DriftStatus {
        if similarity < self.similarity || structural > self.structural {
            DriftStatus::Drifting
        } else {
            DriftStatus::Stable
        }
    }

    /// Status implied by a stored measurement's metrics. A measurement
    /// missing either metric is `unknown`.
    pub fn status_of(&self, measurement: &DriftMeasurement) -> DriftStatus {
        match (
            measurement.embedding_similarity,
            measurement.structural_diff_score,
        ) {
            (Some(similarity), Some(structural)) => self.classify(similarity, structural),
            _ => DriftStatus::Unknown,
        }
    }
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self::from_config(&DriftConfig::default())
    }
}

/// Compares a response against the previous response for the same intent.
#[derive(Clone)]
pub struct DriftDetector {
    embedder: Arc<dyn Embedder>,
    thresholds: DriftThresholds,
    timeout: Option<Duration>,
}

impl DriftDetector {
    pub fn new(embedder: Arc<dyn Embedder>, thresholds: DriftThresholds) -> Self {
        Self {
            embedder,
            thresholds,
            timeout: None,
        }
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &DriftConfig) -> Self {
        let mut detector = Self::new(embedder, DriftThresholds::from_config(config));
        detector.timeout = config.embedding_timeout_ms.map(Duration::from_millis);
        detector
    }

    /// Bound each embedding call; expiry makes the measurement `unknown`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn thresholds(&self) -> DriftThresholds {
        self.thresholds
    }

    /// Measure drift between two responses to `intent`.
    ///
    /// Never fails: an embedding error, timeout or unusable vector yields an
    /// `unknown` measurement with both similarity metrics unset.
    pub async fn measure(
        &self,
        intent: &str,
        previous: Option<&ResponseSample>,
        current: &ResponseSample,
    ) -> DriftMeasurement {
        let Some(previous) = previous else {
            debug!("no baseline response (intent={intent})");
            return unmeasured(intent, None, current, 0.0, NO_BASELINE);
        };
        let length_delta = length_delta_ratio(&previous.text, &current.text);

        if previous.text == current.text {
            return DriftMeasurement {
                intent: intent.to_string(),
                previous_response_id: Some(previous.response_id.clone()),
                current_response_id: current.response_id.clone(),
                embedding_similarity: Some(1.0),
                length_delta_ratio: 0.0,
                structural_diff_score: Some(0.0),
                status: DriftStatus::Stable,
                unmeasurable_reason: None,
            };
        }

        let (left, right) =
            future::join(self.embed(&previous.text), self.embed(&current.text)).await;
        let similarity = match (left, right) {
            (Ok(left), Ok(right)) => cosine_similarity(&left, &right).ok_or_else(|| {
                format!(
                    "unusable embeddings (dimensions {} and {})",
                    left.len(),
                    right.len()
                )
            }),
            (Err(err), _) | (_, Err(err)) => Err(err.to_string()),
        };
        let similarity = match similarity {
            Ok(similarity) => similarity,
            Err(reason) => {
                warn!("drift unmeasurable (intent={intent}, reason={reason})");
                return unmeasured(intent, Some(previous), current, length_delta, &reason);
            }
        };

        let structural = structural_diff_score(&previous.text, &current.text);
        let status = self.thresholds.classify(similarity, structural);
        debug!(
            "drift measured (intent={}, similarity={:.4}, structural={:.4}, length_delta={:.4}, status={})",
            intent, similarity, structural, length_delta, status
        );
        DriftMeasurement {
            intent: intent.to_string(),
            previous_response_id: Some(previous.response_id.clone()),
            current_response_id: current.response_id.clone(),
            embedding_similarity: Some(similarity),
            length_delta_ratio: length_delta,
            structural_diff_score: Some(structural),
            status,
            unmeasurable_reason: None,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.embedder.embed(text))
                .await
                .unwrap_or_else(|_| Err(EmbeddingError::Timeout(limit.as_millis() as u64))),
            None => self.embedder.embed(text).await,
        }
    }
}

/// Measurement for a response that was not compared.
pub(crate) fn unmeasured(
    intent: &str,
    previous: Option<&ResponseSample>,
    current: &ResponseSample,
    length_delta_ratio: f64,
    reason: &str,
) -> DriftMeasurement {
    DriftMeasurement {
        intent: intent.to_string(),
        previous_response_id: previous.map(|sample| sample.response_id.clone()),
        current_response_id: current.response_id.clone(),
        embedding_similarity: None,
        length_delta_ratio,
        structural_diff_score: None,
        status: DriftStatus::Unknown,
        unmeasurable_reason: Some(reason.to_string()),
    }
}

/// Cosine similarity clamped to `[-1, 1]`.
///
/// `None` for empty or mismatched dimensions, zero vectors and non-finite
/// components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if !dot.is_finite() || !norm_a.is_finite() || !norm_b.is_finite() {
        return None;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// `|len(a) - len(b)| / max(len(a), len(b))` over characters.
pub fn length_delta_ratio(a: &str, b: &str) -> f64 {
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let longest = len_a.max(len_b);
    if longest == 0 {
        return 0.0;
    }
    len_a.abs_diff(len_b) as f64 / longest as f64
}

/// Token-level Levenshtein distance divided by the longer token count.
pub fn structural_diff_score(a: &str, b: &str) -> f64 {
    let left = tokenize(a);
    let right = tokenize(b);
    let longest = left.len().max(right.len());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(&left, &right) as f64 / longest as f64
}

/// Word runs and single punctuation marks.
fn tokenize(text: &str) -> Vec<&str> {
    match TOKEN_PATTERN.as_ref() {
        Some(pattern) => pattern.find_iter(text).map(|m| m.as_str()).collect(),
        None => text.split_whitespace().collect(),
    }
}

fn levenshtein(a: &[&str], b: &[&str]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, left) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, right) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(left != right);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
