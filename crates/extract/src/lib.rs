//! Entity extraction stage: run a NER model over document text and key the
//! results for the client.

pub mod llm;
pub mod normalizer;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod prompt;
pub mod recognizer;
pub mod schema;

pub use llm::OllamaClient;
pub use normalizer::SpanNormalizer;
#[cfg(feature = "onnx")]
pub use onnx::OnnxRecognizer;
pub use recognizer::{EntityRecognizer, OllamaRecognizer};
pub use schema::{EntityRecord, EntitySpan, Extraction};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::sync::Arc;

/// Lower bound of the placeholder confidence score.
pub const MIN_CONFIDENCE: f32 = 0.7;

/// Deterministic placeholder score in `[0.7, 1.0)` derived from the surface
/// text. It is not a model probability.
pub fn confidence_score(text: &str) -> f32 {
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(prefix) % 3000;
    (0.7 + bucket as f64 / 10000.0) as f32
}

impl Extraction {
    /// Key spans in order: `<LABEL>_<n>` where `n` counts entities already
    /// keyed, so repeated labels never collide.
    pub fn from_spans(spans: impl IntoIterator<Item = EntitySpan>) -> Self {
        let mut extraction = Self::default();
        for span in spans {
            let key = format!("{}_{}", span.label, extraction.entities.len());
            extraction
                .confidence_scores
                .insert(key.clone(), confidence_score(&span.text));
            extraction.entities.insert(
                key,
                EntityRecord {
                    text: span.text,
                    label: span.label,
                },
            );
        }
        extraction
    }
}

/// Holds the process-wide model handle; cheap to clone.
#[derive(Clone)]
pub struct Extractor {
    recognizer: Arc<dyn EntityRecognizer>,
}

impl Extractor {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn backend(&self) -> &str {
        self.recognizer.name()
    }

    /// Extract entities and their confidence scores. Non-string input is
    /// recognized through its `Display` form.
    pub async fn extract<T: Display + ?Sized>(&self, input: &T) -> Result<Extraction> {
        let text = input.to_string();
        let spans = self
            .recognizer
            .recognize(&text)
            .await
            .context("Entity recognition failed")?;

        Ok(Extraction::from_spans(spans))
    }
}
