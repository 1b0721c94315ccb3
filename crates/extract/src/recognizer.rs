use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::llm::OllamaClient;
use crate::normalizer::SpanNormalizer;
use crate::prompt::{self, MAX_SEGMENT_CHARS};
use crate::schema::EntitySpan;

/// A loaded NER model. Spans come back in the model's own order.
#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &str;

    async fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>>;
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawSpan>,
}

#[derive(Deserialize)]
struct RawSpan {
    text: String,
    #[serde(alias = "type")]
    label: String,
}

/// NER through an instruction-following model served by Ollama.
pub struct OllamaRecognizer {
    client: OllamaClient,
    normalizer: SpanNormalizer,
}

impl OllamaRecognizer {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            normalizer: SpanNormalizer::new(),
        }
    }

    /// Construct after confirming the model is available on the server.
    pub async fn load(client: OllamaClient) -> Result<Self> {
        let available = client.has_model().await?;
        ensure!(
            available,
            "Model {} is not available on {}",
            client.model(),
            client.base_url()
        );
        info!(model = client.model(), url = client.base_url(), "NER model ready");
        Ok(Self::new(client))
    }

    /// Turn one model response into cleaned spans for `segment`.
    pub fn parse_response(&self, segment: &str, response: &str) -> Result<Vec<EntitySpan>> {
        let raw: RawExtraction =
            serde_json::from_str(response).context("Failed to parse NER response")?;
        let spans = raw
            .entities
            .into_iter()
            .map(|span| EntitySpan::new(span.text, span.label));
        Ok(self.normalizer.clean(segment, spans))
    }
}

#[async_trait]
impl EntityRecognizer for OllamaRecognizer {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let mut spans = Vec::new();

        for (offset, segment) in prompt::segments(text, MAX_SEGMENT_CHARS) {
            if segment.trim().is_empty() {
                continue;
            }
            let response = self
                .client
                .generate(&prompt::build_ner_prompt(segment))
                .await
                .context("NER request failed")?;
            let found = self.parse_response(segment, &response)?;
            debug!(offset, spans = found.len(), "Recognized segment");
            spans.extend(found);
        }

        Ok(spans)
    }
}
