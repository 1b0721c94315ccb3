//! Token-classification NER on ONNX Runtime.
//!
//! The model directory must contain `model.onnx`, `tokenizer.json` and the
//! Hugging Face `config.json` carrying `id2label` (BIO tags such as `B-PER`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::info;

use crate::normalizer::SpanNormalizer;
use crate::prompt;
use crate::recognizer::EntityRecognizer;
use crate::schema::EntitySpan;

/// Characters per inference call; keeps sequences under the 512-token limit.
const SEGMENT_CHARS: usize = 1200;
const MAX_TOKENS: usize = 512;

#[derive(Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
}

struct Inner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    uses_token_types: bool,
    normalizer: SpanNormalizer,
}

pub struct OnnxRecognizer {
    inner: Arc<Inner>,
}

impl OnnxRecognizer {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let config_path = model_dir.join("config.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(tokenizer_path.exists(), "tokenizer.json not found in {model_dir:?}");

        let config: ModelConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path)
                .with_context(|| format!("read {}", config_path.display()))?,
        )
        .context("parse id2label from config.json")?;
        let labels = label_table(&config.id2label)?;

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let uses_token_types = session
            .inputs()
            .iter()
            .any(|input| input.name() == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;

        info!(labels = labels.len(), model = %model_path.display(), "loaded NER model");
        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                labels,
                uses_token_types,
                normalizer: SpanNormalizer::new(),
            }),
        })
    }
}

#[async_trait]
impl EntityRecognizer for OnnxRecognizer {
    fn name(&self) -> &str {
        "onnx"
    }

    async fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || inner.recognize(&text))
            .await
            .context("NER task panicked")?
    }
}

impl Inner {
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let mut spans = Vec::new();
        for (_, segment) in prompt::segments(text, SEGMENT_CHARS) {
            if !segment.trim().is_empty() {
                spans.extend(self.recognize_segment(segment)?);
            }
        }
        Ok(spans)
    }

    fn recognize_segment(&self, segment: &str) -> Result<Vec<EntitySpan>> {
        let encoding = self
            .tokenizer
            .encode(segment, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let seq_len = encoding.get_ids().len();
        let shape = [1_i64, seq_len as i64];
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();

        let ids_tensor = Tensor::from_array((shape, ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape, mask.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("NER session lock poisoned"))?;

        let outputs = if self.uses_token_types {
            let types: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
            let type_tensor = Tensor::from_array((shape, types.into_boxed_slice()))?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_tensor,
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
            ])?
        };

        // Logits: [1, seq_len, num_labels].
        let (output_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[1] as usize == seq_len && dims[2] as usize == self.labels.len(),
            "unexpected output shape: {dims:?}"
        );

        let num_labels = self.labels.len();
        let tags: Vec<&str> = (0..seq_len)
            .map(|t| {
                let row = &logits[t * num_labels..(t + 1) * num_labels];
                let best = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                self.labels[best].as_str()
            })
            .collect();

        let tokens: Vec<TokenTag<'_>> = tags
            .iter()
            .zip(encoding.get_offsets())
            .zip(encoding.get_word_ids())
            .map(|((tag, &offsets), &word)| TokenTag { tag, offsets, word })
            .collect();

        Ok(decode_bio(segment, &tokens)
            .into_iter()
            .map(|span| EntitySpan::new(span.text, self.normalizer.canonical_label(&span.label)))
            .collect())
    }
}

fn label_table(id2label: &HashMap<String, String>) -> Result<Vec<String>> {
    let mut labels = vec![String::new(); id2label.len()];
    for (id, label) in id2label {
        let index: usize = id.parse().with_context(|| format!("bad label id {id:?}"))?;
        let slot = labels
            .get_mut(index)
            .with_context(|| format!("label id {index} out of range"))?;
        *slot = label.clone();
    }
    Ok(labels)
}

struct TokenTag<'a> {
    tag: &'a str,
    /// Byte range in the segment; `(0, 0)` for special tokens.
    offsets: (usize, usize),
    word: Option<u32>,
}

/// Merge BIO-tagged tokens into spans. Sub-word pieces of one word always
/// join the word's span.
fn decode_bio(text: &str, tokens: &[TokenTag<'_>]) -> Vec<EntitySpan> {
    let mut spans = Vec::new();
    let mut current: Option<(String, usize, usize, Option<u32>)> = None;

    let mut close = |current: &mut Option<(String, usize, usize, Option<u32>)>| {
        if let Some((label, start, end, _)) = current.take() {
            if let Some(surface) = text.get(start..end) {
                spans.push(EntitySpan::new(surface.trim(), label));
            }
        }
    };

    for token in tokens {
        if token.offsets == (0, 0) || token.word.is_none() {
            continue;
        }
        let (prefix, label) = match token.tag.split_once('-') {
            Some((prefix, label)) => (prefix, label),
            None => ("O", ""),
        };

        if let Some((_, _, end, word)) = current.as_mut() {
            if *word == token.word {
                *end = token.offsets.1;
                continue;
            }
        }

        match prefix {
            "I" if current.as_ref().is_some_and(|(l, ..)| l == label) => {
                if let Some((_, _, end, word)) = current.as_mut() {
                    *end = token.offsets.1;
                    *word = token.word;
                }
            }
            "B" | "I" => {
                close(&mut current);
                current = Some((label.to_string(), token.offsets.0, token.offsets.1, token.word));
            }
            _ => close(&mut current),
        }
    }
    close(&mut current);

    spans.retain(|span| !span.text.is_empty());
    spans
}
