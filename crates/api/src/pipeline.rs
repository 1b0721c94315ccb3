//! Upload orchestration: text, then entities, then tables, each stage's
//! failure handled by its configured policy.

use anyhow::{Context, Result};
use extract::Extraction;
use ingest::{DocumentKind, UploadedDocument};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppState;
use crate::config::{FailurePolicy, StagePolicies};
use crate::error::ApiError;
use crate::json::widen_floats;
use crate::metrics::TimedOperation;

pub const SUCCESS_MESSAGE: &str = "File processed successfully!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Text,
    Entities,
    Tables,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Text => "text",
            Stage::Entities => "entities",
            Stage::Tables => "tables",
        }
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            Stage::Text => "Failed to extract text",
            Stage::Entities => "Failed to extract entities",
            Stage::Tables => "Failed to extract tables",
        }
    }
}

impl StagePolicies {
    pub fn for_stage(&self, stage: Stage) -> FailurePolicy {
        match stage {
            Stage::Text => self.text,
            Stage::Entities => self.entities,
            Stage::Tables => self.tables,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub text: String,
    #[serde(flatten)]
    pub extraction: Extraction,
    pub excel_filename: Option<String>,
    pub tables_extracted: bool,
    #[serde(skip)]
    pub excel_path: Option<PathBuf>,
}

impl UploadResponse {
    /// Response body with `f32` scores rendered at their own precision.
    pub fn to_json(&self) -> Result<Value> {
        Ok(widen_floats(serde_json::to_value(self)?))
    }
}

/// Run blocking work (PDF parsing, subprocesses, xlsx writing) off the runtime.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Blocking task panicked")?
}

/// `Ok(None)` means the stage failed and its policy said to carry on.
fn settle<T>(state: &AppState, stage: Stage, result: Result<T>) -> Result<Option<T>, ApiError> {
    let source = match result {
        Ok(value) => return Ok(Some(value)),
        Err(e) => e,
    };
    state.metrics.record_stage_failure();

    match state.policies.for_stage(stage) {
        FailurePolicy::FailFast => {
            error!(stage = stage.name(), error = %format!("{source:#}"), "Stage failed");
            Err(ApiError::Stage { stage, source })
        }
        FailurePolicy::DegradeEmpty => {
            warn!(stage = stage.name(), error = %format!("{source:#}"), "Stage failed, continuing with empty result");
            Ok(None)
        }
    }
}

pub async fn process(state: &AppState, document: &UploadedDocument) -> Result<UploadResponse, ApiError> {
    let timer = TimedOperation::start();
    let reader = Arc::clone(&state.text);
    let stored = document.clone();
    let result = run_blocking(move || reader.extract_text(&stored)).await;
    state.metrics.record_stage(Stage::Text, timer.elapsed());
    let text = settle(state, Stage::Text, result)?.unwrap_or_default();
    info!(file = %document.stored_filename(), chars = text.chars().count(), "Text extraction complete");

    let timer = TimedOperation::start();
    let result = state.extractor.extract(&text).await;
    state.metrics.record_stage(Stage::Entities, timer.elapsed());
    let extraction = settle(state, Stage::Entities, result)?.unwrap_or_default();
    state.metrics.record_entities(extraction.len());
    info!(entities = extraction.len(), backend = state.extractor.backend(), "Entity extraction complete");

    let excel_filename = document.spreadsheet_filename();
    let excel_path = state.uploads.dir().join(&excel_filename);
    let written = match document.kind {
        DocumentKind::Pdf => {
            let timer = TimedOperation::start();
            let extractor = Arc::clone(&state.tables);
            let pdf_path = document.path.clone();
            let output = excel_path.clone();
            let result = run_blocking(move || {
                let found = extractor.extract_tables(&pdf_path)?;
                if found.is_empty() {
                    return Ok(0);
                }
                tables::write_workbook(&found, &output)?;
                Ok(found.len())
            })
            .await;
            state.metrics.record_stage(Stage::Tables, timer.elapsed());
            settle(state, Stage::Tables, result)?.unwrap_or(0)
        }
        DocumentKind::Image => {
            info!(file = %document.stored_filename(), "No table extraction for images");
            0
        }
    };

    let tables_extracted = written > 0;
    state.metrics.record_tables(written, tables_extracted);
    if tables_extracted {
        info!(tables = written, path = %excel_path.display(), "Spreadsheet written");
    }

    Ok(UploadResponse {
        message: SUCCESS_MESSAGE,
        text,
        extraction,
        excel_filename: tables_extracted.then_some(excel_filename),
        tables_extracted,
        excel_path: tables_extracted.then_some(excel_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::EntitySpan;

    #[test]
    fn test_policy_lookup() {
        let policies = StagePolicies::default();
        assert_eq!(policies.for_stage(Stage::Text), FailurePolicy::FailFast);
        assert_eq!(policies.for_stage(Stage::Tables), FailurePolicy::DegradeEmpty);
    }

    #[test]
    fn test_response_shape() {
        let response = UploadResponse {
            message: SUCCESS_MESSAGE,
            text: "Jane Doe".into(),
            extraction: Extraction::from_spans(vec![EntitySpan::new("Jane Doe", "PERSON")]),
            excel_filename: None,
            tables_extracted: false,
            excel_path: Some(PathBuf::from("hidden")),
        };

        let json = response.to_json().unwrap();

        assert_eq!(json["message"], SUCCESS_MESSAGE);
        assert_eq!(json["entities"]["PERSON_0"]["label"], "PERSON");
        assert!(json["excel_filename"].is_null());
        assert_eq!(json["tables_extracted"], false);
        assert!(json.get("excel_path").is_none());

        let score = json["confidence_scores"]["PERSON_0"].as_f64().unwrap();
        let expected = extract::confidence_score("Jane Doe");
        assert_eq!(score.to_string(), expected.to_string());
    }
}
