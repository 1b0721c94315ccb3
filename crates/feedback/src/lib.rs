//! Feedback stage: human corrections to extracted entities, one JSON file per
//! submission.

use ingest::{secure_filename, timestamp_now};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// `YYYYMMDD_HHMMSS`; also names the file
    pub timestamp: String,
    pub original_text: String,
    pub extracted_entities: Value,
    pub corrected_entities: Value,
    pub confidence_scores: Value,
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback not found: {0}")]
    NotFound(String),

    #[error("Feedback storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed feedback record: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn feedback_filename(timestamp: &str) -> String {
    format!("feedback_{timestamp}.json")
}

/// Append-only directory of feedback records. Saves in the same second
/// share a filename; the later one wins.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    dir: PathBuf,
}

impl FeedbackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FeedbackError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(
        &self,
        original_text: String,
        extracted_entities: Value,
        corrected_entities: Value,
        confidence_scores: Value,
    ) -> Result<PathBuf, FeedbackError> {
        self.save_record(&FeedbackRecord {
            timestamp: timestamp_now(),
            original_text,
            extracted_entities,
            corrected_entities,
            confidence_scores,
        })
        .await
    }

    pub async fn save_record(&self, record: &FeedbackRecord) -> Result<PathBuf, FeedbackError> {
        let path = self.dir.join(feedback_filename(&record.timestamp));
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).await?;

        info!(path = %path.display(), "Saved feedback");
        Ok(path)
    }

    /// Filenames of every stored record, sorted.
    pub async fn list(&self) -> Result<Vec<String>, FeedbackError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn load(&self, filename: &str) -> Result<FeedbackRecord, FeedbackError> {
        let name = secure_filename(filename);
        if name.is_empty() {
            return Err(FeedbackError::NotFound(filename.to_string()));
        }

        let json = match fs::read_to_string(self.dir.join(&name)).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FeedbackError::NotFound(name));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&json).map_err(|e| {
            warn!(file = %name, error = %e, "Unreadable feedback record");
            e.into()
        })
    }
}
