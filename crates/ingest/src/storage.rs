use chrono::Local;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::fs;
use tracing::info;
use unicode_normalization::UnicodeNormalization;

/// Extensions accepted by the upload endpoint (matched case-insensitively).
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["pdf", "jpg", "png"];

/// Second-granularity timestamp used in every generated filename.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static regex"));

const WINDOWS_DEVICE_NAMES: [&str; 12] = [
    "CON", "AUX", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3", "PRN", "NUL", "CLOCK$",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Digital or scanned PDF; scanned ones are detected by an empty text layer
    Pdf,
    /// Photographed or scanned page image
    Image,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "png" => Some(Self::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedDocument {
    pub original_filename: String,
    /// Sanitized filename stem, shared by every artifact derived from this upload
    pub base_name: String,
    pub extension: String,
    pub path: PathBuf,
    pub timestamp: String,
    pub kind: DocumentKind,
}

impl UploadedDocument {
    pub fn stored_filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Spreadsheet name for this upload's tables.
    pub fn spreadsheet_filename(&self) -> String {
        spreadsheet_filename(&self.base_name, &self.timestamp)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// `<base>_<timestamp>_output.xlsx`, derivable without any request state.
pub fn spreadsheet_filename(base_name: &str, timestamp: &str) -> String {
    secure_filename(&format!("{base_name}_{timestamp}_output.xlsx"))
}

pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Lowercased text after the last `.`, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
}

pub fn allowed_file(filename: &str) -> bool {
    file_extension(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Reduce a client-supplied filename to a flat, ASCII-only name that is safe
/// to join onto a directory. Accented letters decompose to their base letter
/// before non-ASCII characters are dropped. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if !trimmed.is_empty() && WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Writes uploads into a single flat directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sanitize `filename` and join it onto the upload directory. `None` when
    /// nothing usable survives sanitizing.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let name = secure_filename(filename);
        (!name.is_empty()).then(|| self.dir.join(name))
    }

    pub async fn save(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<UploadedDocument, StorageError> {
        self.save_with_timestamp(original_filename, bytes, &timestamp_now())
            .await
    }

    pub async fn save_with_timestamp(
        &self,
        original_filename: &str,
        bytes: &[u8],
        timestamp: &str,
    ) -> Result<UploadedDocument, StorageError> {
        let (extension, kind) = file_extension(original_filename)
            .and_then(|ext| DocumentKind::from_extension(&ext).map(|kind| (ext, kind)))
            .ok_or_else(|| StorageError::UnsupportedType(original_filename.to_string()))?;

        let sanitized = secure_filename(original_filename);
        let stem = match sanitized.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => sanitized.as_str(),
        };
        let base_name = if stem.is_empty() {
            "document".to_string()
        } else {
            stem.to_string()
        };

        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{base_name}_{timestamp}.{extension}"));
        fs::write(&path, bytes).await?;

        info!(
            original = original_filename,
            path = %path.display(),
            bytes = bytes.len(),
            "Stored upload"
        );

        Ok(UploadedDocument {
            original_filename: original_filename.to_string(),
            base_name,
            extension,
            path,
            timestamp: timestamp.to_string(),
            kind,
        })
    }
}
