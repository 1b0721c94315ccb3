use anyhow::Result;
use tracing::info;

use crate::ocr::OcrEngine;
use crate::pdf;
use crate::storage::{DocumentKind, UploadedDocument};

/// Produces the plain text of a stored upload. Implementations are blocking.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, document: &UploadedDocument) -> Result<String>;
}

/// Text layer for digital PDFs, OCR for images and PDFs without one.
#[derive(Debug, Clone, Default)]
pub struct DocumentReader {
    ocr: OcrEngine,
}

impl DocumentReader {
    pub fn new(ocr: OcrEngine) -> Self {
        Self { ocr }
    }
}

impl TextExtractor for DocumentReader {
    fn extract_text(&self, document: &UploadedDocument) -> Result<String> {
        match document.kind {
            DocumentKind::Pdf => {
                let text = pdf::extract_text_layer(&document.path)?;
                if !text.trim().is_empty() {
                    return Ok(text);
                }

                info!(
                    path = %document.path.display(),
                    "PDF has no text layer, falling back to OCR"
                );
                self.ocr.ocr_pdf(&document.path)
            }
            DocumentKind::Image => self.ocr.ocr_image_file(&document.path),
        }
    }
}
