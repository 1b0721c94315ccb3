//! Text-layer access for digital PDFs.

use anyhow::{Context, Result};
use lopdf::Document;
use std::path::Path;

pub fn load(path: &Path) -> Result<Document> {
    Document::load(path).with_context(|| format!("Failed to load PDF: {}", path.display()))
}

/// Text layer of every page, in page order.
pub fn page_texts(doc: &Document) -> Result<Vec<String>> {
    doc.get_pages()
        .keys()
        .map(|&page| {
            doc.extract_text(&[page])
                .with_context(|| format!("Failed to extract text from page {page}"))
        })
        .collect()
}

/// Concatenated text layer, pages joined without separators.
pub fn extract_text_layer(path: &Path) -> Result<String> {
    let doc = load(path)?;
    Ok(page_texts(&doc)?.concat())
}
