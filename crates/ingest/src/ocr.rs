//! OCR through poppler's `pdftoppm` and the `tesseract` CLI.

use anyhow::{Context, Result, bail};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::preprocess::preprocess;

pub const RASTER_DPI: u32 = 300;
pub const OCR_LANGUAGE: &str = "eng";

#[derive(Debug, Clone)]
pub struct OcrEngine {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub language: String,
    pub dpi: u32,
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
            language: OCR_LANGUAGE.to_string(),
            dpi: RASTER_DPI,
        }
    }
}

impl OcrEngine {
    /// Rasterize every page, preprocess, OCR, and concatenate in page order.
    pub fn ocr_pdf(&self, pdf_path: &Path) -> Result<String> {
        let scratch = scratch_dir()?;
        let prefix = scratch.path().join("page");

        let output = Command::new(&self.pdftoppm_cmd)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .with_context(|| format!("Failed to run {}", self.pdftoppm_cmd))?;

        if !output.status.success() {
            bail!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let pages = rendered_pages(scratch.path())?;
        if pages.is_empty() {
            bail!("pdftoppm produced no page images");
        }

        let mut text = String::new();
        for (index, page) in pages.iter().enumerate() {
            let image = image::open(page)
                .with_context(|| format!("Failed to decode rendered page {}", index + 1))?;
            text.push_str(&self.recognize(&image, scratch.path(), index)?);
            debug!(page = index + 1, "OCR page complete");
        }

        info!(pages = pages.len(), chars = text.len(), "OCR complete");
        Ok(text)
    }

    /// OCR a single uploaded image.
    pub fn ocr_image_file(&self, path: &Path) -> Result<String> {
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;
        let scratch = scratch_dir()?;
        self.recognize(&image, scratch.path(), 0)
    }

    fn recognize(&self, image: &DynamicImage, scratch: &Path, index: usize) -> Result<String> {
        let processed = preprocess(image);
        let input = scratch.join(format!("processed-{index}.png"));
        processed
            .save(&input)
            .context("Failed to write preprocessed page")?;

        let output = Command::new(&self.tesseract_cmd)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .with_context(|| format!("Failed to run {}", self.tesseract_cmd))?;

        if !output.status.success() {
            bail!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn scratch_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("docingest-ocr-")
        .tempdir()
        .context("Failed to create OCR scratch directory")
}

/// `page-1.png`, `page-02.png`, ... sorted by page number.
fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .filter_map(|path| page_number(&path).map(|n| (n, path)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (prefix, number) = stem.rsplit_once('-')?;
    if prefix != "page" {
        return None;
    }
    number.parse().ok()
}
