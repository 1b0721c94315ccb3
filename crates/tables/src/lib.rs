//! Table extraction stage: find tables in a PDF and write them to a spreadsheet.

pub mod workbook;

pub use workbook::{sheet_name, write_workbook};

use anyhow::{Context, Result, ensure};
use pdfplumber::{Pdf, TableSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Row-major grid of cells; `None` marks an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

impl From<&pdfplumber::Table> for Table {
    fn from(found: &pdfplumber::Table) -> Self {
        Self::new(
            found
                .rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.text.clone()).collect())
                .collect(),
        )
    }
}

/// Finds tables across all pages of a PDF. Implementations are blocking.
pub trait TableExtractor: Send + Sync {
    fn extract_tables(&self, pdf_path: &Path) -> Result<Vec<Table>>;
}

/// pdfplumber's table finder with its default (ruling line) settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTableExtractor;

impl TableExtractor for PdfTableExtractor {
    /// Tables of every page, concatenated in page order.
    fn extract_tables(&self, pdf_path: &Path) -> Result<Vec<Table>> {
        ensure!(
            pdf_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")),
            "Table extraction requires a PDF: {}",
            pdf_path.display()
        );

        let pdf = Pdf::open_file(pdf_path, None)
            .with_context(|| format!("Failed to open PDF: {}", pdf_path.display()))?;
        let settings = TableSettings::default();
        let mut tables = Vec::new();

        for index in 0..pdf.page_count() {
            let page = pdf
                .page(index)
                .with_context(|| format!("Failed to read page {}", index + 1))?;

            for found in page.find_tables(&settings) {
                let table = Table::from(&found);
                debug!(
                    page = index + 1,
                    rows = table.row_count(),
                    columns = table.column_count(),
                    "Found table"
                );
                tables.push(table);
            }
        }

        Ok(tables)
    }
}
