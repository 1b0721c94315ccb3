use anyhow::{Context, Result, ensure};
use rust_xlsxwriter::Workbook;
use std::path::Path;
use tracing::info;

use crate::Table;

pub fn sheet_name(index: usize) -> String {
    format!("Table_{}", index + 1)
}

/// Drop characters that are not valid in sheet XML.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// One sheet per table, `Table_1..Table_M`, rows written from the first line
/// with no header row. Empty cells are left blank.
pub fn write_workbook(tables: &[Table], path: &Path) -> Result<()> {
    ensure!(!tables.is_empty(), "No tables to write");

    let mut workbook = Workbook::new();
    for (index, table) in tables.iter().enumerate() {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(sheet_name(index))
            .with_context(|| format!("Failed to name sheet {}", index + 1))?;

        for (row, cells) in table.rows.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                if let Some(value) = cell {
                    worksheet
                        .write_string(row as u32, col as u16, sanitize_cell(value))
                        .with_context(|| format!("Failed to write cell ({row}, {col})"))?;
                }
            }
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to save spreadsheet: {}", path.display()))?;

    info!(path = %path.display(), sheets = tables.len(), "Wrote spreadsheet");
    Ok(())
}
