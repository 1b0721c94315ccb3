//! Storage and text extraction stages of the ingestion pipeline.

pub mod ocr;
pub mod pdf;
pub mod preprocess;
pub mod reader;
pub mod storage;

pub use ocr::OcrEngine;
pub use reader::{DocumentReader, TextExtractor};
pub use storage::{
    DocumentKind, StorageError, UploadStore, UploadedDocument, allowed_file, secure_filename,
    spreadsheet_filename, timestamp_now,
};
