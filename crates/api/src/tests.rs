//! HTTP endpoint tests using axum-test, with fake pipeline stages

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::http::{StatusCode, header};
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use extract::{EntityRecognizer, EntitySpan, Extractor};
use feedback::FeedbackStore;
use ingest::{TextExtractor, UploadStore, UploadedDocument};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tables::{Table, TableExtractor};
use tempfile::TempDir;

use crate::config::{FailurePolicy, StagePolicies};
use crate::handlers::XLSX_MIME;
use crate::metrics::Metrics;
use crate::session::{COOKIE_NAME, SessionStore};
use crate::{AppState, build_router};

const TEXT: &str = "Jane Doe joined Acme Corp in Paris.";

struct FakeText(Option<&'static str>);

impl TextExtractor for FakeText {
    fn extract_text(&self, _document: &UploadedDocument) -> Result<String> {
        self.0.map(str::to_string).ok_or_else(|| anyhow!("no text layer"))
    }
}

struct FakeTables(Option<usize>);

impl TableExtractor for FakeTables {
    fn extract_tables(&self, _pdf_path: &Path) -> Result<Vec<Table>> {
        let count = self.0.ok_or_else(|| anyhow!("table finder failed"))?;
        let table = Table::new(vec![
            vec![Some("Name".into()), Some("Qty".into())],
            vec![Some("Widget".into()), None],
        ]);
        Ok(vec![table; count])
    }
}

struct FakeRecognizer(bool);

#[async_trait]
impl EntityRecognizer for FakeRecognizer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(&self, _text: &str) -> Result<Vec<EntitySpan>> {
        if !self.0 {
            return Err(anyhow!("model unavailable"));
        }
        Ok(vec![
            EntitySpan::new("Jane Doe", "PERSON"),
            EntitySpan::new("Acme Corp", "ORG"),
            EntitySpan::new("Paris", "GPE"),
        ])
    }
}

struct Harness {
    server: TestServer,
    tmp: TempDir,
}

impl Harness {
    fn upload_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("uploads")
    }

    fn uploaded_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.upload_dir()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn harness(text: FakeText, tables: FakeTables, ner_ok: bool, policies: StagePolicies) -> Harness {
    let tmp = TempDir::new().unwrap();
    let state = AppState {
        uploads: UploadStore::new(tmp.path().join("uploads")),
        text: Arc::new(text),
        tables: Arc::new(tables),
        extractor: Extractor::new(Arc::new(FakeRecognizer(ner_ok))),
        feedback: FeedbackStore::new(tmp.path().join("feedback")).unwrap(),
        sessions: SessionStore::new(tmp.path().join("sessions"), "test-secret"),
        policies,
        metrics: Metrics::new(),
    };

    let server = TestServer::new(build_router(state, 1024 * 1024)).unwrap();
    Harness { server, tmp }
}

fn default_harness() -> Harness {
    harness(FakeText(Some(TEXT)), FakeTables(Some(2)), true, StagePolicies::default())
}

fn pdf_form(filename: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(b"%PDF-1.5 fake".to_vec())
            .file_name(filename.to_string())
            .mime_type("application/pdf"),
    )
}

#[tokio::test]
async fn test_upload_pdf_end_to_end() {
    let h = default_harness();

    let response = h.server.post("/upload").multipart(pdf_form("Q3 report.pdf")).await;

    response.assert_status_ok();
    let json = response.json::<Value>();
    assert_eq!(json["message"], "File processed successfully!");
    assert_eq!(json["text"], TEXT);
    assert_eq!(json["tables_extracted"], true);
    assert_eq!(
        json["entities"],
        json!({
            "PERSON_0": {"text": "Jane Doe", "label": "PERSON"},
            "ORG_1": {"text": "Acme Corp", "label": "ORG"},
            "GPE_2": {"text": "Paris", "label": "GPE"},
        })
    );

    let scores = json["confidence_scores"].as_object().unwrap();
    assert_eq!(scores.len(), 3);
    for key in ["PERSON_0", "ORG_1", "GPE_2"] {
        let score = scores[key].as_f64().unwrap();
        assert!((0.7..=1.0).contains(&score));
    }

    let excel = json["excel_filename"].as_str().unwrap();
    assert!(excel.starts_with("Q3_report_") && excel.ends_with("_output.xlsx"));
    assert!(h.upload_dir().join(excel).is_file());
    assert!(response.headers().get(header::SET_COOKIE).is_some());
}

#[tokio::test]
async fn test_upload_without_file_part() {
    let h = default_harness();

    let form = MultipartForm::new().add_text("comment", "no file here");
    let response = h.server.post("/upload").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>(), json!({"error": "No file part"}));
}

#[tokio::test]
async fn test_upload_with_empty_filename() {
    let h = default_harness();

    let response = h.server.post("/upload").multipart(pdf_form("")).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "No selected file");
    assert!(h.uploaded_files().is_empty());
}

#[tokio::test]
async fn test_disallowed_extension_writes_nothing() {
    let h = default_harness();

    let response = h.server.post("/upload").multipart(pdf_form("payload.exe")).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Unsupported file type");
    assert!(h.uploaded_files().is_empty());
}

#[tokio::test]
async fn test_text_failure_is_500() {
    let h = harness(FakeText(None), FakeTables(Some(1)), true, StagePolicies::default());

    let response = h.server.post("/upload").multipart(pdf_form("scan.pdf")).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let json = response.json::<Value>();
    assert_eq!(json["error"], "Failed to extract text: no text layer");
    assert!(json["details"].is_string());
}

#[tokio::test]
async fn test_entity_failure_degrades_to_empty_maps() {
    let h = harness(FakeText(Some(TEXT)), FakeTables(Some(1)), false, StagePolicies::default());

    let response = h.server.post("/upload").multipart(pdf_form("doc.pdf")).await;

    response.assert_status_ok();
    let json = response.json::<Value>();
    assert_eq!(json["entities"], json!({}));
    assert_eq!(json["confidence_scores"], json!({}));
    assert_eq!(json["text"], TEXT);
}

#[tokio::test]
async fn test_entity_failure_fail_fast() {
    let policies = StagePolicies {
        entities: FailurePolicy::FailFast,
        ..StagePolicies::default()
    };
    let h = harness(FakeText(Some(TEXT)), FakeTables(Some(1)), false, policies);

    let response = h.server.post("/upload").multipart(pdf_form("doc.pdf")).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let error = response.json::<Value>()["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Failed to extract entities"));
}

#[tokio::test]
async fn test_table_failure_still_returns_text_and_entities() {
    let h = harness(FakeText(Some(TEXT)), FakeTables(None), true, StagePolicies::default());

    let response = h.server.post("/upload").multipart(pdf_form("doc.pdf")).await;

    response.assert_status_ok();
    let json = response.json::<Value>();
    assert_eq!(json["tables_extracted"], false);
    assert!(json["excel_filename"].is_null());
    assert_eq!(json["text"], TEXT);
    assert_eq!(json["entities"].as_object().unwrap().len(), 3);
    assert!(!h.uploaded_files().iter().any(|f| f.ends_with(".xlsx")));
}

#[tokio::test]
async fn test_zero_tables_writes_no_spreadsheet() {
    let h = harness(FakeText(Some(TEXT)), FakeTables(Some(0)), true, StagePolicies::default());

    let response = h.server.post("/upload").multipart(pdf_form("doc.pdf")).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["tables_extracted"], false);
    assert!(!h.uploaded_files().iter().any(|f| f.ends_with(".xlsx")));
}

#[tokio::test]
async fn test_image_upload_skips_tables() {
    let h = default_harness();

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![0x89, b'P', b'N', b'G'])
            .file_name("receipt.png")
            .mime_type("image/png"),
    );
    let response = h.server.post("/upload").multipart(form).await;

    response.assert_status_ok();
    let json = response.json::<Value>();
    assert_eq!(json["tables_extracted"], false);
    assert!(h.uploaded_files().iter().any(|f| f.starts_with("receipt_") && f.ends_with(".png")));
}

#[tokio::test]
async fn test_download_generated_spreadsheet() {
    let h = default_harness();
    let upload = h.server.post("/upload").multipart(pdf_form("invoice.pdf")).await;
    let excel = upload.json::<Value>()["excel_filename"].as_str().unwrap().to_string();

    let response = h
        .server
        .get("/download_excel")
        .add_query_param("filename", &excel)
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), XLSX_MIME);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        format!("attachment; filename=\"{excel}\"").as_str()
    );
    let on_disk = std::fs::read(h.upload_dir().join(&excel)).unwrap();
    assert_eq!(response.as_bytes().as_ref(), on_disk.as_slice());
}

#[tokio::test]
async fn test_download_decomposes_accented_name() {
    let h = default_harness();
    let upload = h.server.post("/upload").multipart(pdf_form("resume.pdf")).await;
    let excel = upload.json::<Value>()["excel_filename"].as_str().unwrap().to_string();

    let accented = excel.replacen("resume", "r\u{e9}sum\u{e9}", 1);
    let response = h
        .server
        .get("/download_excel")
        .add_query_param("filename", &accented)
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        format!("attachment; filename=\"{excel}\"").as_str()
    );
}

#[tokio::test]
async fn test_download_missing_filename() {
    let h = default_harness();

    let response = h.server.get("/download_excel").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Excel filename is required");

    let response = h.server.get("/download_excel").add_query_param("filename", "").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_absent_file_is_404() {
    let h = default_harness();

    let response = h
        .server
        .get("/download_excel")
        .add_query_param("filename", "nothing_here.xlsx")
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>(),
        json!({"error": "File not found: nothing_here.xlsx"})
    );
}

#[tokio::test]
async fn test_download_cannot_traverse() {
    let h = default_harness();
    std::fs::write(h.tmp.path().join("secret.xlsx"), b"top secret").unwrap();

    let response = h
        .server
        .get("/download_excel")
        .add_query_param("filename", "../secret.xlsx")
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_cookie_is_reused() {
    let h = default_harness();
    let first = h.server.post("/upload").multipart(pdf_form("a.pdf")).await;
    let set_cookie = first.header(header::SET_COOKIE);
    let cookie = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();
    assert!(cookie.starts_with(&format!("{COOKIE_NAME}=")));

    let second = h
        .server
        .post("/upload")
        .add_header(header::COOKIE, cookie.parse::<axum::http::HeaderValue>().unwrap())
        .multipart(pdf_form("b.pdf"))
        .await;

    second.assert_status_ok();
    assert!(second.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_feedback_round_trip() {
    let h = default_harness();

    let saved = h
        .server
        .post("/feedback")
        .json(&json!({
            "original_text": TEXT,
            "extracted_entities": {"PERSON_0": {"text": "Jane Doe", "label": "PERSON"}},
            "corrected_entities": {"PERSON_0": {"text": "Jane Doe", "label": "PERSON"},
                                   "ORG_1": {"text": "Acme Corp", "label": "ORG"}},
            "confidence_scores": {"PERSON_0": 0.81},
        }))
        .await;
    saved.assert_status_ok();
    let filename = saved.json::<Value>()["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("feedback_"));

    let listed = h.server.get("/feedback").await.json::<Value>();
    assert_eq!(listed["feedback_files"], json!([filename.clone()]));

    let record = h.server.get(&format!("/feedback/{filename}")).await;
    record.assert_status_ok();
    let record = record.json::<Value>();
    assert_eq!(record["original_text"], TEXT);
    assert_eq!(record["corrected_entities"]["ORG_1"]["label"], "ORG");
}

#[tokio::test]
async fn test_unknown_feedback_is_404() {
    let h = default_harness();

    let response = h.server.get("/feedback/feedback_19990101_000000.json").await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_stats() {
    let h = default_harness();

    let health = h.server.get("/health").await;
    health.assert_status_ok();
    let health = health.json::<Value>();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ner_backend"], "fake");

    h.server.post("/upload").multipart(pdf_form("doc.pdf")).await.assert_status_ok();
    h.server.post("/upload").multipart(pdf_form("doc.zip")).await;

    let stats = h.server.get("/stats").await.json::<Value>();
    assert_eq!(stats["uploads_total"], 2);
    assert_eq!(stats["uploads_succeeded"], 1);
    assert_eq!(stats["uploads_failed"], 1);
    assert_eq!(stats["entities_extracted"], 3);
    assert_eq!(stats["tables_extracted"], 2);
}
