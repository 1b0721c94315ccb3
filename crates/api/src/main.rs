use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use clap::Parser;
use extract::{EntityRecognizer, Extractor, OllamaClient, OllamaRecognizer};
use feedback::FeedbackStore;
use ingest::{DocumentReader, TextExtractor, UploadStore};
use std::sync::Arc;
use tables::{PdfTableExtractor, TableExtractor};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod json;
mod metrics;
mod pipeline;
mod session;
#[cfg(test)]
mod tests;

use config::{AppConfig, Cli, NerBackend, StagePolicies};
use metrics::Metrics;
use session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    uploads: UploadStore,
    text: Arc<dyn TextExtractor>,
    tables: Arc<dyn TableExtractor>,
    extractor: Extractor,
    feedback: FeedbackStore,
    sessions: SessionStore,
    policies: StagePolicies,
    metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handlers::upload_file))
        .route("/download_excel", get(handlers::download_excel))
        .route(
            "/feedback",
            post(handlers::submit_feedback).get(handlers::list_feedback),
        )
        .route("/feedback/:filename", get(handlers::get_feedback))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docingest_api=info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the NER model once; handlers share it read-only.
async fn load_recognizer(config: &AppConfig) -> Result<Arc<dyn EntityRecognizer>> {
    match config.ner.backend {
        NerBackend::Ollama => {
            let client = OllamaClient::new(config.ner.ollama_url.clone(), config.ner.ollama_model.clone());
            let recognizer = OllamaRecognizer::load(client)
                .await
                .context("Failed to load NER model")?;
            Ok(Arc::new(recognizer))
        }
        #[cfg(feature = "onnx")]
        NerBackend::Onnx => {
            let dir = config.ner.onnx_model_dir.clone();
            let recognizer = tokio::task::spawn_blocking(move || extract::OnnxRecognizer::load(&dir))
                .await?
                .context("Failed to load NER model")?;
            Ok(Arc::new(recognizer))
        }
        #[cfg(not(feature = "onnx"))]
        NerBackend::Onnx => anyhow::bail!("The onnx backend requires building with `--features onnx`"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::load(&cli)?;
    info!(
        backend = ?config.ner.backend,
        uploads = %config.storage.upload_dir.display(),
        tesseract = %config.ocr.tesseract_cmd,
        policies = ?config.policies,
        "Starting docingest"
    );

    let recognizer = load_recognizer(&config).await?;
    info!(backend = recognizer.name(), "NER model loaded");

    let state = AppState {
        uploads: UploadStore::new(&config.storage.upload_dir),
        text: Arc::new(DocumentReader::new(config.ocr.engine())),
        tables: Arc::new(PdfTableExtractor),
        extractor: Extractor::new(recognizer),
        feedback: FeedbackStore::new(&config.storage.feedback_dir)?,
        sessions: SessionStore::new(&config.storage.session_dir, config.secret_key.clone()),
        policies: config.policies,
        metrics: Metrics::new(),
    };

    let app = build_router(state, config.storage.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}
