use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ingest::OcrEngine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ner: NerConfig,
    pub ocr: OcrConfig,
    pub policies: StagePolicies,
    /// Signs session cookies
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub session_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    pub backend: NerBackend,
    pub ollama_url: String,
    pub ollama_model: String,
    pub onnx_model_dir: PathBuf,
}

/// External OCR tools; bare names are looked up on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub language: String,
    pub dpi: u32,
}

impl OcrConfig {
    pub fn engine(&self) -> OcrEngine {
        OcrEngine {
            tesseract_cmd: self.tesseract_cmd.clone(),
            pdftoppm_cmd: self.pdftoppm_cmd.clone(),
            language: self.language.clone(),
            dpi: self.dpi,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NerBackend {
    Ollama, // LLM served over HTTP
    Onnx,   // Local token classifier, needs the `onnx` feature
}

/// What a stage failure does to the upload request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Respond 500 with the stage's error
    FailFast,
    /// Continue with the stage's empty result
    DegradeEmpty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StagePolicies {
    pub text: FailurePolicy,
    pub entities: FailurePolicy,
    pub tables: FailurePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            ner: NerConfig::default(),
            ocr: OcrConfig::default(),
            policies: StagePolicies::default(),
            secret_key: "dev-key-please-change".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            session_dir: PathBuf::from("instance/sessions"),
            feedback_dir: PathBuf::from("feedback"),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            backend: NerBackend::Ollama,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            onnx_model_dir: PathBuf::from("models/ner"),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        let engine = OcrEngine::default();
        Self {
            tesseract_cmd: engine.tesseract_cmd,
            pdftoppm_cmd: engine.pdftoppm_cmd,
            language: engine.language,
            dpi: engine.dpi,
        }
    }
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            text: FailurePolicy::FailFast,
            entities: FailurePolicy::DegradeEmpty,
            tables: FailurePolicy::DegradeEmpty,
        }
    }
}

/// Command line; every flag can also come from the environment.
#[derive(Parser, Debug)]
#[command(name = "docingest-api")]
#[command(about = "Document ingestion server: text, entities and tables from PDFs and scans")]
pub struct Cli {
    /// TOML file layered over the built-in defaults
    #[arg(long, env = "DOCINGEST_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "DOCINGEST_BIND")]
    pub bind: Option<String>,

    #[arg(long, env = "DOCINGEST_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    #[arg(long, env = "DOCINGEST_SESSION_DIR")]
    pub session_dir: Option<PathBuf>,

    #[arg(long, env = "DOCINGEST_FEEDBACK_DIR")]
    pub feedback_dir: Option<PathBuf>,

    #[arg(long, env = "DOCINGEST_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<usize>,

    #[arg(long, env = "DOCINGEST_NER_BACKEND", value_enum)]
    pub ner_backend: Option<NerBackend>,

    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    #[arg(long, env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    #[arg(long, env = "DOCINGEST_ONNX_MODEL_DIR")]
    pub onnx_model_dir: Option<PathBuf>,

    #[arg(long, env = "TESSERACT_CMD")]
    pub tesseract_cmd: Option<String>,

    #[arg(long, env = "DOCINGEST_PDFTOPPM_CMD")]
    pub pdftoppm_cmd: Option<String>,

    #[arg(long, env = "DOCINGEST_TEXT_POLICY", value_enum)]
    pub text_policy: Option<FailurePolicy>,

    #[arg(long, env = "DOCINGEST_ENTITIES_POLICY", value_enum)]
    pub entities_policy: Option<FailurePolicy>,

    #[arg(long, env = "DOCINGEST_TABLES_POLICY", value_enum)]
    pub tables_policy: Option<FailurePolicy>,

    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "DOCINGEST_LOG_JSON")]
    pub log_json: bool,
}

impl AppConfig {
    /// Defaults, then the TOML file, then flags and environment.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply(cli);
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(dir) = &cli.upload_dir {
            self.storage.upload_dir = dir.clone();
        }
        if let Some(dir) = &cli.session_dir {
            self.storage.session_dir = dir.clone();
        }
        if let Some(dir) = &cli.feedback_dir {
            self.storage.feedback_dir = dir.clone();
        }
        if let Some(bytes) = cli.max_upload_bytes {
            self.storage.max_upload_bytes = bytes;
        }
        if let Some(backend) = cli.ner_backend {
            self.ner.backend = backend;
        }
        if let Some(url) = &cli.ollama_url {
            self.ner.ollama_url = url.clone();
        }
        if let Some(model) = &cli.ollama_model {
            self.ner.ollama_model = model.clone();
        }
        if let Some(dir) = &cli.onnx_model_dir {
            self.ner.onnx_model_dir = dir.clone();
        }
        if let Some(cmd) = &cli.tesseract_cmd {
            self.ocr.tesseract_cmd = cmd.clone();
        }
        if let Some(cmd) = &cli.pdftoppm_cmd {
            self.ocr.pdftoppm_cmd = cmd.clone();
        }
        if let Some(policy) = cli.text_policy {
            self.policies.text = policy;
        }
        if let Some(policy) = cli.entities_policy {
            self.policies.entities = policy;
        }
        if let Some(policy) = cli.tables_policy {
            self.policies.tables = policy;
        }
        if let Some(secret) = &cli.secret_key {
            self.secret_key = secret.clone();
        }
    }
}
