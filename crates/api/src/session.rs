//! Signed session cookies backed by JSON files.
//!
//! Sessions only remember the last spreadsheet a client generated. Nothing
//! depends on them: downloads go by filename.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

pub const COOKIE_NAME: &str = "docingest_session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub excel_filename: Option<String>,
    pub excel_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    secret: String,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            secret: secret.into(),
        }
    }

    fn signature(&self, id: &Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(id.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `<uuid>.<signature>`
    pub fn cookie_value(&self, id: &Uuid) -> String {
        format!("{id}.{}", self.signature(id))
    }

    pub fn set_cookie_header(&self, id: &Uuid) -> String {
        format!(
            "{COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_value(id)
        )
    }

    pub fn verify(&self, value: &str) -> Option<Uuid> {
        let (id, signature) = value.split_once('.')?;
        let id = Uuid::parse_str(id).ok()?;
        (self.signature(&id) == signature).then_some(id)
    }

    /// Session id from a validly signed cookie, if the request carries one.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<Uuid> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == COOKIE_NAME)
            .and_then(|(_, value)| self.verify(value))
    }

    fn path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Missing or unreadable records read as `None`.
    pub async fn load(&self, id: &Uuid) -> Option<SessionRecord> {
        let json = tokio::fs::read_to_string(self.path(id)).await.ok()?;
        match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session = %id, error = %e, "Discarding unreadable session");
                None
            }
        }
    }

    pub async fn store(&self, id: &Uuid, record: &SessionRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string(record)?;
        tokio::fs::write(self.path(id), json)
            .await
            .context("Failed to write session")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    #[test]
    fn test_cookie_round_trip() {
        let store = SessionStore::new("unused", "secret");
        let id = Uuid::new_v4();

        let mut headers = HeaderMap::new();
        let cookie = format!("theme=dark; {COOKIE_NAME}={}", store.cookie_value(&id));
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());

        assert_eq!(store.session_id(&headers), Some(id));
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let id = Uuid::new_v4();
        let forged = SessionStore::new("unused", "other").cookie_value(&id);

        let store = SessionStore::new("unused", "secret");

        assert_eq!(store.verify(&forged), None);
        assert_eq!(store.verify("not-a-uuid.abc"), None);
        assert_eq!(store.verify(""), None);
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("sessions"), "secret");
        let id = Uuid::new_v4();
        let record = SessionRecord {
            excel_filename: Some("report_20240101_000000_output.xlsx".into()),
            excel_path: Some("uploads/report_20240101_000000_output.xlsx".into()),
        };

        assert_eq!(store.load(&id).await, None);
        store.store(&id, &record).await.unwrap();
        assert_eq!(store.load(&id).await, Some(record));
    }
}
