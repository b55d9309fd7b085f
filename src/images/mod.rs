//! In-memory store of uploaded images
//!
//! Images arrive from a remote URL, a local path, inline base64, or the
//! `/upload-image` multipart route. Each stored image gets a v4 UUID handle
//! and expires a fixed interval after insertion; expired entries are purged
//! lazily and are indistinguishable from ids that never existed.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// A stored image payload
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
    stored_at: Instant,
}

/// What an upload returns to the caller
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub image_id: Uuid,
    pub media_type: String,
    pub expires_in_seconds: u64,
}

/// Image store handle
pub struct ImageStore {
    ttl: Duration,
    max_bytes: usize,
    entries: Mutex<HashMap<Uuid, StoredImage>>,
    http: reqwest::Client,
}

impl ImageStore {
    pub fn new(ttl: Duration, max_bytes: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            ttl,
            max_bytes,
            entries: Mutex::new(HashMap::new()),
            http,
        })
    }

    /// Store raw bytes. The payload must sniff as a known image format;
    /// when sniffing cannot name the format, an `image/*` content type
    /// guessed from `name_hint` is accepted instead.
    pub async fn insert_bytes(
        &self,
        bytes: Vec<u8>,
        name_hint: Option<&str>,
    ) -> Result<UploadReceipt> {
        if bytes.is_empty() {
            return Err(Error::Image("Empty image payload".to_string()));
        }
        if bytes.len() > self.max_bytes {
            return Err(Error::Image(format!(
                "Image exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let media_type = match image::guess_format(&bytes) {
            Ok(format) => format.to_mime_type().to_string(),
            Err(_) => name_hint
                .map(|hint| mime_guess::from_path(hint).first_or_octet_stream())
                .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
                .map(|mime| mime.essence_str().to_string())
                .ok_or_else(|| {
                    Error::Image("Payload is not a recognized image format".to_string())
                })?,
        };

        let image_id = Uuid::new_v4();
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, self.ttl);
        entries.insert(
            image_id,
            StoredImage {
                bytes,
                media_type: media_type.clone(),
                stored_at: Instant::now(),
            },
        );
        debug!(%image_id, media_type, "Stored image");

        Ok(UploadReceipt {
            image_id,
            media_type,
            expires_in_seconds: self.ttl.as_secs(),
        })
    }

    /// Store an image from an inline base64 payload. Data URLs are accepted.
    pub async fn insert_from_b64(&self, b64: &str) -> Result<UploadReceipt> {
        let payload = match b64.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => b64,
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::Image(format!("Invalid base64 image payload: {e}")))?;
        self.insert_bytes(bytes, None).await
    }

    /// Store an image from a local file path.
    pub async fn insert_from_path(&self, path: &str) -> Result<UploadReceipt> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::Image(format!("Failed to read image '{path}': {e}")))?;
        if metadata.len() > self.max_bytes as u64 {
            return Err(Error::Image(format!(
                "Image exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Image(format!("Failed to read image '{path}': {e}")))?;
        let hint = Path::new(path).file_name().and_then(|n| n.to_str());
        self.insert_bytes(bytes, hint).await
    }

    /// Store an image fetched from a remote URL.
    pub async fn insert_from_url(&self, url: &str) -> Result<UploadReceipt> {
        let parsed = Url::parse(url)?;
        let response = self
            .http
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| Error::Image(format!("Failed to fetch image '{url}': {e}")))?
            .error_for_status()
            .map_err(|e| Error::Image(format!("Failed to fetch image '{url}': {e}")))?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(Error::Image(format!(
                    "Image exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Image(format!("Failed to fetch image '{url}': {e}")))?
            .to_vec();
        self.insert_bytes(bytes, Some(parsed.path())).await
    }

    /// Look up a stored image; expired or unknown ids both miss.
    pub async fn get(&self, image_id: &Uuid) -> Result<StoredImage> {
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, self.ttl);
        entries
            .get(image_id)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(image_id.to_string()))
    }

    fn purge_expired(entries: &mut HashMap<Uuid, StoredImage>, ttl: Duration) {
        entries.retain(|_, image| image.stored_at.elapsed() < ttl);
    }
}
