//! Vertex AI multimodal image embedding
//!
//! Turns a stored image into an embedding vector through the
//! `multimodalembedding@001` publisher model, so hybrid search can run
//! with an image vector. Auth supports an API key, a static bearer token,
//! or OAuth via a service-account JWT assertion with token caching.

use crate::config::{ServiceAccountSource, VertexAuth, VertexConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EMBEDDING_MODEL: &str = "multimodalembedding@001";

/// Refresh OAuth tokens this long before they actually expire
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Seam for image embedding (tools depend on this, tests fake it)
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>>;
}

/// Vertex AI embedder handle
#[derive(Debug)]
pub struct VertexEmbedder {
    client: Client,
    auth: VertexAuth,
    endpoint: String,
    service_account: Option<ServiceAccountKey>,
    token_cache: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: i64,
}

fn default_token_lifetime() -> i64 {
    3600
}

impl VertexEmbedder {
    pub fn new(config: &VertexConfig) -> Result<Self> {
        let service_account = match &config.auth {
            VertexAuth::OAuth(source) => Some(ServiceAccountKey::load(source)?),
            _ => None,
        };

        let project = config
            .project
            .clone()
            .or_else(|| {
                service_account
                    .as_ref()
                    .and_then(|sa| sa.project_id.clone())
            })
            .ok_or_else(|| {
                Error::Config(
                    "Set VERTEX_PROJECT or provide service account credentials with a project_id"
                        .to_string(),
                )
            })?;

        let model_path = format!(
            "v1/projects/{project}/locations/{location}/publishers/google/models/{EMBEDDING_MODEL}:predict",
            location = config.location
        );
        let endpoint = match &config.endpoint_override {
            Some(base) => format!("{}/{model_path}", base.trim_end_matches('/')),
            None => format!(
                "https://{location}-aiplatform.googleapis.com/{model_path}",
                location = config.location
            ),
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            auth: config.auth.clone(),
            endpoint,
            service_account,
            token_cache: Mutex::new(None),
        })
    }

    /// Mint or reuse an OAuth access token from the service-account assertion.
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.token_cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let sa = self
            .service_account
            .as_ref()
            .ok_or_else(|| Error::Vertex("No service account credentials loaded".to_string()))?;
        let token_uri = sa.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let now = Utc::now();
        let claims = AssertionClaims {
            iss: sa.client_email.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            aud: token_uri.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
            .map_err(|e| Error::Vertex(format!("Invalid service account private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| Error::Vertex(format!("Failed to sign token assertion: {e}")))?;

        debug!("Requesting Vertex access token");
        let response: TokenResponse = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Vertex(format!("Token exchange failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Vertex(format!("Token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Vertex(format!("Invalid token response: {e}")))?;

        let token = response.access_token.clone();
        *cache = Some(CachedToken {
            token: response.access_token,
            expires_at: now + Duration::seconds(response.expires_in),
        });
        Ok(token)
    }
}

impl ServiceAccountKey {
    fn load(source: &ServiceAccountSource) -> Result<Self> {
        let raw = match source {
            ServiceAccountSource::InlineJson(json) => json.clone(),
            ServiceAccountSource::Path(path) => std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!(
                    "Failed to read service account file '{}': {e}",
                    path.display()
                ))
            })?,
        };

        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid service account JSON: {e}")))
    }
}

#[async_trait]
impl ImageEmbedder for VertexEmbedder {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let body = json!({
            "instances": [
                { "image": { "bytesBase64Encoded": STANDARD.encode(bytes) } }
            ]
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        request = match &self.auth {
            VertexAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            VertexAuth::BearerToken(token) => request.bearer_auth(token),
            VertexAuth::OAuth(_) => request.bearer_auth(self.access_token().await?),
        };

        let response: Value = request
            .send()
            .await
            .map_err(|e| Error::Vertex(format!("Embedding request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Vertex(format!("Embedding request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Vertex(format!("Invalid embedding response: {e}")))?;

        let embedding = response
            .get("predictions")
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("imageEmbedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Vertex("Response contained no image embedding".to_string()))?;

        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }
}
