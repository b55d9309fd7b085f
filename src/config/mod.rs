//! Configuration management for the connector
//!
//! All configuration is environment-driven: the hosting platform injects
//! env vars and there is no config file. A `.env` file is honored in
//! development via dotenvy before [`Config::from_env`] runs.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// Weaviate cluster base URL (`WEAVIATE_CLUSTER_URL` wins over `WEAVIATE_URL`)
    pub weaviate_url: String,

    /// Bearer API key for the cluster
    pub weaviate_api_key: String,

    /// Bind address for the HTTP server
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Normalized MCP endpoint path (leading slash, no trailing slash)
    pub mcp_path: String,

    /// Validity window for uploaded images
    pub image_ttl: Duration,

    /// Upper bound on accepted image payloads
    pub max_image_bytes: usize,

    /// Whether `OPENAI_API_KEY` is set (reported by get_config, never read)
    pub openai_api_key_set: bool,

    /// Whether `COHERE_API_KEY` is set (reported by get_config, never read)
    pub cohere_api_key_set: bool,

    /// Vertex AI image-embedding configuration, when any auth mode is present
    pub vertex: Option<VertexConfig>,
}

/// Vertex AI endpoint and auth configuration
#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub auth: VertexAuth,

    /// GCP project id; falls back to the service account's `project_id`
    pub project: Option<String>,

    /// Vertex region, e.g. `us-central1`
    pub location: String,

    /// Full endpoint override (`VERTEX_ENDPOINT`), mainly for testing
    pub endpoint_override: Option<String>,
}

/// Vertex auth modes, in precedence order
#[derive(Debug, Clone)]
pub enum VertexAuth {
    /// `VERTEX_APIKEY`, sent as a `?key=` query parameter
    ApiKey(String),

    /// `VERTEX_BEARER_TOKEN`, sent verbatim as a bearer token
    BearerToken(String),

    /// OAuth via a Google service account assertion
    OAuth(ServiceAccountSource),
}

/// Where the service account credentials come from
#[derive(Debug, Clone)]
pub enum ServiceAccountSource {
    /// `GOOGLE_APPLICATION_CREDENTIALS_JSON` (the JSON document itself)
    InlineJson(String),

    /// `GOOGLE_APPLICATION_CREDENTIALS` or `VERTEX_SA_PATH`
    Path(PathBuf),
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup (test seam)
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let weaviate_url = lookup("WEAVIATE_CLUSTER_URL")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("WEAVIATE_URL").filter(|v| !v.is_empty()))
            .ok_or_else(|| {
                Error::Config("Please set WEAVIATE_URL or WEAVIATE_CLUSTER_URL".to_string())
            })?;

        let weaviate_api_key = lookup("WEAVIATE_API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config("Please set WEAVIATE_API_KEY".to_string()))?;

        let host = lookup("HOST").unwrap_or_else(default_host);

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("Invalid PORT value: {raw}")))?,
            None => default_port(),
        };

        let mcp_path = normalize_mcp_path(&lookup("MCP_PATH").unwrap_or_else(default_mcp_path))?;

        let image_ttl = match lookup("IMAGE_TTL_SECS") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("Invalid IMAGE_TTL_SECS value: {raw}")))?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(default_image_ttl_secs()),
        };

        Ok(Self {
            weaviate_url,
            weaviate_api_key,
            host,
            port,
            mcp_path,
            image_ttl,
            max_image_bytes: default_max_image_bytes(),
            openai_api_key_set: lookup("OPENAI_API_KEY").is_some_and(|v| !v.is_empty()),
            cohere_api_key_set: lookup("COHERE_API_KEY").is_some_and(|v| !v.is_empty()),
            vertex: VertexConfig::from_lookup(lookup)?,
        })
    }

    /// Config summary with secrets reduced to `*_set` booleans.
    ///
    /// Shared between the `get_config` tool and the `config` CLI command.
    pub fn sanitized_summary(&self, vertex_configured: bool) -> Value {
        json!({
            "weaviate_url": self.weaviate_url,
            "weaviate_api_key_set": !self.weaviate_api_key.is_empty(),
            "openai_api_key_set": self.openai_api_key_set,
            "cohere_api_key_set": self.cohere_api_key_set,
            "vertex_configured": vertex_configured,
            "mcp_path": self.mcp_path,
            "image_ttl_seconds": self.image_ttl.as_secs(),
        })
    }
}

impl VertexConfig {
    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let auth = if let Some(key) = lookup("VERTEX_APIKEY").filter(|v| !v.is_empty()) {
            VertexAuth::ApiKey(key)
        } else if let Some(token) = lookup("VERTEX_BEARER_TOKEN").filter(|v| !v.is_empty()) {
            VertexAuth::BearerToken(token)
        } else if lookup("VERTEX_USE_OAUTH").is_some_and(|v| is_truthy(&v)) {
            VertexAuth::OAuth(service_account_source(lookup)?)
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            auth,
            project: lookup("VERTEX_PROJECT").filter(|v| !v.is_empty()),
            location: lookup("VERTEX_LOCATION")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_vertex_location),
            endpoint_override: lookup("VERTEX_ENDPOINT").filter(|v| !v.is_empty()),
        }))
    }
}

fn service_account_source(lookup: &dyn Fn(&str) -> Option<String>) -> Result<ServiceAccountSource> {
    if let Some(inline) = lookup("GOOGLE_APPLICATION_CREDENTIALS_JSON").filter(|v| !v.is_empty()) {
        return Ok(ServiceAccountSource::InlineJson(inline));
    }
    if let Some(path) = lookup("GOOGLE_APPLICATION_CREDENTIALS").filter(|v| !v.is_empty()) {
        return Ok(ServiceAccountSource::Path(PathBuf::from(path)));
    }
    if let Some(path) = lookup("VERTEX_SA_PATH").filter(|v| !v.is_empty()) {
        return Ok(ServiceAccountSource::Path(PathBuf::from(path)));
    }
    Err(Error::Config(
        "VERTEX_USE_OAUTH is set but no credentials were found; set \
         GOOGLE_APPLICATION_CREDENTIALS_JSON, GOOGLE_APPLICATION_CREDENTIALS, or VERTEX_SA_PATH"
            .to_string(),
    ))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Normalize an MCP path: leading slash required, trailing slash stripped.
///
/// Both `/mcp` and `/mcp/` are served; routing registers the two forms from
/// the normalized one.
pub fn normalize_mcp_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Err(Error::Config(format!("Invalid MCP_PATH value: {raw:?}")));
    }

    let with_lead = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };

    Ok(with_lead.trim_end_matches('/').to_string())
}
