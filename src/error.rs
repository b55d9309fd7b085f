//! Custom error types for the connector

use thiserror::Error;

/// Main error type for connector operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Weaviate error: {0}")]
    Weaviate(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vertex AI error: {0}")]
    Vertex(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Unknown or expired image id: {0}")]
    ImageNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for the connector
pub type Result<T> = std::result::Result<T, Error>;
