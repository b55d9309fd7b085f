//! weaviate-mcp: a streamable-HTTP MCP connector for Weaviate clusters.
//!
//! The server exposes a fixed set of MCP tools (hybrid, keyword and semantic
//! search, image upload, schema inspection) that forward to a managed
//! Weaviate cluster over its REST and GraphQL APIs. Uploaded images can be
//! embedded through Vertex AI so hybrid search runs with an image vector.

pub mod config;
pub mod error;
pub mod images;
pub mod mcp;
pub mod vertex;
pub mod weaviate;
