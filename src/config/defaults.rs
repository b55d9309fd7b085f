//! Default values for configuration

/// Default listen port (the hosting platform's conventional port)
pub fn default_port() -> u16 {
    10000
}

/// Default bind address
pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default MCP endpoint path
pub fn default_mcp_path() -> String {
    "/mcp/".to_string()
}

/// Default uploaded-image validity window (one hour)
pub fn default_image_ttl_secs() -> u64 {
    3600
}

/// Default maximum accepted image payload (20 MiB)
pub fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

/// Default Vertex AI region
pub fn default_vertex_location() -> String {
    "us-central1".to_string()
}
