//! MCP tool definitions and handlers
//!
//! Tool-level failures (bad arguments, unknown collections, upstream
//! errors) come back as `isError` tool results rather than JSON-RPC
//! errors, so a calling agent can apply its own retry policy.

use super::server::AppState;
use super::types::{ToolDefinition, ToolResult};
use crate::error::Error;
use crate::weaviate::SearchHit;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 100;
const DEFAULT_HYBRID_ALPHA: f64 = 0.5;

/// Get all available tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_config".to_string(),
            description: "Show the current connector configuration. Sensitive values are reported as booleans, never returned.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "check_connection".to_string(),
            description: "Check whether the Weaviate cluster responds to its readiness probe.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "list_collections".to_string(),
            description: "List existing collections (classes) in the cluster.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "get_schema".to_string(),
            description: "Get the schema/config of a collection.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Collection (class) name"
                    }
                },
                "required": ["collection"]
            }),
        },
        ToolDefinition {
            name: "keyword_search".to_string(),
            description: "Keyword search (BM25F) in a collection.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Collection (class) name"
                    },
                    "query": {
                        "type": "string",
                        "description": "Keyword query text"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 10, max: 100)",
                        "default": 10,
                        "minimum": 1,
                        "maximum": 100
                    }
                },
                "required": ["collection", "query"]
            }),
        },
        ToolDefinition {
            name: "semantic_search".to_string(),
            description: "Semantic (vector) search via nearText. Requires a vectorized collection.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Collection (class) name"
                    },
                    "query": {
                        "type": "string",
                        "description": "Natural-language query text"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 10, max: 100)",
                        "default": 10,
                        "minimum": 1,
                        "maximum": 100
                    }
                },
                "required": ["collection", "query"]
            }),
        },
        ToolDefinition {
            name: "hybrid_search".to_string(),
            description: "Hybrid search (BM25 + vector). alpha: 0 = keyword only, 1 = vector only. Pass image_id from upload_image to search with an image vector.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Collection (class) name"
                    },
                    "query": {
                        "type": "string",
                        "description": "Query text for the keyword leg"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 10, max: 100)",
                        "default": 10,
                        "minimum": 1,
                        "maximum": 100
                    },
                    "alpha": {
                        "type": "number",
                        "description": "Blend between keyword (0) and vector (1) scoring (default: 0.5)",
                        "default": 0.5,
                        "minimum": 0,
                        "maximum": 1
                    },
                    "query_properties": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional: restrict the keyword leg to these properties"
                    },
                    "image_id": {
                        "type": "string",
                        "description": "Optional: id of a previously uploaded image to embed as the vector leg"
                    }
                },
                "required": ["collection", "query"]
            }),
        },
        ToolDefinition {
            name: "upload_image".to_string(),
            description: "Upload an image for later image-based hybrid search. Provide exactly one of image_url, image_path, or image_b64. The returned image_id stays valid for a bounded window.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image_url": {
                        "type": "string",
                        "description": "HTTP(S) URL of the image"
                    },
                    "image_path": {
                        "type": "string",
                        "description": "Local filesystem path of the image"
                    },
                    "image_b64": {
                        "type": "string",
                        "description": "Base64-encoded image payload (data URLs accepted)"
                    }
                }
            }),
        },
    ]
}

/// Handle a tool call
pub async fn handle_tool_call(
    name: &str,
    arguments: &HashMap<String, Value>,
    state: &AppState,
) -> ToolResult {
    match name {
        "get_config" => handle_get_config(state),
        "check_connection" => handle_check_connection(state).await,
        "list_collections" => handle_list_collections(state).await,
        "get_schema" => handle_get_schema(arguments, state).await,
        "keyword_search" => handle_keyword_search(arguments, state).await,
        "semantic_search" => handle_semantic_search(arguments, state).await,
        "hybrid_search" => handle_hybrid_search(arguments, state).await,
        "upload_image" => handle_upload_image(arguments, state).await,
        _ => ToolResult::error(format!("Unknown tool: {name}")),
    }
}

fn handle_get_config(state: &AppState) -> ToolResult {
    ToolResult::json(&state.config.sanitized_summary(state.embedder.is_some()))
}

async fn handle_check_connection(state: &AppState) -> ToolResult {
    match state.weaviate.is_ready().await {
        Ok(ready) => ToolResult::json(&json!({ "ready": ready })),
        Err(e) => ToolResult::error(format!("Connection check failed: {e}")),
    }
}

async fn handle_list_collections(state: &AppState) -> ToolResult {
    match state.weaviate.list_collections().await {
        Ok(names) => ToolResult::json(&json!(names)),
        Err(e) => ToolResult::error(format!("Failed to list collections: {e}")),
    }
}

async fn handle_get_schema(arguments: &HashMap<String, Value>, state: &AppState) -> ToolResult {
    let Some(collection) = str_arg(arguments, "collection") else {
        return ToolResult::error("Missing required parameter: collection");
    };

    match state.weaviate.get_schema(collection).await {
        Ok(config) => ToolResult::json(&json!({
            "collection": collection,
            "config": config,
        })),
        Err(Error::CollectionNotFound(_)) => {
            ToolResult::error(format!("Collection '{collection}' not found"))
        }
        Err(e) => ToolResult::error(format!("Failed to fetch schema: {e}")),
    }
}

async fn handle_keyword_search(arguments: &HashMap<String, Value>, state: &AppState) -> ToolResult {
    let Some(collection) = str_arg(arguments, "collection") else {
        return ToolResult::error("Missing required parameter: collection");
    };
    let Some(query) = str_arg(arguments, "query") else {
        return ToolResult::error("Missing required parameter: query");
    };
    let limit = limit_arg(arguments);

    match state.weaviate.keyword_search(collection, query, limit).await {
        Ok(hits) => {
            let results: Vec<Value> = hits
                .iter()
                .map(|hit| {
                    json!({
                        "uuid": hit.uuid,
                        "properties": hit.properties,
                        "bm25_score": hit.score,
                    })
                })
                .collect();
            ToolResult::json(&json!({ "count": results.len(), "results": results }))
        }
        Err(e) => search_error(collection, e),
    }
}

async fn handle_semantic_search(
    arguments: &HashMap<String, Value>,
    state: &AppState,
) -> ToolResult {
    let Some(collection) = str_arg(arguments, "collection") else {
        return ToolResult::error("Missing required parameter: collection");
    };
    let Some(query) = str_arg(arguments, "query") else {
        return ToolResult::error("Missing required parameter: query");
    };
    let limit = limit_arg(arguments);

    match state.weaviate.semantic_search(collection, query, limit).await {
        Ok(hits) => {
            let results: Vec<Value> = hits
                .iter()
                .map(|hit| {
                    json!({
                        "uuid": hit.uuid,
                        "properties": hit.properties,
                        "distance": hit.distance,
                    })
                })
                .collect();
            ToolResult::json(&json!({ "count": results.len(), "results": results }))
        }
        Err(e) => search_error(collection, e),
    }
}

async fn handle_hybrid_search(arguments: &HashMap<String, Value>, state: &AppState) -> ToolResult {
    let Some(collection) = str_arg(arguments, "collection") else {
        return ToolResult::error("Missing required parameter: collection");
    };
    let Some(query) = str_arg(arguments, "query") else {
        return ToolResult::error("Missing required parameter: query");
    };
    let limit = limit_arg(arguments);

    let alpha = arguments
        .get("alpha")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_HYBRID_ALPHA)
        .clamp(0.0, 1.0);

    let query_properties = parse_string_array(arguments.get("query_properties"));

    let vector = match str_arg(arguments, "image_id") {
        Some(raw) => match resolve_image_vector(raw, state).await {
            Ok(vector) => Some(vector),
            Err(result) => return result,
        },
        None => None,
    };

    let search = state
        .weaviate
        .hybrid_search(
            collection,
            query,
            limit,
            alpha,
            query_properties.as_deref(),
            vector.as_deref(),
        )
        .await;

    match search {
        Ok(hits) => {
            let results: Vec<Value> = hits.iter().map(hybrid_hit_json).collect();
            ToolResult::json(&json!({ "count": results.len(), "results": results }))
        }
        Err(e) => search_error(collection, e),
    }
}

/// Resolve an image_id argument into an embedding vector, or the tool
/// error to return instead.
async fn resolve_image_vector(raw: &str, state: &AppState) -> Result<Vec<f32>, ToolResult> {
    let image_id = Uuid::parse_str(raw)
        .map_err(|_| ToolResult::error(format!("Invalid image_id: {raw}")))?;

    let stored = state
        .images
        .get(&image_id)
        .await
        .map_err(|_| ToolResult::error(format!("Unknown or expired image id: {image_id}")))?;

    let embedder = state.embedder.as_ref().ok_or_else(|| {
        ToolResult::error("Vertex AI is not configured; image search is unavailable")
    })?;

    embedder
        .embed_image(&stored.bytes)
        .await
        .map_err(|e| ToolResult::error(format!("Image embedding failed: {e}")))
}

fn hybrid_hit_json(hit: &SearchHit) -> Value {
    json!({
        "uuid": hit.uuid,
        "properties": hit.properties,
        "bm25_score": hit.score,
        "distance": hit.distance,
    })
}

async fn handle_upload_image(arguments: &HashMap<String, Value>, state: &AppState) -> ToolResult {
    let url = str_arg(arguments, "image_url");
    let path = str_arg(arguments, "image_path");
    let b64 = str_arg(arguments, "image_b64");

    let receipt = match (url, path, b64) {
        (Some(url), None, None) => state.images.insert_from_url(url).await,
        (None, Some(path), None) => state.images.insert_from_path(path).await,
        (None, None, Some(b64)) => state.images.insert_from_b64(b64).await,
        _ => {
            return ToolResult::error(
                "Provide exactly one of image_url, image_path, or image_b64",
            );
        }
    };

    match receipt {
        Ok(receipt) => ToolResult::json(&receipt),
        Err(e) => ToolResult::error(format!("Image upload failed: {e}")),
    }
}

fn search_error(collection: &str, error: Error) -> ToolResult {
    match error {
        Error::CollectionNotFound(_) => {
            ToolResult::error(format!("Collection '{collection}' not found"))
        }
        e => ToolResult::error(format!("Search failed: {e}")),
    }
}

fn str_arg<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}

fn limit_arg(arguments: &HashMap<String, Value>) -> usize {
    arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| (v as usize).clamp(1, MAX_SEARCH_LIMIT))
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
}

fn parse_string_array(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(|v| {
        v.as_array().map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect::<Vec<_>>()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Result;
    use crate::images::ImageStore;
    use crate::mcp::types::ToolContent;
    use crate::vertex::ImageEmbedder;
    use crate::weaviate::WeaviateClient;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n0000000000";

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl ImageEmbedder for FixedEmbedder {
        async fn embed_image(&self, _bytes: &[u8]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn state_for(weaviate_url: &str, embedder: Option<Arc<dyn ImageEmbedder>>) -> AppState {
        let lookup = {
            let url = weaviate_url.to_string();
            move |key: &str| match key {
                "WEAVIATE_URL" => Some(url.clone()),
                "WEAVIATE_API_KEY" => Some("test-key".to_string()),
                _ => None,
            }
        };
        let config = Config::from_lookup(&lookup).unwrap();
        let weaviate = WeaviateClient::new(&config.weaviate_url, &config.weaviate_api_key).unwrap();
        let images = ImageStore::new(config.image_ttl, config.max_image_bytes).unwrap();

        AppState {
            config: Arc::new(config),
            weaviate: Arc::new(weaviate),
            images: Arc::new(images),
            embedder,
        }
    }

    fn args(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn result_text(result: &ToolResult) -> &str {
        let ToolContent::Text { text } = &result.content[0];
        text
    }

    async fn mount_sinde_schema(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/schema/Sinde"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "class": "Sinde",
                "properties": [
                    { "name": "name", "dataType": ["text"] },
                    { "name": "source_pdf", "dataType": ["text"] },
                    { "name": "page_index", "dataType": ["int"] },
                    { "name": "mediaType", "dataType": ["text"] }
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let state = state_for("https://cluster.invalid", None);
        let result = handle_tool_call("nope", &HashMap::new(), &state).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn get_config_reports_booleans_only() {
        let state = state_for("https://cluster.invalid", None);
        let result = handle_tool_call("get_config", &HashMap::new(), &state).await;
        let text = result_text(&result);
        assert!(text.contains("\"weaviate_api_key_set\": true"));
        assert!(text.contains("\"vertex_configured\": false"));
        assert!(!text.contains("test-key"));
    }

    #[tokio::test]
    async fn search_requires_collection_and_query() {
        let state = state_for("https://cluster.invalid", None);

        let result = handle_tool_call("keyword_search", &args(json!({})), &state).await;
        assert!(result_text(&result).contains("collection"));

        let result =
            handle_tool_call("keyword_search", &args(json!({"collection": "Sinde"})), &state).await;
        assert!(result_text(&result).contains("query"));
    }

    #[tokio::test]
    async fn get_schema_reports_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/schema/Missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let state = state_for(&server.uri(), None);
        let result =
            handle_tool_call("get_schema", &args(json!({"collection": "Missing"})), &state).await;
        assert_eq!(result.is_error, Some(true));
        assert!(result_text(&result).contains("'Missing' not found"));
    }

    #[tokio::test]
    async fn upload_image_requires_exactly_one_source() {
        let state = state_for("https://cluster.invalid", None);

        let none = handle_tool_call("upload_image", &args(json!({})), &state).await;
        assert!(result_text(&none).contains("exactly one"));

        let two = handle_tool_call(
            "upload_image",
            &args(json!({"image_b64": "aaaa", "image_url": "https://x/y.png"})),
            &state,
        )
        .await;
        assert!(result_text(&two).contains("exactly one"));
    }

    #[tokio::test]
    async fn upload_then_hybrid_search_with_image_vector() {
        let server = MockServer::start().await;
        mount_sinde_schema(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/graphql"))
            .and(body_string_contains("alpha: 0.9"))
            .and(body_string_contains("vector: [0.1, 0.2]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "Get": { "Sinde": [
                    {
                        "name": "Hinge",
                        "_additional": { "id": "u-9", "score": "0.8", "distance": 0.2 }
                    }
                ]}}
            })))
            .mount(&server)
            .await;

        let state = state_for(
            &server.uri(),
            Some(Arc::new(FixedEmbedder(vec![0.1, 0.2]))),
        );

        let upload = handle_tool_call(
            "upload_image",
            &args(json!({"image_b64": STANDARD.encode(PNG_BYTES)})),
            &state,
        )
        .await;
        assert_eq!(upload.is_error, None);
        let receipt: Value = serde_json::from_str(result_text(&upload)).unwrap();
        let image_id = receipt["image_id"].as_str().unwrap().to_string();

        let search = handle_tool_call(
            "hybrid_search",
            &args(json!({
                "collection": "Sinde",
                "query": "hinge",
                "alpha": 0.9,
                "image_id": image_id,
            })),
            &state,
        )
        .await;
        assert_eq!(search.is_error, None);
        let body: Value = serde_json::from_str(result_text(&search)).unwrap();
        assert_eq!(body["count"], json!(1));
        assert_eq!(body["results"][0]["uuid"], json!("u-9"));
        assert_eq!(body["results"][0]["bm25_score"], json!(0.8));
    }

    #[tokio::test]
    async fn hybrid_alpha_is_clamped() {
        let server = MockServer::start().await;
        mount_sinde_schema(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/graphql"))
            .and(body_string_contains("alpha: 1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "Get": { "Sinde": [] } }
            })))
            .mount(&server)
            .await;

        let state = state_for(&server.uri(), None);
        let result = handle_tool_call(
            "hybrid_search",
            &args(json!({"collection": "Sinde", "query": "x", "alpha": 5.0})),
            &state,
        )
        .await;
        assert_eq!(result.is_error, None);
    }

    #[tokio::test]
    async fn image_search_without_vertex_is_an_error() {
        let state = state_for("https://cluster.invalid", None);
        let receipt = state
            .images
            .insert_from_b64(&STANDARD.encode(PNG_BYTES))
            .await
            .unwrap();

        let result = handle_tool_call(
            "hybrid_search",
            &args(json!({
                "collection": "Sinde",
                "query": "x",
                "image_id": receipt.image_id.to_string(),
            })),
            &state,
        )
        .await;
        assert!(result_text(&result).contains("Vertex AI is not configured"));
    }

    #[tokio::test]
    async fn expired_or_unknown_image_id_is_an_error() {
        let state = state_for("https://cluster.invalid", None);
        let result = handle_tool_call(
            "hybrid_search",
            &args(json!({
                "collection": "Sinde",
                "query": "x",
                "image_id": Uuid::new_v4().to_string(),
            })),
            &state,
        )
        .await;
        assert!(result_text(&result).contains("Unknown or expired image id"));

        let bad = handle_tool_call(
            "hybrid_search",
            &args(json!({"collection": "Sinde", "query": "x", "image_id": "not-a-uuid"})),
            &state,
        )
        .await;
        assert!(result_text(&bad).contains("Invalid image_id"));
    }

    #[test]
    fn definitions_cover_all_tools() {
        let names: Vec<String> = get_tool_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "get_config",
                "check_connection",
                "list_collections",
                "get_schema",
                "keyword_search",
                "semantic_search",
                "hybrid_search",
                "upload_image",
            ]
        );
    }
}
