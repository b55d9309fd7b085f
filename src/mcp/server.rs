//! Streamable-HTTP MCP server
//!
//! JSON-RPC requests arrive as HTTP POST bodies on the configured MCP
//! path; each gets a single JSON response. Notifications are acknowledged
//! with `202 Accepted`. Two plain routes sit outside the MCP path: the
//! platform liveness probe at `/health` and multipart image upload at
//! `/upload-image`.

use super::tools::{get_tool_definitions, handle_tool_call};
use super::types::{ErrorCode, McpMessage, McpNotification, McpRequest, McpResponse};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::images::ImageStore;
use crate::vertex::ImageEmbedder;
use crate::weaviate::WeaviateClient;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Service identifier reported by /health and initialize
pub const SERVICE_NAME: &str = "weaviate-mcp-http";

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Shared state for all routes and tool handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub weaviate: Arc<WeaviateClient>,
    pub images: Arc<ImageStore>,
    pub embedder: Option<Arc<dyn ImageEmbedder>>,
}

/// MCP server over streamable HTTP
pub struct McpServer {
    state: AppState,
}

impl McpServer {
    pub fn new(
        config: Arc<Config>,
        weaviate: Arc<WeaviateClient>,
        images: Arc<ImageStore>,
        embedder: Option<Arc<dyn ImageEmbedder>>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                weaviate,
                images,
                embedder,
            },
        }
    }

    /// Build the application router.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // the normalized path has no trailing slash; serve both spellings
        let mcp_path = self.state.config.mcp_path.clone();

        Router::new()
            .route("/health", get(health))
            .route("/upload-image", post(upload_image))
            .route(&mcp_path, post(handle_mcp))
            .route(&format!("{mcp_path}/"), post(handle_mcp))
            .layer(DefaultBodyLimit::max(self.state.config.max_image_bytes + 64 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Bind and serve until SIGINT/SIGTERM.
    pub async fn run(&self) -> Result<()> {
        let config = &self.state.config;
        let ip: IpAddr = config
            .host
            .parse()
            .map_err(|_| Error::Config(format!("Invalid HOST value: {}", config.host)))?;
        let addr = SocketAddr::new(ip, config.port);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            "Listening on {addr} (MCP endpoint at {})",
            config.mcp_path
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Liveness probe for the hosting platform
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

/// Multipart image upload (field name `image`)
async fn upload_image(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_json(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart body: {e}"),
                );
            }
        };

        if field.name() != Some("image") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                return error_json(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read image field: {e}"),
                );
            }
        };

        return match state
            .images
            .insert_bytes(data.to_vec(), file_name.as_deref())
            .await
        {
            Ok(receipt) => (StatusCode::OK, Json(json!(receipt))).into_response(),
            Err(e) => error_json(StatusCode::BAD_REQUEST, e.to_string()),
        };
    }

    error_json(
        StatusCode::BAD_REQUEST,
        "multipart field 'image' is required".to_string(),
    )
}

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// MCP endpoint: one JSON-RPC message per POST body
async fn handle_mcp(State(state): State<AppState>, body: String) -> Response {
    let message: McpMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            let response = McpResponse::error_with_code(
                None,
                ErrorCode::ParseError,
                format!("Parse error: {e}"),
            );
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    match message {
        McpMessage::Request(request) => {
            let response = dispatch(&state, request).await;
            Json(response).into_response()
        }
        McpMessage::Notification(notification) => {
            handle_notification(notification);
            StatusCode::ACCEPTED.into_response()
        }
        McpMessage::Response(_) => {
            warn!("Unexpected response message received");
            StatusCode::ACCEPTED.into_response()
        }
    }
}

/// Handle an MCP request
async fn dispatch(state: &AppState, request: McpRequest) -> McpResponse {
    let id = request.id.clone();
    debug!(method = %request.method, "Handling MCP request");

    match request.method.as_str() {
        "initialize" => handle_initialize(id),
        "ping" => McpResponse::success(id, json!({})),
        "tools/list" => McpResponse::success(id, json!({ "tools": get_tool_definitions() })),
        "tools/call" => handle_tools_call(state, id, request.params).await,
        "resources/list" => McpResponse::success(id, json!({ "resources": [] })),
        "prompts/list" => McpResponse::success(id, json!({ "prompts": [] })),
        method => McpResponse::error_with_code(
            id,
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        ),
    }
}

fn handle_initialize(id: Option<Value>) -> McpResponse {
    McpResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

async fn handle_tools_call(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> McpResponse {
    let Some(params) = params else {
        return McpResponse::error_with_code(id, ErrorCode::InvalidParams, "Missing params");
    };

    let Some(name) = params.get("name").and_then(|v| v.as_str()).map(str::to_string) else {
        return McpResponse::error_with_code(id, ErrorCode::InvalidParams, "Missing tool name");
    };

    let arguments: HashMap<String, Value> = params
        .get("arguments")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    debug!(tool = %name, "Calling tool");
    let result = handle_tool_call(&name, &arguments, state).await;

    McpResponse::success(
        id,
        json!({
            "content": result.content,
            "isError": result.is_error
        }),
    )
}

/// Handle notifications (fire-and-forget)
fn handle_notification(notification: McpNotification) {
    match notification.method.as_str() {
        "notifications/initialized" => info!("Client initialized"),
        "notifications/cancelled" => info!("Request cancelled"),
        method => debug!("Unknown notification: {method}"),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n0000000000";

    fn test_state() -> AppState {
        let lookup = |key: &str| match key {
            "WEAVIATE_URL" => Some("https://cluster.invalid".to_string()),
            "WEAVIATE_API_KEY" => Some("test-key".to_string()),
            _ => None,
        };
        let config = Config::from_lookup(&lookup).unwrap();
        let weaviate = WeaviateClient::new(&config.weaviate_url, &config.weaviate_api_key).unwrap();
        let images = ImageStore::new(config.image_ttl, config.max_image_bytes).unwrap();

        AppState {
            config: Arc::new(config),
            weaviate: Arc::new(weaviate),
            images: Arc::new(images),
            embedder: None,
        }
    }

    fn test_router() -> Router {
        McpServer {
            state: test_state(),
        }
        .router()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_service_identity() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "status": "ok", "service": "weaviate-mcp-http" }));
    }

    #[tokio::test]
    async fn mcp_path_serves_both_spellings() {
        for uri in ["/mcp", "/mcp/"] {
            let response = test_router()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(uri)
                        .header("content-type", "application/json")
                        .body(Body::from(
                            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 8);
        }
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let state = test_state();
        let request: McpRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {} }
        }))
        .unwrap();

        let response = dispatch(&state, request).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("weaviate-mcp-http"));
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let state = test_state();
        let request: McpRequest =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":2,"method":"bogus"})).unwrap();
        let response = dispatch(&state, request).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn tools_call_without_params_is_invalid() {
        let state = test_state();
        let request: McpRequest =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":3,"method":"tools/call"})).unwrap();
        let response = dispatch(&state, request).await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_body() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn upload_route_stores_multipart_image() {
        let boundary = "XBOUNDARYX";
        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"image\"; filename=\"figure.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(PNG_BYTES);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload-image")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["image_id"].as_str().is_some());
        assert_eq!(body["media_type"], json!("image/png"));
        assert_eq!(body["expires_in_seconds"], json!(3600));
    }

    #[tokio::test]
    async fn upload_route_requires_image_field() {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{boundary}--\r\n"
        );

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload-image")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("'image' is required"));
    }
}
