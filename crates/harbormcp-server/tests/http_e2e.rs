//! End-to-end HTTP: the streamable HTTP client transport against a live
//! listener, plus raw-wire checks of the POST gates, session lifecycle,
//! and the management sweep.

use std::sync::Arc;
use std::time::Duration;

use harbormcp_client::{ClientError, Connector, NotificationHandler};
use harbormcp_protocol::ProtocolError;
use harbormcp_server::{HttpServerConfig, McpService, demo, http};
use harbormcp_transport::{HttpConfig, StreamableHttpTransport};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::sleep;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

async fn spawn_server(config: HttpServerConfig) -> (String, McpService) {
    let service = demo::demo_service();
    let router = http::router(service.clone(), config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        http::serve(listener, router, std::future::pending()).await.unwrap();
    });
    (format!("http://{addr}"), service)
}

fn connector_for(base_url: &str) -> Connector {
    let transport = StreamableHttpTransport::new(HttpConfig::new(base_url));
    Connector::new("http-demo", Box::new(transport))
}

#[tokio::test]
async fn initialize_and_echo_over_http() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let connector = connector_for(&base_url);

    let init = connector.connect().await.unwrap();
    assert_eq!(init.server_info.name, "harbormcp-demo");

    let mut args = serde_json::Map::new();
    args.insert("text".to_string(), json!("hello http"));
    let result = connector.call_tool("echo", Some(args)).await.unwrap();
    assert!(!result.is_error);

    let tools = connector.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "echo"));

    connector.disconnect().await.unwrap();
}

#[tokio::test]
async fn post_gates_reject_in_order() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let url = format!("{base_url}/mcp");
    let initialize_body = json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "raw", "version": "0"}
        }
    })
    .to_string();

    // Accept missing text/event-stream: 406.
    let response = http
        .post(&url)
        .header("accept", "application/json")
        .header("content-type", "application/json")
        .body(initialize_body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 406);

    // Wrong content type: 415.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "text/plain")
        .body(initialize_body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);

    // Bad protocol version header: 400 with a JSON-RPC error body.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .header("Mcp-Protocol-Version", "1999-01-01")
        .body(initialize_body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["data"]["supported"].is_array());

    // Unparseable body: 400 with a parse error.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    // Non-initialize request without a session: 400.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .header("Mcp-Protocol-Version", "2025-06-18")
        .body(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

async fn raw_initialize(http: &reqwest::Client, url: &str) -> String {
    let response = http
        .post(url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .body(
            json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": {"name": "raw", "version": "0"}
                }
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("text/event-stream")
    );
    response
        .headers()
        .get("Mcp-Session-Id")
        .expect("initialize issues a session id")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn initialize_must_not_carry_a_session_and_unknown_sessions_404() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let url = format!("{base_url}/mcp");

    let session_id = raw_initialize(&http, &url).await;

    // A second initialize echoing the session id is rejected.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .header("Mcp-Session-Id", &session_id)
        .body(
            json!({
                "jsonrpc": "2.0", "id": 0, "method": "initialize",
                "params": {
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": {"name": "raw", "version": "0"}
                }
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown session id on a normal request: 404.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .header("Mcp-Protocol-Version", "2025-06-18")
        .header("Mcp-Session-Id", "ffffffffffffffffffffffffffffffff")
        .body(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Unknown method on a live session: 404 with the JSON-RPC error.
    let response = http
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .header("Mcp-Protocol-Version", "2025-06-18")
        .header("Mcp-Session-Id", &session_id)
        .body(json!({"jsonrpc": "2.0", "id": 3, "method": "no/such/method"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn unsupported_protocol_version_in_initialize_body_fails_with_supported_set() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{base_url}/mcp"))
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .body(
            json!({
                "jsonrpc": "2.0", "id": 0, "method": "initialize",
                "params": {
                    "protocolVersion": "1999-01-01",
                    "capabilities": {},
                    "clientInfo": {"name": "raw", "version": "0"}
                }
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.headers().get("Mcp-Session-Id").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["data"]["supported"].is_array());
}

#[tokio::test]
async fn delete_terminates_once_and_is_idempotent() {
    let (base_url, service) = spawn_server(HttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let url = format!("{base_url}/mcp");

    let session_id = raw_initialize(&http, &url).await;
    assert_eq!(service.sessions().count(), 1);

    for _ in 0..2 {
        let response = http
            .delete(&url)
            .header("Mcp-Session-Id", &session_id)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    assert_eq!(service.sessions().count(), 0);
}

#[tokio::test]
async fn health_endpoint_is_always_healthy() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let response = reqwest::get(format!("{base_url}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn management_cleanup_sweeps_idle_sessions_behind_its_token() {
    let config = HttpServerConfig {
        management_token: Some("mgmt-secret".to_string()),
        ..Default::default()
    };
    let (base_url, service) = spawn_server(config).await;
    let http = reqwest::Client::new();
    let url = format!("{base_url}/mcp");

    raw_initialize(&http, &url).await;
    raw_initialize(&http, &url).await;
    assert_eq!(service.sessions().count(), 2);

    // Without the token the endpoint refuses.
    let response = http
        .post(format!("{base_url}/management/cleanup"))
        .json(&json!({ "inactivityTimeoutMs": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    sleep(Duration::from_millis(50)).await;
    let response = http
        .post(format!("{base_url}/management/cleanup"))
        .bearer_auth("mgmt-secret")
        .json(&json!({ "inactivityTimeoutMs": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sessionsRemoved"], 2);
    assert_eq!(body["activeSessions"], 0);
}

struct Recorder {
    methods: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl NotificationHandler for Recorder {
    async fn on_notification(
        &self,
        method: &str,
        _params: Option<Value>,
    ) -> Result<(), ProtocolError> {
        self.methods.lock().push(method.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn list_changed_reaches_the_side_channel() {
    let (base_url, service) = spawn_server(HttpServerConfig::default()).await;
    let connector = connector_for(&base_url);

    let methods = Arc::new(Mutex::new(Vec::new()));
    connector.update_handlers(|handlers| {
        handlers.notification = Some(Arc::new(Recorder {
            methods: Arc::clone(&methods),
        }));
    });
    connector.connect().await.unwrap();

    // Give the GET side channel a moment to attach, then mutate the
    // registry.
    sleep(Duration::from_millis(200)).await;
    service.add_tool(
        harbormcp_protocol::types::Tool {
            name: "late-tool".to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
        },
        Arc::new(NoopTool),
    );

    sleep(Duration::from_millis(300)).await;
    assert!(
        methods
            .lock()
            .iter()
            .any(|m| m == "notifications/tools/list_changed"),
        "expected a list_changed notification, saw {:?}",
        methods.lock()
    );

    connector.disconnect().await.unwrap();
}

struct NoopTool;

#[async_trait::async_trait]
impl harbormcp_server::ToolHandler for NoopTool {
    async fn call(
        &self,
        _arguments: Option<serde_json::Map<String, Value>>,
        _ctx: &harbormcp_server::ToolContext,
    ) -> Result<harbormcp_protocol::types::CallToolResult, ProtocolError> {
        Ok(harbormcp_protocol::types::CallToolResult::text("noop"))
    }
}

#[tokio::test]
async fn progress_frames_precede_the_tool_result() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let connector = connector_for(&base_url);

    let progress = Arc::new(Mutex::new(Vec::new()));
    connector.update_handlers(|handlers| {
        handlers.notification = Some(Arc::new(ProgressRecorder {
            frames: Arc::clone(&progress),
        }));
    });
    connector.connect().await.unwrap();

    let mut args = serde_json::Map::new();
    args.insert("to".to_string(), json!(3));
    let result = connector
        .call_tool_with_progress(
            "count",
            Some(args),
            harbormcp_protocol::types::ProgressToken::Number(42),
        )
        .await
        .unwrap();
    assert!(!result.is_error);

    // The POST stream delivers every frame before the final response, and
    // the connector's single pump dispatches them in that order, so all
    // three are recorded by the time the call resolves.
    let frames = progress.lock().clone();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["progressToken"], json!(42));
    assert_eq!(frames[0]["progress"], json!(1.0));
    assert_eq!(frames[2]["progress"], json!(3.0));
    assert_eq!(frames[2]["total"], json!(3.0));

    connector.disconnect().await.unwrap();
}

struct ProgressRecorder {
    frames: Arc<Mutex<Vec<Value>>>,
}

#[async_trait::async_trait]
impl NotificationHandler for ProgressRecorder {
    async fn on_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ProtocolError> {
        if method == "notifications/progress"
            && let Some(params) = params
        {
            self.frames.lock().push(params);
        }
        Ok(())
    }
}

#[tokio::test]
async fn subscription_round_trip_and_resource_errors() {
    let (base_url, _service) = spawn_server(HttpServerConfig::default()).await;
    let connector = connector_for(&base_url);
    connector.connect().await.unwrap();

    connector
        .subscribe_resource("memo://greeting")
        .await
        .unwrap();
    connector
        .unsubscribe_resource("memo://greeting")
        .await
        .unwrap();

    let err = connector
        .subscribe_resource("memo://missing")
        .await
        .unwrap_err();
    match err {
        ClientError::Protocol(e) => assert_eq!(e.code, -32002),
        other => panic!("expected resource-not-found, got {other:?}"),
    }

    connector.disconnect().await.unwrap();
}

#[tokio::test]
async fn pagination_is_transparent_to_the_client() {
    let (base_url, service) = spawn_server(HttpServerConfig::default()).await;
    // Three tools, one per page.
    service.add_tool(
        harbormcp_protocol::types::Tool {
            name: "tool-b".to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
        },
        Arc::new(NoopTool),
    );
    service.add_tool(
        harbormcp_protocol::types::Tool {
            name: "tool-c".to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
        },
        Arc::new(NoopTool),
    );
    service.set_page_size(Some(1));

    let connector = connector_for(&base_url);
    connector.connect().await.unwrap();

    let tools = connector.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "count", "tool-b", "tool-c"]);

    connector.disconnect().await.unwrap();
}
