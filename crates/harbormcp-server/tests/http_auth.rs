//! Auth wiring over the HTTP transport: the bearer gate in front of the
//! `/mcp` routes and the OAuth proxy mounted beside them.

use std::sync::Arc;

use harbormcp_auth::proxy::{MemoryProxyStore, OAuthProxy, ProxyConfig, UpstreamConfig};
use harbormcp_auth::{ResourceServer, ResourceServerConfig};
use harbormcp_server::{HttpServerConfig, demo, http};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

fn initialize_body() -> String {
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
    .to_string()
}

async fn spawn_protected_server(issuer: &MockServer) -> String {
    let mut auth_config = ResourceServerConfig::new(issuer.uri(), "rs-client", "rs-secret");
    auth_config.introspection_endpoint = Some(format!("{}/introspect", issuer.uri()));
    auth_config.required_scopes = vec!["mcp:read".to_string()];
    let auth = Arc::new(ResourceServer::new(auth_config).unwrap());

    let proxy = OAuthProxy::new(
        ProxyConfig::new(
            issuer.uri(),
            "0123456789abcdef0123456789abcdef",
            UpstreamConfig {
                issuer: issuer.uri(),
                authorization_endpoint: format!("{}/authorize", issuer.uri()),
                token_endpoint: format!("{}/token", issuer.uri()),
                introspection_endpoint: format!("{}/introspect", issuer.uri()),
                revocation_endpoint: None,
                client_id: "proxy-at-upstream".to_string(),
                client_secret: "upstream-secret".to_string(),
            },
        ),
        Arc::new(MemoryProxyStore::new()),
    )
    .unwrap();

    let config = HttpServerConfig {
        auth: Some(auth),
        oauth_proxy: Some(proxy),
        ..Default::default()
    };
    let service = demo::demo_service();
    let router = http::router(service, config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        http::serve(listener, router, std::future::pending()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn missing_token_is_401_with_www_authenticate() {
    let issuer = MockServer::start().await;
    let base_url = spawn_protected_server(&issuer).await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/mcp"))
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .body(initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let challenge = response
        .headers()
        .get("www-authenticate")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(challenge.starts_with("Bearer realm=\"MCP Server\""));
    assert!(challenge.contains("error=\"missing_token\""));
}

#[tokio::test]
async fn scope_gating_yields_403_insufficient_scope() {
    let issuer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(body_string_contains("token=narrow-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:other"
        })))
        .mount(&issuer)
        .await;
    let base_url = spawn_protected_server(&issuer).await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/mcp"))
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .bearer_auth("narrow-token")
        .body(initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let challenge = response
        .headers()
        .get("www-authenticate")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(challenge.contains("error=\"insufficient_scope\""));
    assert!(challenge.contains("scope=\"mcp:read\""));
}

#[tokio::test]
async fn valid_token_passes_the_gate() {
    let issuer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:read",
            "sub": "user-1"
        })))
        .mount(&issuer)
        .await;
    let base_url = spawn_protected_server(&issuer).await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/mcp"))
        .header("accept", ACCEPT_BOTH)
        .header("content-type", "application/json")
        .bearer_auth("broad-token")
        .body(initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("Mcp-Session-Id").is_some());
}

#[tokio::test]
async fn proxy_metadata_is_served_beside_the_protocol_routes() {
    let issuer = MockServer::start().await;
    let base_url = spawn_protected_server(&issuer).await;

    let response = reqwest::get(format!(
        "{base_url}/.well-known/oauth-authorization-server"
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["x-upstream-issuer"], issuer.uri());

    // The health endpoint is never behind the bearer gate.
    let response = reqwest::get(format!("{base_url}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
}
