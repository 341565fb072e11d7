//! Resource-server tests: discovery, cached introspection, scope gating,
//! and the WWW-Authenticate challenge, against a wiremock issuer.

use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harbormcp_auth::{AuthError, ResourceServer, ResourceServerConfig};

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

async fn issuer_with_introspection() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "introspection_endpoint": format!("{}/introspect", server.uri())
        })))
        .mount(&server)
        .await;
    server
}

fn server_for(issuer: &MockServer, required_scopes: &[&str]) -> ResourceServer {
    let mut config = ResourceServerConfig::new(issuer.uri(), "rs-client", "rs-secret");
    config.required_scopes = required_scopes.iter().map(|s| s.to_string()).collect();
    ResourceServer::new(config).unwrap()
}

#[tokio::test]
async fn missing_token_yields_401_challenge() {
    let issuer = issuer_with_introspection().await;
    let server = server_for(&issuer, &["mcp:read"]);

    let err = server.authenticate(&HeaderMap::new()).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingToken));
    assert_eq!(err.status(), 401);

    let challenge = server.challenge(&err);
    assert!(challenge.starts_with("Bearer realm=\"MCP Server\""));
    assert!(challenge.contains("error=\"missing_token\""));
    assert!(challenge.contains("error_description="));
}

#[tokio::test]
async fn active_token_with_required_scopes_authenticates() {
    let issuer = issuer_with_introspection().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:read mcp:write",
            "sub": "user-7",
            "client_id": "app-1"
        })))
        .mount(&issuer)
        .await;

    let server = server_for(&issuer, &["mcp:read"]);
    let context = server.authenticate(&bearer("good-token")).await.unwrap();
    assert_eq!(context.subject.as_deref(), Some("user-7"));
    assert_eq!(context.scopes, vec!["mcp:read", "mcp:write"]);
    assert_eq!(context.client_id.as_deref(), Some("app-1"));
}

#[tokio::test]
async fn missing_scope_yields_403_insufficient_scope() {
    let issuer = issuer_with_introspection().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:other"
        })))
        .mount(&issuer)
        .await;

    let server = server_for(&issuer, &["mcp:read"]);
    let err = server.authenticate(&bearer("scoped-wrong")).await.unwrap_err();
    assert!(matches!(err, AuthError::InsufficientScope { .. }));
    assert_eq!(err.status(), 403);

    let challenge = server.challenge(&err);
    assert!(challenge.contains("Bearer realm=\"MCP Server\""));
    assert!(challenge.contains("error=\"insufficient_scope\""));
    assert!(challenge.contains("scope=\"mcp:read\""));
}

#[tokio::test]
async fn inactive_token_yields_401_and_is_not_cached() {
    let issuer = issuer_with_introspection().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": false })))
        .expect(2)
        .mount(&issuer)
        .await;

    let server = server_for(&issuer, &[]);
    for _ in 0..2 {
        let err = server.authenticate(&bearer("revoked")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert_eq!(err.status(), 401);
    }
    // The .expect(2) on the mock verifies both calls hit the endpoint:
    // inactive results never enter the cache.
}

#[tokio::test]
async fn active_results_are_served_from_cache() {
    let issuer = issuer_with_introspection().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(body_string_contains("token=cached-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:read"
        })))
        .expect(1)
        .mount(&issuer)
        .await;

    let server = server_for(&issuer, &["mcp:read"]);
    for _ in 0..3 {
        server.authenticate(&bearer("cached-token")).await.unwrap();
    }
    // expect(1): the second and third authentications hit the cache.
}

#[tokio::test]
async fn discovery_falls_back_to_openid_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "introspection_endpoint": format!("{}/introspect", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "mcp:read"
        })))
        .mount(&server)
        .await;

    let rs = server_for(&server, &["mcp:read"]);
    rs.authenticate(&bearer("token-a")).await.unwrap();
    // Second token forces another introspection but reuses the memoized
    // endpoint (expect(1) on the discovery mock).
    rs.authenticate(&bearer("token-b")).await.unwrap();
}

#[tokio::test]
async fn explicit_endpoint_override_skips_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom-introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true
        })))
        .mount(&server)
        .await;

    let mut config = ResourceServerConfig::new(server.uri(), "rs-client", "rs-secret");
    config.introspection_endpoint = Some(format!("{}/custom-introspect", server.uri()));
    let rs = ResourceServer::new(config).unwrap();
    rs.authenticate(&bearer("any")).await.unwrap();
}
