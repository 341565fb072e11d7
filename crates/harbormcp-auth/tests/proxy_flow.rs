//! End-to-end proxy flow: register, authorize, callback, token exchange
//! with PKCE, introspection enrichment, and revocation, against a wiremock
//! upstream authorization server.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harbormcp_auth::proxy::{
    MemoryProxyStore, OAuthProxy, ProxyConfig, ProxyStore, UpstreamConfig, s256_challenge,
    sha256_hex,
};

const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

async fn proxy_against(upstream: &MockServer) -> (OAuthProxy, Arc<MemoryProxyStore>) {
    let store = Arc::new(MemoryProxyStore::new());
    let config = ProxyConfig::new(
        "https://proxy.example.com",
        "0123456789abcdef0123456789abcdef",
        UpstreamConfig {
            issuer: upstream.uri(),
            authorization_endpoint: format!("{}/authorize", upstream.uri()),
            token_endpoint: format!("{}/token", upstream.uri()),
            introspection_endpoint: format!("{}/introspect", upstream.uri()),
            revocation_endpoint: None,
            client_id: "proxy-at-upstream".to_string(),
            client_secret: "upstream-secret".to_string(),
        },
    );
    let proxy = OAuthProxy::new(config, store.clone()).unwrap();
    (proxy, store)
}

async fn send(proxy: &OAuthProxy, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = proxy.router().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

async fn register_client(proxy: &OAuthProxy) -> (String, String) {
    let request = Request::post("/oauth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "redirect_uris": ["https://app/cb"],
                "grant_types": ["authorization_code", "refresh_token"],
                "client_name": "e2e client"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(proxy, request).await;
    assert_eq!(status, StatusCode::CREATED);

    let client_id = body["client_id"].as_str().unwrap().to_string();
    let client_secret = body["client_secret"].as_str().unwrap().to_string();
    assert!(client_id.starts_with("proxy_"));
    assert_eq!(client_id.len(), "proxy_".len() + 32);
    assert_eq!(client_secret.len(), 64);
    (client_id, client_secret)
}

/// Run authorize + callback and return the code delivered to the client.
async fn obtain_code(proxy: &OAuthProxy, client_id: &str) -> String {
    let challenge = s256_challenge(VERIFIER);
    let authorize_uri = format!(
        "/oauth/authorize?client_id={client_id}&redirect_uri=https://app/cb\
         &response_type=code&state=client-state-1&code_challenge={challenge}\
         &code_challenge_method=S256&scope=mcp:read"
    );
    let (status, headers, _) = send(
        proxy,
        Request::get(&authorize_uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);

    // The upstream redirect carries the proxy's identity and a state JWT.
    let location = Url::parse(headers[header::LOCATION].to_str().unwrap()).unwrap();
    let pairs: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(pairs["client_id"], "proxy-at-upstream");
    assert_eq!(pairs["redirect_uri"], "https://proxy.example.com/oauth/callback");
    let state_jwt = pairs["state"].clone();
    assert_eq!(state_jwt.matches('.').count(), 2, "state must be a JWT");

    let (status, headers, _) = send(
        proxy,
        Request::get(format!("/oauth/callback?code=upstream-code-1&state={state_jwt}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);

    let location = Url::parse(headers[header::LOCATION].to_str().unwrap()).unwrap();
    assert!(location.as_str().starts_with("https://app/cb"));
    let pairs: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(pairs["state"], "client-state-1");
    pairs["code"].clone()
}

fn token_request(client_id: &str, client_secret: &str, body: String) -> Request<Body> {
    use base64::Engine;
    let basic =
        base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{client_secret}"));
    Request::post("/oauth/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::AUTHORIZATION, format!("Basic {basic}"))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn full_token_exchange_with_pkce() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_secret=upstream-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "upstream-access-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "upstream-refresh-1"
        })))
        .mount(&upstream)
        .await;

    let (proxy, store) = proxy_against(&upstream).await;
    let (client_id, client_secret) = register_client(&proxy).await;
    let code = obtain_code(&proxy, &client_id).await;

    let (status, _, body) = send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!(
                "grant_type=authorization_code&code={code}\
                 &redirect_uri=https://app/cb&code_verifier={VERIFIER}"
            ),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "upstream-access-1");
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["expires_in"].as_u64().unwrap() > 0);

    // The raw token is never persisted; its hash maps to the local client.
    let mapping = store
        .get_token(&sha256_hex("upstream-access-1"))
        .await
        .unwrap()
        .expect("access token mapping stored");
    assert_eq!(mapping.client_id_local, client_id);
    assert!(store
        .get_token(&sha256_hex("upstream-refresh-1"))
        .await
        .unwrap()
        .is_some());

    // The code was consumed; replaying it is an invalid grant.
    let (status, _, body) = send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!(
                "grant_type=authorization_code&code={code}\
                 &redirect_uri=https://app/cb&code_verifier={VERIFIER}"
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn pkce_mismatch_is_invalid_grant() {
    let upstream = MockServer::start().await;
    let (proxy, _store) = proxy_against(&upstream).await;
    let (client_id, client_secret) = register_client(&proxy).await;
    let code = obtain_code(&proxy, &client_id).await;

    let (status, _, body) = send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!(
                "grant_type=authorization_code&code={code}\
                 &redirect_uri=https://app/cb&code_verifier=wrong-verifier-value"
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn missing_verifier_is_invalid_grant_when_challenge_recorded() {
    let upstream = MockServer::start().await;
    let (proxy, _store) = proxy_against(&upstream).await;
    let (client_id, client_secret) = register_client(&proxy).await;
    let code = obtain_code(&proxy, &client_id).await;

    let (status, _, body) = send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!("grant_type=authorization_code&code={code}&redirect_uri=https://app/cb"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn wrong_client_secret_is_rejected() {
    let upstream = MockServer::start().await;
    let (proxy, _store) = proxy_against(&upstream).await;
    let (client_id, _client_secret) = register_client(&proxy).await;

    let (status, _, body) = send(
        &proxy,
        token_request(
            &client_id,
            "not-the-secret",
            "grant_type=authorization_code&code=whatever".to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn introspection_is_enriched_with_the_local_client_id() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "upstream-access-2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "client_id": "proxy-at-upstream",
            "scope": "mcp:read"
        })))
        .mount(&upstream)
        .await;

    let (proxy, _store) = proxy_against(&upstream).await;
    let (client_id, client_secret) = register_client(&proxy).await;
    let code = obtain_code(&proxy, &client_id).await;

    let (status, _, _) = send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!(
                "grant_type=authorization_code&code={code}\
                 &redirect_uri=https://app/cb&code_verifier={VERIFIER}"
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &proxy,
        Request::post("/oauth/introspect")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("token=upstream-access-2"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    // The upstream reported its own client id; the proxy overwrites it.
    assert_eq!(body["client_id"], client_id.as_str());
}

#[tokio::test]
async fn revoke_always_succeeds_and_destroys_the_mapping() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "upstream-access-3",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&upstream)
        .await;

    let (proxy, store) = proxy_against(&upstream).await;
    let (client_id, client_secret) = register_client(&proxy).await;
    let code = obtain_code(&proxy, &client_id).await;
    send(
        &proxy,
        token_request(
            &client_id,
            &client_secret,
            format!(
                "grant_type=authorization_code&code={code}\
                 &redirect_uri=https://app/cb&code_verifier={VERIFIER}"
            ),
        ),
    )
    .await;
    assert!(store
        .get_token(&sha256_hex("upstream-access-3"))
        .await
        .unwrap()
        .is_some());

    let (status, _, _) = send(
        &proxy,
        Request::post("/oauth/revoke")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("token=upstream-access-3"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(store
        .get_token(&sha256_hex("upstream-access-3"))
        .await
        .unwrap()
        .is_none());

    // Revoking an unknown token is still a 200.
    let (status, _, _) = send(
        &proxy,
        Request::post("/oauth/revoke")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("token=never-issued"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn metadata_advertises_the_proxy_and_names_the_upstream() {
    let upstream = MockServer::start().await;
    let (proxy, _store) = proxy_against(&upstream).await;

    let (status, _, body) = send(
        &proxy,
        Request::get("/.well-known/oauth-authorization-server")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"], "https://proxy.example.com");
    assert_eq!(body["x-upstream-issuer"], upstream.uri());
    assert_eq!(body["response_types_supported"], json!(["code"]));
    assert_eq!(
        body["code_challenge_methods_supported"],
        json!(["S256", "plain"])
    );

    let (status, _, body) = send(
        &proxy,
        Request::get("/.well-known/oauth-protected-resource")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bearer_methods_supported"], json!(["header"]));
}
