//! Axum handlers for the proxy's endpoint table.

use axum::Router;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};
use url::Url;

use super::{
    ClientRecord, CodeRecord, OAuthProxy, ProxyInner, RegistrationRequest, StateClaims,
    SUPPORTED_AUTH_METHODS, SUPPORTED_CHALLENGE_METHODS, SUPPORTED_GRANT_TYPES,
    SUPPORTED_RESPONSE_TYPES, TokenKind, TokenRecord, generate_client_id,
    generate_client_secret, hash_client_secret, sha256_hex, validate_registration,
    verify_challenge, verify_client_secret,
};

pub(super) fn router(proxy: OAuthProxy) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(metadata))
        .route(
            "/.well-known/oauth-protected-resource",
            get(resource_metadata),
        )
        .route("/oauth/register", post(register))
        .route("/oauth/clients/{id}", get(client_info))
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .route("/oauth/token", post(token))
        .route("/oauth/introspect", post(introspect))
        .route("/oauth/revoke", post(revoke))
        .with_state(proxy)
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": code, "error_description": description })),
    )
        .into_response()
}

fn redirect_with(uri: &str, pairs: &[(&str, Option<&str>)]) -> Response {
    match Url::parse(uri) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in pairs {
                    if let Some(value) = value {
                        query.append_pair(key, value);
                    }
                }
            }
            Redirect::temporary(url.as_str()).into_response()
        }
        Err(_) => oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect URI is not a valid URL",
        ),
    }
}

async fn metadata(State(proxy): State<OAuthProxy>) -> Json<Value> {
    let base = &proxy.inner.config.base_url;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "introspection_endpoint": format!("{base}/oauth/introspect"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "grant_types_supported": SUPPORTED_GRANT_TYPES,
        "response_types_supported": SUPPORTED_RESPONSE_TYPES,
        "token_endpoint_auth_methods_supported": SUPPORTED_AUTH_METHODS,
        "code_challenge_methods_supported": SUPPORTED_CHALLENGE_METHODS,
        "scopes_supported": proxy.inner.config.scopes_supported,
        "x-upstream-issuer": proxy.inner.config.upstream.issuer,
    }))
}

async fn resource_metadata(State(proxy): State<OAuthProxy>) -> Json<Value> {
    let base = &proxy.inner.config.base_url;
    Json(json!({
        "resource": base,
        "bearer_methods_supported": ["header"],
        "authorization_servers": [base],
        "scopes_supported": proxy.inner.config.scopes_supported,
    }))
}

async fn register(
    State(proxy): State<OAuthProxy>,
    Json(request): Json<RegistrationRequest>,
) -> Response {
    let inner = &proxy.inner;
    let validated = match validate_registration(&inner.config, &request) {
        Ok(validated) => validated,
        Err(e) => return oauth_error(StatusCode::BAD_REQUEST, e.code, &e.description),
    };

    let client_id = generate_client_id();
    let public_client = validated.token_endpoint_auth_method == "none";
    let client_secret = if public_client {
        None
    } else {
        Some(generate_client_secret())
    };
    let now = inner.clock.unix_seconds();

    let record = ClientRecord {
        client_id: client_id.clone(),
        client_secret_hash: client_secret
            .as_deref()
            .map(hash_client_secret)
            .unwrap_or_default(),
        redirect_uris: validated.redirect_uris.clone(),
        grant_types: validated.grant_types.clone(),
        response_types: validated.response_types.clone(),
        token_endpoint_auth_method: validated.token_endpoint_auth_method.clone(),
        scope: validated.scope.clone(),
        client_name: validated.client_name.clone(),
        created_at: now,
    };
    if let Err(e) = inner.store.put_client(record).await {
        error!(error = %e, "failed to persist client registration");
        return oauth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "registration could not be persisted",
        );
    }

    // The secret is returned exactly once; only its hash survives.
    let mut body = json!({
        "client_id": client_id,
        "client_id_issued_at": now,
        "redirect_uris": validated.redirect_uris,
        "grant_types": validated.grant_types,
        "response_types": validated.response_types,
        "token_endpoint_auth_method": validated.token_endpoint_auth_method,
    });
    if let Some(secret) = client_secret {
        body["client_secret"] = json!(secret);
        body["client_secret_expires_at"] = json!(0);
    }
    if let Some(scope) = validated.scope {
        body["scope"] = json!(scope);
    }
    if let Some(name) = validated.client_name {
        body["client_name"] = json!(name);
    }

    (StatusCode::CREATED, Json(body)).into_response()
}

async fn client_info(State(proxy): State<OAuthProxy>, Path(id): Path<String>) -> Response {
    match proxy.inner.store.get_client(&id).await {
        Ok(Some(client)) => Json(json!({
            "client_id": client.client_id,
            "redirect_uris": client.redirect_uris,
            "grant_types": client.grant_types,
            "response_types": client.response_types,
            "token_endpoint_auth_method": client.token_endpoint_auth_method,
            "scope": client.scope,
            "client_name": client.client_name,
            "client_id_issued_at": client.created_at,
        }))
        .into_response(),
        Ok(None) => oauth_error(StatusCode::NOT_FOUND, "invalid_client", "unknown client"),
        Err(e) => {
            error!(error = %e, "client lookup failed");
            oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "client lookup failed",
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    client_id: String,
    redirect_uri: String,
    response_type: Option<String>,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    scope: Option<String>,
}

async fn authorize(State(proxy): State<OAuthProxy>, Query(query): Query<AuthorizeQuery>) -> Response {
    let inner = &proxy.inner;

    let client = match inner.store.get_client(&query.client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "unknown client");
        }
        Err(e) => {
            error!(error = %e, "client lookup failed");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "client lookup failed",
            );
        }
    };

    // Until the redirect URI is validated, errors must not redirect.
    if !client.redirect_uris.contains(&query.redirect_uri) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is not registered for this client",
        );
    }

    let state = query.state.as_deref();
    let response_type = query.response_type.as_deref().unwrap_or("code");
    if response_type != "code" {
        return redirect_with(
            &query.redirect_uri,
            &[
                ("error", Some("unsupported_response_type")),
                ("state", state),
            ],
        );
    }

    let challenge_method = match (&query.code_challenge, &query.code_challenge_method) {
        (Some(_), Some(method)) if !SUPPORTED_CHALLENGE_METHODS.contains(&method.as_str()) => {
            return redirect_with(
                &query.redirect_uri,
                &[
                    ("error", Some("invalid_request")),
                    ("error_description", Some("unsupported code_challenge_method")),
                    ("state", state),
                ],
            );
        }
        (Some(_), Some(method)) => Some(method.clone()),
        // RFC 7636: a challenge with no method means "plain".
        (Some(_), None) => Some("plain".to_string()),
        (None, _) => None,
    };

    let now = inner.clock.unix_seconds();
    let claims = StateClaims {
        cid: client.client_id.clone(),
        ruri: query.redirect_uri.clone(),
        ost: query.state.clone(),
        cc: query.code_challenge.clone(),
        ccm: challenge_method,
        scp: query.scope.clone(),
        ts: now,
        iat: 0,
        exp: 0,
    };
    let state_jwt = match inner.state_codec.encode(claims, now) {
        Ok(jwt) => jwt,
        Err(e) => {
            error!(error = %e, "failed to sign proxy state");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "failed to sign state",
            );
        }
    };

    let mut upstream = match Url::parse(&inner.config.upstream.authorization_endpoint) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "upstream authorization endpoint is not a URL");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "upstream misconfigured",
            );
        }
    };
    {
        let mut pairs = upstream.query_pairs_mut();
        pairs
            .append_pair("response_type", "code")
            .append_pair("client_id", &inner.config.upstream.client_id)
            .append_pair("redirect_uri", &proxy.callback_url())
            .append_pair("state", &state_jwt);
        if let Some(scope) = &query.scope {
            pairs.append_pair("scope", scope);
        }
    }

    debug!(client_id = %client.client_id, "redirecting authorization to upstream");
    Redirect::temporary(upstream.as_str()).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(State(proxy): State<OAuthProxy>, Query(query): Query<CallbackQuery>) -> Response {
    let inner = &proxy.inner;

    let Some(state) = &query.state else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "missing state parameter",
        );
    };
    let claims = match inner.state_codec.decode(state) {
        Ok(claims) => claims,
        Err(e) => {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string());
        }
    };

    // Upstream denial: bounce to the original client untouched.
    if let Some(upstream_error) = &query.error {
        return redirect_with(
            &claims.ruri,
            &[
                ("error", Some(upstream_error.as_str())),
                ("error_description", query.error_description.as_deref()),
                ("state", claims.ost.as_deref()),
            ],
        );
    }

    let Some(code) = &query.code else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "missing code parameter",
        );
    };

    let now = inner.clock.unix_seconds();
    let record = CodeRecord {
        client_id: claims.cid.clone(),
        redirect_uri: claims.ruri.clone(),
        code_challenge: claims.cc.clone(),
        code_challenge_method: claims.ccm.clone(),
        scope: claims.scp.clone(),
        issued_at: now,
        expires_at: now + inner.config.code_ttl.as_secs(),
    };
    if let Err(e) = inner.store.put_code(code, record).await {
        error!(error = %e, "failed to persist authorization code mapping");
        return oauth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "failed to persist authorization code",
        );
    }

    redirect_with(
        &claims.ruri,
        &[("code", Some(code.as_str())), ("state", claims.ost.as_deref())],
    )
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Authenticate the local client from Basic auth or form credentials.
async fn authenticate_client(
    inner: &ProxyInner,
    headers: &HeaderMap,
    form: &TokenForm,
) -> Result<ClientRecord, Response> {
    let (client_id, client_secret) = match basic_credentials(headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            form.client_id.clone().unwrap_or_default(),
            form.client_secret.clone(),
        ),
    };
    if client_id.is_empty() {
        return Err(oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client authentication required",
        ));
    }

    let client = match inner.store.get_client(&client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            return Err(oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "unknown client",
            ));
        }
        Err(e) => {
            error!(error = %e, "client lookup failed");
            return Err(oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "client lookup failed",
            ));
        }
    };

    if client.token_endpoint_auth_method != "none" {
        let Some(secret) = client_secret else {
            return Err(oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "client secret required",
            ));
        };
        if !verify_client_secret(&secret, &client.client_secret_hash) {
            return Err(oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "client authentication failed",
            ));
        }
    }

    Ok(client)
}

async fn forward_token_grant(
    inner: &ProxyInner,
    params: &[(&str, String)],
) -> Result<Value, Response> {
    let response = inner
        .http
        .post(&inner.config.upstream.token_endpoint)
        .form(params)
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, "upstream token request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "server_error",
                    "error_description": format!("upstream token request failed: {e}"),
                    "upstream_error": true,
                })),
            )
                .into_response()
        })?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_else(|_| json!({}));

    if status.is_success() {
        return Ok(body);
    }

    // Surface RFC-shaped upstream errors untouched; wrap anything else.
    if body.get("error").is_some() {
        let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_REQUEST);
        Err((status, Json(body)).into_response())
    } else {
        Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "server_error",
                "error_description": format!("upstream returned {status}"),
                "upstream_error": true,
            })),
        )
            .into_response())
    }
}

async fn store_token_mappings(inner: &ProxyInner, client_id: &str, body: &Value) -> Result<(), Response> {
    let now = inner.clock.unix_seconds();
    if let Some(access) = body.get("access_token").and_then(Value::as_str) {
        let record = TokenRecord {
            client_id_local: client_id.to_string(),
            token_type: TokenKind::Access,
            issued_at: now,
            expires_at: body.get("expires_in").and_then(Value::as_u64).map(|s| now + s),
        };
        inner
            .store
            .put_token(&sha256_hex(access), record)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to persist access token mapping");
                oauth_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "failed to persist token mapping",
                )
            })?;
    }
    if let Some(refresh) = body.get("refresh_token").and_then(Value::as_str) {
        let record = TokenRecord {
            client_id_local: client_id.to_string(),
            token_type: TokenKind::Refresh,
            issued_at: now,
            expires_at: None,
        };
        inner
            .store
            .put_token(&sha256_hex(refresh), record)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to persist refresh token mapping");
                oauth_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "failed to persist token mapping",
                )
            })?;
    }
    Ok(())
}

async fn token(
    State(proxy): State<OAuthProxy>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    let inner = &proxy.inner;
    let client = match authenticate_client(inner, &headers, &form).await {
        Ok(client) => client,
        Err(response) => return response,
    };

    match form.grant_type.as_str() {
        "authorization_code" => {
            let Some(code) = &form.code else {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing code");
            };

            let mapping = match inner.store.take_code(code).await {
                Ok(Some(mapping)) => mapping,
                Ok(None) => {
                    return oauth_error(
                        StatusCode::BAD_REQUEST,
                        "invalid_grant",
                        "authorization code is unknown or already used",
                    );
                }
                Err(e) => {
                    error!(error = %e, "code lookup failed");
                    return oauth_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "code lookup failed",
                    );
                }
            };

            let now = inner.clock.unix_seconds();
            if mapping.expires_at <= now {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "authorization code has expired",
                );
            }
            if mapping.client_id != client.client_id {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "authorization code was issued to another client",
                );
            }
            if let Some(redirect_uri) = &form.redirect_uri
                && redirect_uri != &mapping.redirect_uri
            {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "redirect_uri does not match the authorization request",
                );
            }

            if let Some(challenge) = &mapping.code_challenge {
                let method = mapping.code_challenge_method.as_deref().unwrap_or("plain");
                let Some(verifier) = &form.code_verifier else {
                    return oauth_error(
                        StatusCode::BAD_REQUEST,
                        "invalid_grant",
                        "code_verifier is required",
                    );
                };
                if !verify_challenge(challenge, method, verifier) {
                    return oauth_error(
                        StatusCode::BAD_REQUEST,
                        "invalid_grant",
                        "PKCE verification failed",
                    );
                }
            }

            let params = [
                ("grant_type", "authorization_code".to_string()),
                ("code", code.clone()),
                ("redirect_uri", proxy.callback_url()),
                ("client_id", inner.config.upstream.client_id.clone()),
                ("client_secret", inner.config.upstream.client_secret.clone()),
            ];
            let body = match forward_token_grant(inner, &params).await {
                Ok(body) => body,
                Err(response) => return response,
            };
            if let Err(response) = store_token_mappings(inner, &client.client_id, &body).await {
                return response;
            }
            Json(body).into_response()
        }
        "refresh_token" => {
            let Some(refresh_token) = &form.refresh_token else {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "missing refresh_token",
                );
            };

            let hash = sha256_hex(refresh_token);
            match inner.store.get_token(&hash).await {
                Ok(Some(mapping))
                    if mapping.client_id_local == client.client_id
                        && mapping.token_type == TokenKind::Refresh => {}
                Ok(_) => {
                    return oauth_error(
                        StatusCode::BAD_REQUEST,
                        "invalid_grant",
                        "refresh token is not known to this client",
                    );
                }
                Err(e) => {
                    error!(error = %e, "token lookup failed");
                    return oauth_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "token lookup failed",
                    );
                }
            }

            let params = [
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.clone()),
                ("client_id", inner.config.upstream.client_id.clone()),
                ("client_secret", inner.config.upstream.client_secret.clone()),
            ];
            let body = match forward_token_grant(inner, &params).await {
                Ok(body) => body,
                Err(response) => return response,
            };
            if let Err(response) = store_token_mappings(inner, &client.client_id, &body).await {
                return response;
            }
            Json(body).into_response()
        }
        other => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("grant_type '{other}' is not supported"),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct TokenOnlyForm {
    token: String,
    token_type_hint: Option<String>,
}

async fn introspect(State(proxy): State<OAuthProxy>, Form(form): Form<TokenOnlyForm>) -> Response {
    let inner = &proxy.inner;
    let hint = form.token_type_hint.as_deref().unwrap_or("access_token");

    let response = inner
        .http
        .post(&inner.config.upstream.introspection_endpoint)
        .basic_auth(
            &inner.config.upstream.client_id,
            Some(&inner.config.upstream.client_secret),
        )
        .form(&[("token", form.token.as_str()), ("token_type_hint", hint)])
        .send()
        .await;

    let mut body = match response {
        Ok(response) if response.status().is_success() => response
            .json::<Value>()
            .await
            .unwrap_or_else(|_| json!({ "active": false })),
        Ok(response) => {
            warn!(status = %response.status(), "upstream introspection failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "server_error",
                    "error_description": "upstream introspection failed",
                    "upstream_error": true,
                })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "upstream introspection unreachable");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "server_error",
                    "error_description": format!("upstream introspection unreachable: {e}"),
                    "upstream_error": true,
                })),
            )
                .into_response();
        }
    };

    // Enrich: present the local client id instead of the proxy's upstream
    // identity when a mapping exists.
    if let Ok(Some(mapping)) = inner.store.get_token(&sha256_hex(&form.token)).await {
        body["client_id"] = json!(mapping.client_id_local);
    }

    Json(body).into_response()
}

async fn revoke(State(proxy): State<OAuthProxy>, Form(form): Form<TokenOnlyForm>) -> Response {
    let inner = &proxy.inner;

    if let Some(endpoint) = &inner.config.upstream.revocation_endpoint {
        let result = inner
            .http
            .post(endpoint)
            .basic_auth(
                &inner.config.upstream.client_id,
                Some(&inner.config.upstream.client_secret),
            )
            .form(&[("token", form.token.as_str())])
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "upstream revocation failed");
        }
    }

    // RFC 7009: revocation always succeeds from the caller's view, and the
    // local mapping dies regardless of the upstream outcome.
    if let Err(e) = inner.store.remove_token(&sha256_hex(&form.token)).await {
        warn!(error = %e, "failed to remove local token mapping");
    }

    StatusCode::OK.into_response()
}
