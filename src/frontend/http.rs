//! Session-oriented HTTP + SSE frontend (§4.F.2).
//!
//! A single `/mcp` endpoint taking POST/GET/DELETE, a session id echoed via
//! a response header, `CatchPanicLayer`/`CompressionLayer`/`TraceLayer`
//! stacked over the router, and bearer middleware gating access to all
//! three methods. Built on this crate's own [`crate::session`] manager and
//! [`MethodRouter`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::audit::Mode;
use crate::auth::{constant_time_eq, parse_bearer_header};
use crate::config::HttpConfig;
use crate::error::rpc_codes;
use crate::methods::MethodRouter;
use crate::protocol::messages::{JsonRpcRequest, JsonRpcResponse, RequestId, PROTOCOL_VERSION};
use crate::session::{self, SessionManager};

/// Header carrying a session's opaque id, both directions (§4.F.2).
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
/// Header the server and a non-`initialize` caller must agree on.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Shared state for every `/mcp` handler.
pub struct AppState {
    router: MethodRouter,
    sessions: Arc<SessionManager>,
    config: HttpConfig,
}

impl AppState {
    /// Build the shared state this frontend's handlers close over.
    #[must_use]
    pub fn new(router: MethodRouter, sessions: Arc<SessionManager>, config: HttpConfig) -> Self {
        Self {
            router,
            sessions,
            config,
        }
    }
}

/// Build the axum router serving the single `/mcp` endpoint.
pub fn create_router(state: Arc<AppState>) -> Router {
    let bearer_token = state.config.bearer_token.clone();

    Router::new()
        .route(
            "/mcp",
            post(post_handler).get(get_handler).delete(delete_handler),
        )
        .layer(middleware::from_fn_with_state(bearer_token, auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    State(bearer_token): State<Option<String>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = bearer_token else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer_header);

    match presented {
        Some(token) if constant_time_eq(&expected, token) => next.run(request).await,
        _ => unauthorized(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": rpc_codes::UNAUTHORIZED, "message": "missing or invalid bearer credential"},
            "id": Value::Null,
        })),
    )
        .into_response()
}

/// Whether the `Accept` header explicitly names `media` (or `*/*`); per
/// §4.F.2 a caller must *declare* acceptance, so an absent header fails
/// this check rather than defaulting to permissive.
fn accepts(headers: &HeaderMap, media: &str) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(media) || v.contains("*/*"))
}

fn protocol_version_matches(headers: &HeaderMap) -> bool {
    headers.get(PROTOCOL_VERSION_HEADER).and_then(|v| v.to_str().ok()) == Some(PROTOCOL_VERSION)
}

fn json_response(status: StatusCode, body: &JsonRpcResponse) -> Response {
    (status, Json(serde_json::to_value(body).unwrap_or(Value::Null))).into_response()
}

fn json_error(status: StatusCode, id: Option<RequestId>, code: i32, message: impl Into<String>) -> Response {
    json_response(status, &JsonRpcResponse::error(id, code, message))
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn post_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !accepts(&headers, "application/json") {
        return json_error(
            StatusCode::BAD_REQUEST,
            None,
            rpc_codes::INVALID_REQUEST,
            "must declare Accept: application/json",
        );
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let raw = String::from_utf8_lossy(&body);
            state.router.audit_envelope_failure(Mode::Http, &raw, &e.to_string());
            return json_error(
                StatusCode::BAD_REQUEST,
                None,
                rpc_codes::PARSE_ERROR,
                format!("invalid JSON: {e}"),
            );
        }
    };

    if request.method == "initialize" {
        let session = state.sessions.create();
        let response = state.router.handle(Mode::Http, &request).await;
        return with_session_header(json_response(StatusCode::OK, &response), session.id());
    }

    if !protocol_version_matches(&headers) {
        return json_error(
            StatusCode::BAD_REQUEST,
            request.id.clone(),
            rpc_codes::INVALID_REQUEST,
            format!("expected {PROTOCOL_VERSION_HEADER}: {PROTOCOL_VERSION}"),
        );
    }

    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            request.id.clone(),
            rpc_codes::INVALID_REQUEST,
            format!("missing {SESSION_ID_HEADER} header"),
        );
    };

    if state.sessions.get(session_id).is_none() {
        return json_error(
            StatusCode::NOT_FOUND,
            request.id.clone(),
            rpc_codes::INVALID_REQUEST,
            "unknown session",
        );
    }

    if request.is_notification() {
        state.router.handle_notification(&request.method);
        return with_session_header(StatusCode::ACCEPTED.into_response(), session_id);
    }

    let response = state.router.handle(Mode::Http, &request).await;
    with_session_header(json_response(StatusCode::OK, &response), session_id)
}

async fn get_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !accepts(&headers, "text/event-stream") {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(serde_json::json!({"error": "must declare Accept: text/event-stream"})),
        )
            .into_response();
    }

    if !protocol_version_matches(&headers) {
        return json_error(
            StatusCode::BAD_REQUEST,
            None,
            rpc_codes::INVALID_REQUEST,
            format!("expected {PROTOCOL_VERSION_HEADER}: {PROTOCOL_VERSION}"),
        );
    }

    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            None,
            rpc_codes::INVALID_REQUEST,
            format!("missing {SESSION_ID_HEADER} header"),
        );
    };

    let Some(sess) = state.sessions.get(session_id) else {
        return json_error(StatusCode::NOT_FOUND, None, rpc_codes::INVALID_REQUEST, "unknown session");
    };

    session::subscribe_sse(sess, state.config.keep_alive()).into_response()
}

async fn delete_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if state.sessions.terminate(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStore;
    use crate::config::{LimitsConfig, NamespaceConfig};
    use crate::dispatch::Dispatcher;
    use crate::manifest::Manifest;
    use crate::pattern::PatternCache;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state_without_tools(bearer_token: Option<&str>) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(Manifest {
            tools: vec![],
            allowed_env_keys: vec![],
        });
        let patterns = Arc::new(PatternCache::new());
        let audit = Arc::new(AuditStore::open(&dir.path().join("audit.db")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            manifest,
            patterns,
            &NamespaceConfig::default(),
            audit,
            LimitsConfig::default(),
            dir.path().to_path_buf(),
        ));
        let router = MethodRouter::new(dispatcher);
        let sessions = SessionManager::new(Duration::from_secs(60), 16);
        let mut config = HttpConfig::default();
        config.bearer_token = bearer_token.map(str::to_string);
        (Arc::new(AppState::new(router, sessions, config)), dir)
    }

    fn initialize_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "clientInfo": {"name": "test", "version": "1"},
                    },
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_envelope_is_audited() {
        let (state, dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("accept", "application/json")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let audit = AuditStore::open(&dir.path().join("audit.db")).unwrap();
        assert_eq!(audit.count(&crate::audit::AuditFilter::default()).unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_returns_a_session_id_header() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let response = app.oneshot(initialize_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn non_initialize_call_without_session_header_is_bad_request() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("accept", "application/json")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .body(Body::from(
                serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_id_is_not_found() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("accept", "application/json")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(SESSION_ID_HEADER, "does-not-exist")
            .body(Body::from(
                serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mismatched_protocol_version_is_bad_request() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("accept", "application/json")
            .header(PROTOCOL_VERSION_HEADER, "1999-01-01")
            .header(SESSION_ID_HEADER, "whatever")
            .body(Body::from(
                serde_json::json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_without_accept_header_is_bad_request() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from(
                serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_without_event_stream_accept_is_not_acceptable() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header(SESSION_ID_HEADER, "whatever")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn delete_without_session_header_is_bad_request() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_unknown_session_is_not_found() {
        let (state, _dir) = state_without_tools(None);
        let app = create_router(state);
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_ID_HEADER, "does-not-exist")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_bearer_token_is_unauthorized_when_configured() {
        let (state, _dir) = state_without_tools(Some("topsecret"));
        let app = create_router(state);
        let response = app.oneshot(initialize_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_bearer_token_is_accepted() {
        let (state, _dir) = state_without_tools(Some("topsecret"));
        let app = create_router(state);
        let mut request = initialize_request();
        request
            .headers_mut()
            .insert(axum::http::header::AUTHORIZATION, "Bearer topsecret".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
