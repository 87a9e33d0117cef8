//! `RelayServer`: Axum HTTP server for unary calls and SSE streams.
//!
//! Routes:
//!
//! - `POST /rpc/{name}`: unary call, JSON body in, `{"result": ...}` out
//! - `GET /rpc/{name}`: stream or atom subscription over SSE; input comes
//!   from the `input` query parameter as JSON
//! - `GET /procedures`: registered procedure metadata
//! - `GET /health`, `GET /metrics`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::errors::default_transformer;
use relay_core::{ErrorTransformer, RelayError};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::interceptor::CallContext;
use crate::rpc::streaming::StreamSessions;
use crate::rpc::unary::{self, error_response, result_response};
use crate::rpc::{ProcedureKind, ProcedureMeta, ProcedureRegistry};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Procedure registry.
    pub registry: Arc<ProcedureRegistry>,
    /// SSE session starter.
    pub sessions: StreamSessions,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Maps errors to their wire body.
    pub transform: ErrorTransformer,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ProcedureRegistry>,
    sessions: StreamSessions,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    transform: ErrorTransformer,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, registry: ProcedureRegistry) -> Self {
        let transform = default_transformer();
        Self {
            sessions: StreamSessions::new(config.transport.clone(), transform.clone()),
            config,
            registry: Arc::new(registry),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            transform,
            metrics: None,
        }
    }

    /// Replace the function that turns errors into wire bodies.
    #[must_use]
    pub fn with_error_transformer(mut self, transform: ErrorTransformer) -> Self {
        self.sessions = StreamSessions::new(self.config.transport.clone(), transform.clone());
        self.transform = transform;
        self
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            sessions: self.sessions.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            transform: self.transform.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/rpc/{name}", get(stream_handler).post(unary_handler))
            .route("/procedures", get(procedures_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.serve_token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, procedures = self.registry.len(), "relay server listening");
        Ok((addr, handle))
    }

    /// Get the procedure registry.
    pub fn registry(&self) -> &Arc<ProcedureRegistry> {
        &self.registry
    }

    /// Get the SSE session starter.
    pub fn sessions(&self) -> &StreamSessions {
        &self.sessions
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    input: Option<String>,
}

/// Empty input means `null`.
fn decode_input(raw: &[u8]) -> Result<Value, RelayError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw)
        .map_err(|e| RelayError::invalid_params(format!("input is not valid JSON: {e}")))
}

/// POST /rpc/{name}
async fn unary_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let entry = match state.registry.resolve(&name, false) {
        Ok(entry) => entry,
        Err(err) => return error_response(&err, &state.transform),
    };
    let input = match decode_input(&body) {
        Ok(input) => input,
        Err(err) => return error_response(&err, &state.transform),
    };
    let ctx = CallContext::new(name, ProcedureKind::Unary, state.shutdown.call_token())
        .with_headers(headers);
    match unary::invoke(&state.registry, entry, &ctx, input).await {
        Ok(value) => result_response(&value),
        Err(err) => error_response(&err, &state.transform),
    }
}

/// GET /rpc/{name}
async fn stream_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let entry = match state.registry.resolve(&name, true) {
        Ok(entry) => entry,
        Err(err) => return error_response(&err, &state.transform),
    };
    let input = Query::<StreamQuery>::try_from_uri(&uri)
        .map_err(|e| RelayError::invalid_params(format!("invalid query: {e}")))
        .and_then(|Query(query)| decode_input(query.input.unwrap_or_default().as_bytes()));
    let input = match input {
        Ok(input) => input,
        Err(err) => return error_response(&err, &state.transform),
    };
    let ctx = CallContext::new(name, entry.kind(), state.shutdown.call_token())
        .with_headers(headers);
    state.sessions.start(&state.registry, entry, ctx, input).await
}

/// GET /procedures
async fn procedures_handler(State(state): State<AppState>) -> Json<Vec<ProcedureMeta>> {
    Json(state.registry.procedures())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.sessions.active_count(),
        state.registry.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::rpc::unary_fn;
    use axum::body::Body;
    use axum::http::Request;
    use futures::FutureExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use relay_core::ErrorBody;
    use serde_json::json;
    use tower::ServiceExt;

    fn registry() -> ProcedureRegistry {
        let mut reg = ProcedureRegistry::new();
        let _ = reg.unary("echo", unary_fn(|_ctx, input| async move { Ok(input) }.boxed()));
        let _ = reg.unary(
            "whoami",
            unary_fn(|ctx, _input| {
                async move { Ok(json!(ctx.header("x-user").unwrap_or("anonymous"))) }.boxed()
            }),
        );
        let _ = reg.atom("count", &Atom::new(0u32));
        reg
    }

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default(), registry())
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.registry().len(), 3);
        assert!(!server.shutdown().is_closing());
        assert_eq!(server.sessions().active_count(), 0);
    }

    #[test]
    fn decode_input_cases() {
        assert_eq!(decode_input(b"").unwrap(), Value::Null);
        assert_eq!(decode_input(b"  \n").unwrap(), Value::Null);
        assert_eq!(decode_input(b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert_eq!(decode_input(b"{nope").unwrap_err().status_code(), 400);
    }

    #[tokio::test]
    async fn unary_echo() {
        let resp = make_server()
            .router()
            .oneshot(post("/rpc/echo", r#"{"x":[1,2]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"result": {"x": [1, 2]}}));
    }

    #[tokio::test]
    async fn unary_empty_body_is_null() {
        let resp = make_server()
            .router()
            .oneshot(post("/rpc/echo", ""))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"result": null}));
    }

    #[tokio::test]
    async fn unary_sees_headers() {
        let req = Request::builder()
            .method("POST")
            .uri("/rpc/whoami")
            .header("x-user", "ada")
            .body(Body::empty())
            .unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(body_json(resp).await, json!({"result": "ada"}));
    }

    #[tokio::test]
    async fn unary_bad_json_is_invalid_params() {
        let resp = make_server()
            .router()
            .oneshot(post("/rpc/echo", "{"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn unknown_procedure_is_404_envelope() {
        let resp = make_server()
            .router()
            .oneshot(post("/rpc/missing", "null"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "PROCEDURE_NOT_FOUND");
    }

    #[tokio::test]
    async fn wrong_method_for_kind_is_405() {
        let app = make_server().router();
        let resp = app.clone().oneshot(post("/rpc/count", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let resp = app.oneshot(get_req("/rpc/echo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "WRONG_PROCEDURE_KIND");
    }

    #[tokio::test]
    async fn stream_bad_query_input_is_400() {
        let resp = make_server()
            .router()
            .oneshot(get_req("/rpc/count?input=%7Bbroken"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn atom_route_opens_event_stream() {
        let server = make_server();
        let resp = server.router().oneshot(get_req("/rpc/count")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        server.shutdown().close();
    }

    #[tokio::test]
    async fn custom_transformer_applies() {
        let transform: ErrorTransformer =
            Arc::new(|err: &RelayError| ErrorBody::new("HIDDEN", err.code()));
        let server = make_server().with_error_transformer(transform);
        let resp = server
            .router()
            .oneshot(post("/rpc/nope", ""))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "HIDDEN");
        assert_eq!(body["error"]["message"], "PROCEDURE_NOT_FOUND");
    }

    #[tokio::test]
    async fn procedures_endpoint_lists_sorted() {
        let resp = make_server()
            .router()
            .oneshot(get_req("/procedures"))
            .await
            .unwrap();
        let body = body_json(resp).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["count", "echo", "whoami"]);
        assert_eq!(body[0]["kind"], "atom");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let resp = make_server()
            .router()
            .oneshot(get_req("/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["procedures"], 3);
        assert_eq!(parsed["active_streams"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder_is_404() {
        let resp = make_server()
            .router()
            .oneshot(get_req("/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let resp = make_server()
            .with_metrics(handle)
            .router()
            .oneshot(get_req("/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_server()
            .router()
            .oneshot(get_req("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().close();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
