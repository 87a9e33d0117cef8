//! Stream and atom sessions: setup, then one task per connection.
//!
//! Setup runs the interceptor chain before any byte is written, so a
//! rejection still gets a normal status code and the unary error envelope.
//! Once the SSE headers are out, failures either become one terminal
//! `{"error": ...}` event (application errors) or end the stream silently
//! (disconnects).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use relay_core::errors::codes;
use relay_core::{ErrorTransformer, RelayError, sse};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::unary::{error_response, result_response};
use super::{Procedure, ProcedureEntry, ProcedureRegistry, StreamHandler};
use crate::atom::AtomSource;
use crate::interceptor::{CallContext, Endpoint};
use crate::metrics::{
    RPC_ERRORS_TOTAL, RPC_REQUESTS_TOTAL, SSE_ERRORS_TOTAL, SSE_STREAMS_ACTIVE, SSE_STREAMS_TOTAL,
};
use crate::stream::{EventEmitter, Outgoing};
use crate::transport::{SseBody, SseTransport, TransportConfig, TransportEnd};

/// Outcome of running the interceptor chain for a streaming call.
#[derive(Debug, PartialEq)]
pub enum Setup {
    /// Every interceptor passed the call inward; stream with this input.
    Proceed(Value),
    /// An interceptor answered without calling inward.
    Answered(Value),
}

/// Innermost layer during setup: records the input that made it through.
#[derive(Default)]
struct SetupEndpoint {
    input: Mutex<Option<Value>>,
}

#[async_trait]
impl Endpoint for SetupEndpoint {
    async fn call(&self, _ctx: &CallContext, req: Value) -> Result<Value, RelayError> {
        *self.input.lock() = Some(req);
        Ok(Value::Null)
    }
}

/// Run the interceptor chain of a streaming procedure.
///
/// Interceptors may rewrite the input; the handler sees the rewritten value.
/// The response they observe from `next` is always `null`.
pub async fn setup(
    registry: &ProcedureRegistry,
    entry: &ProcedureEntry,
    ctx: &CallContext,
    input: Value,
) -> Result<Setup, RelayError> {
    let endpoint = SetupEndpoint::default();
    let answer = registry.chain_for(entry).run(ctx, input, &endpoint).await?;
    Ok(match endpoint.input.into_inner() {
        Some(input) => Setup::Proceed(input),
        None => Setup::Answered(answer),
    })
}

/// Drive a stream handler against a transport until either finishes.
///
/// An application error is written as one terminal error event if the
/// connection is still up. A disconnect-class error is dropped.
#[instrument(skip_all, fields(procedure = ctx.procedure(), conn = %transport.id()))]
pub async fn run_stream(
    handler: Arc<dyn StreamHandler>,
    ctx: &CallContext,
    input: Value,
    transport: &SseTransport,
    transform: &ErrorTransformer,
) -> TransportEnd {
    let (emitter, outbound) = EventEmitter::channel(ctx.cancel_token().clone(), ctx.last_event_id());
    let handler_done = CancellationToken::new();

    let produce = async {
        let result = handler.run(ctx, input, emitter).await;
        handler_done.cancel();
        result
    };
    let (result, end) = tokio::join!(
        produce,
        transport.pump(outbound.take_until(handler_done.cancelled()))
    );

    let end = match result {
        Ok(()) => end,
        Err(err) if err.is_disconnect() => {
            debug!(procedure = ctx.procedure(), error = %err, "stream handler ended by disconnect");
            end
        }
        Err(err) if end == TransportEnd::Drained => {
            let body = transform(&err);
            counter!(SSE_ERRORS_TOTAL, "code" => body.code.clone()).increment(1);
            warn!(procedure = ctx.procedure(), code = %body.code, error = %err, "stream handler failed");
            match transport.write(sse::error_frame(&body)).await {
                Ok(()) => end,
                Err(e) => TransportEnd::Failed(e),
            }
        }
        Err(err) => {
            debug!(procedure = ctx.procedure(), error = %err, ?end, "stream closed before error could be sent");
            end
        }
    };
    ctx.cancel_token().cancel();
    end
}

/// Stream an atom's snapshots until the connection ends.
#[instrument(skip_all, fields(procedure = ctx.procedure(), conn = %transport.id()))]
pub async fn run_atom(source: &dyn AtomSource, ctx: &CallContext, transport: &SseTransport) -> TransportEnd {
    let subscription = source.subscribe(ctx.cancel_token().clone());
    let frames = subscription
        .into_stream()
        .map(|snapshot| Outgoing::new(sse::raw_result_frame(None, &snapshot)));
    let end = transport.pump(frames).await;
    ctx.cancel_token().cancel();
    end
}

/// Response carrying SSE headers and `body`.
pub fn sse_response(body: SseBody) -> Response {
    (
        [
            (header::CONTENT_TYPE, sse::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

enum Session {
    Stream(Arc<dyn StreamHandler>),
    Atom(Arc<dyn AtomSource>),
}

/// Starts SSE sessions and counts the live ones.
#[derive(Clone)]
pub struct StreamSessions {
    transport: TransportConfig,
    transform: ErrorTransformer,
    active: Arc<AtomicUsize>,
}

impl StreamSessions {
    /// Create a session starter.
    pub fn new(transport: TransportConfig, transform: ErrorTransformer) -> Self {
        Self {
            transport,
            transform,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of sessions currently streaming.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Transport settings used for new sessions.
    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport
    }

    /// Run setup for a streaming call and, if it passes, spawn the session
    /// task and return the SSE response.
    pub async fn start(
        &self,
        registry: &ProcedureRegistry,
        entry: &ProcedureEntry,
        ctx: CallContext,
        input: Value,
    ) -> Response {
        let session = match entry.procedure() {
            Procedure::Stream(handler) => Session::Stream(handler.clone()),
            Procedure::Atom(source) => Session::Atom(source.clone()),
            Procedure::Unary(_) => {
                let err = RelayError::custom(
                    codes::WRONG_PROCEDURE_KIND,
                    format!("procedure '{}' is not streaming", ctx.procedure()),
                )
                .with_status(405);
                return error_response(&err, &self.transform);
            }
        };
        let kind = entry.kind().as_str();
        counter!(RPC_REQUESTS_TOTAL, "procedure" => ctx.procedure().to_owned(), "kind" => kind)
            .increment(1);

        let input = match setup(registry, entry, &ctx, input).await {
            Ok(Setup::Proceed(input)) => input,
            Ok(Setup::Answered(value)) => return result_response(&value),
            Err(err) => {
                counter!(RPC_ERRORS_TOTAL, "procedure" => ctx.procedure().to_owned(), "code" => err.code().to_owned())
                    .increment(1);
                debug!(procedure = ctx.procedure(), error = %err, "stream setup rejected");
                return error_response(&err, &self.transform);
            }
        };

        let (transport, body) = SseTransport::new(self.transport.clone(), ctx.cancel_token().clone());
        let guard = ActiveGuard::new(self.active.clone());
        let transform = self.transform.clone();
        counter!(SSE_STREAMS_TOTAL, "kind" => kind).increment(1);
        info!(
            procedure = ctx.procedure(),
            request_id = %ctx.request_id(),
            conn = %transport.id(),
            last_event_id = ctx.last_event_id(),
            "sse stream opened"
        );

        let _ = tokio::spawn(async move {
            let _guard = guard;
            let end = match session {
                Session::Stream(handler) => {
                    run_stream(handler, &ctx, input, &transport, &transform).await
                }
                Session::Atom(source) => run_atom(source.as_ref(), &ctx, &transport).await,
            };
            info!(procedure = ctx.procedure(), conn = %transport.id(), ?end, "sse stream closed");
        });

        sse_response(body)
    }
}

/// Keeps the active-session count and gauge in step with the task.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        let _ = active.fetch_add(1, Ordering::Relaxed);
        gauge!(SSE_STREAMS_ACTIVE).increment(1.0);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
        gauge!(SSE_STREAMS_ACTIVE).decrement(1.0);
    }
}
