//! Unary dispatch and the JSON envelope responses shared with stream setup.

use std::time::Instant;

use async_trait::async_trait;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use relay_core::envelope::{self, Envelope};
use relay_core::errors::codes;
use relay_core::{ErrorTransformer, RelayError};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{Procedure, ProcedureEntry, ProcedureRegistry, UnaryHandler};
use crate::interceptor::{CallContext, Endpoint};
use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};

/// Calls taking longer than this are logged.
const SLOW_CALL_SECS: u64 = 5;

struct UnaryEndpoint<'h> {
    handler: &'h dyn UnaryHandler,
}

#[async_trait]
impl Endpoint for UnaryEndpoint<'_> {
    async fn call(&self, ctx: &CallContext, req: Value) -> Result<Value, RelayError> {
        self.handler.call(ctx, req).await
    }
}

/// Run a unary procedure through its interceptor chain.
#[instrument(skip_all, fields(procedure = ctx.procedure(), request_id = %ctx.request_id()))]
pub async fn invoke(
    registry: &ProcedureRegistry,
    entry: &ProcedureEntry,
    ctx: &CallContext,
    input: Value,
) -> Result<Value, RelayError> {
    let Procedure::Unary(handler) = entry.procedure() else {
        return Err(RelayError::custom(
            codes::WRONG_PROCEDURE_KIND,
            format!("procedure '{}' is not unary", ctx.procedure()),
        )
        .with_status(405));
    };
    let procedure = ctx.procedure().to_owned();
    counter!(RPC_REQUESTS_TOTAL, "procedure" => procedure.clone(), "kind" => "unary").increment(1);

    let start = Instant::now();
    let endpoint = UnaryEndpoint {
        handler: handler.as_ref(),
    };
    let result = registry.chain_for(entry).run(ctx, input, &endpoint).await;
    let duration = start.elapsed();
    histogram!(RPC_REQUEST_DURATION_SECONDS, "procedure" => procedure.clone())
        .record(duration.as_secs_f64());

    if let Err(err) = &result {
        counter!(RPC_ERRORS_TOTAL, "procedure" => procedure.clone(), "code" => err.code().to_owned())
            .increment(1);
        debug!(procedure, request_id = %ctx.request_id(), error = %err, "unary call failed");
    }
    if duration.as_secs() >= SLOW_CALL_SECS {
        warn!(
            procedure,
            duration_secs = duration.as_secs_f64(),
            "slow unary call"
        );
    }
    result
}

/// `200` with `{"result": value}`.
pub fn result_response(value: &Value) -> Response {
    match Envelope::Result(value).to_vec() {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(&RelayError::from(e), &relay_core::errors::default_transformer()),
    }
}

/// The error's status with `{"error": body}`.
pub fn error_response(err: &RelayError, transform: &ErrorTransformer) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = transform(err);
    json_response(status, envelope::error_bytes(&body))
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
