//! Procedures: handler traits, registry and dispatch.
//!
//! A procedure's kind is fixed when it is registered. [`Procedure`] carries
//! the handler for exactly one of the three kinds, so dispatch is a match on
//! the variant rather than an inspection of the handler.

pub mod registry;
pub mod streaming;
pub mod unary;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_core::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::AtomSource;
use crate::interceptor::CallContext;
use crate::stream::EventEmitter;

pub use registry::{ProcedureEntry, ProcedureRegistry};

/// The three procedure shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    /// Request/response over `POST`.
    Unary,
    /// Ordered events from an [`EventEmitter`] over SSE.
    Stream,
    /// Coalesced snapshots of an [`Atom`](crate::atom::Atom) over SSE.
    Atom,
}

impl ProcedureKind {
    /// Whether this kind is served as an SSE stream.
    pub fn is_streaming(self) -> bool {
        !matches!(self, Self::Unary)
    }

    /// Lowercase name, as used in metadata and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::Stream => "stream",
            Self::Atom => "atom",
        }
    }
}

/// Request/response handler.
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    /// Handle one call.
    async fn call(&self, ctx: &CallContext, input: Value) -> Result<Value, RelayError>;
}

/// Event stream handler.
///
/// Returning `Err` after the stream has started writes one terminal error
/// event, unless the error is disconnect-class, which ends the stream
/// silently.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Produce events through `emitter` until done.
    async fn run(
        &self,
        ctx: &CallContext,
        input: Value,
        emitter: EventEmitter,
    ) -> Result<(), RelayError>;
}

/// A registered handler, tagged by kind.
#[derive(Clone)]
pub enum Procedure {
    /// Unary handler.
    Unary(Arc<dyn UnaryHandler>),
    /// Stream handler.
    Stream(Arc<dyn StreamHandler>),
    /// Atom to subscribe to.
    Atom(Arc<dyn AtomSource>),
}

impl Procedure {
    /// The kind of this procedure.
    pub fn kind(&self) -> ProcedureKind {
        match self {
            Self::Unary(_) => ProcedureKind::Unary,
            Self::Stream(_) => ProcedureKind::Stream,
            Self::Atom(_) => ProcedureKind::Atom,
        }
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Procedure").field(&self.kind()).finish()
    }
}

/// Static description of a procedure for client tooling. No runtime effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureMeta {
    /// Procedure name.
    pub name: String,
    /// Procedure kind.
    pub kind: ProcedureKind,
    /// Declared value type of events or snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Interceptor group, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Closure-backed [`UnaryHandler`]. Build with [`unary_fn`].
pub struct FnUnary<F>(F);

/// Wrap a closure as a unary handler.
pub fn unary_fn<F>(f: F) -> FnUnary<F>
where
    F: for<'a> Fn(&'a CallContext, Value) -> BoxFuture<'a, Result<Value, RelayError>> + Send + Sync,
{
    FnUnary(f)
}

#[async_trait]
impl<F> UnaryHandler for FnUnary<F>
where
    F: for<'a> Fn(&'a CallContext, Value) -> BoxFuture<'a, Result<Value, RelayError>> + Send + Sync,
{
    async fn call(&self, ctx: &CallContext, input: Value) -> Result<Value, RelayError> {
        (self.0)(ctx, input).await
    }
}

/// Closure-backed [`StreamHandler`]. Build with [`stream_fn`].
pub struct FnStream<F>(F);

/// Wrap a closure as a stream handler.
pub fn stream_fn<F>(f: F) -> FnStream<F>
where
    F: for<'a> Fn(&'a CallContext, Value, EventEmitter) -> BoxFuture<'a, Result<(), RelayError>>
        + Send
        + Sync,
{
    FnStream(f)
}

#[async_trait]
impl<F> StreamHandler for FnStream<F>
where
    F: for<'a> Fn(&'a CallContext, Value, EventEmitter) -> BoxFuture<'a, Result<(), RelayError>>
        + Send
        + Sync,
{
    async fn run(
        &self,
        ctx: &CallContext,
        input: Value,
        emitter: EventEmitter,
    ) -> Result<(), RelayError> {
        (self.0)(ctx, input, emitter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn kind_names() {
        assert_eq!(ProcedureKind::Atom.as_str(), "atom");
        assert_eq!(serde_json::to_value(ProcedureKind::Stream).unwrap(), json!("stream"));
        assert!(ProcedureKind::Atom.is_streaming());
        assert!(!ProcedureKind::Unary.is_streaming());
    }

    #[test]
    fn procedure_kind_resolved_from_variant() {
        let atom = crate::atom::Atom::new(1u8);
        let p = Procedure::Atom(Arc::new(atom));
        assert_eq!(p.kind(), ProcedureKind::Atom);
        let p = Procedure::Unary(Arc::new(unary_fn(|_ctx, input| async move { Ok(input) }.boxed())));
        assert_eq!(p.kind(), ProcedureKind::Unary);
    }

    #[tokio::test]
    async fn unary_fn_calls_closure() {
        let handler = unary_fn(|ctx, input| {
            async move { Ok(json!({"procedure": ctx.procedure(), "input": input})) }.boxed()
        });
        let ctx = CallContext::new("echo", ProcedureKind::Unary, CancellationToken::new());
        let out = handler.call(&ctx, json!(3)).await.unwrap();
        assert_eq!(out, json!({"procedure": "echo", "input": 3}));
    }

    #[test]
    fn meta_omits_empty_fields() {
        let meta = ProcedureMeta {
            name: "clock".into(),
            kind: ProcedureKind::Atom,
            value_type: Some("u64".into()),
            group: None,
            description: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, json!({"name": "clock", "kind": "atom", "valueType": "u64"}));
    }
}
