//! Closure adapter for [`Interceptor`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_core::RelayError;
use serde_json::Value;

use super::{CallContext, Interceptor, Next};

/// An [`Interceptor`] backed by a closure. Build with [`interceptor_fn`].
pub struct FnInterceptor<F> {
    f: F,
}

/// Wrap a closure as an interceptor.
///
/// ```ignore
/// let logging = interceptor_fn(|ctx, req, next| {
///     async move {
///         tracing::info!(procedure = ctx.procedure(), "call");
///         next.run(ctx, req).await
///     }
///     .boxed()
/// });
/// ```
pub fn interceptor_fn<F>(f: F) -> FnInterceptor<F>
where
    F: for<'a> Fn(&'a CallContext, Value, Next<'a>) -> BoxFuture<'a, Result<Value, RelayError>>
        + Send
        + Sync,
{
    FnInterceptor { f }
}

#[async_trait]
impl<F> Interceptor for FnInterceptor<F>
where
    F: for<'a> Fn(&'a CallContext, Value, Next<'a>) -> BoxFuture<'a, Result<Value, RelayError>>
        + Send
        + Sync,
{
    async fn intercept(
        &self,
        ctx: &CallContext,
        req: Value,
        next: Next<'_>,
    ) -> Result<Value, RelayError> {
        (self.f)(ctx, req, next).await
    }
}
