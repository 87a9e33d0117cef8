//! Interceptor chain wrapped around every procedure call.
//!
//! Interceptors nest outer-to-inner in registration order: global first,
//! then the procedure's group, then the procedure's own. Each one receives a
//! [`Next`] that it may run once, or drop to short-circuit the call. Because
//! [`Next::run`] takes `self`, running the rest of the chain twice does not
//! compile.
//!
//! An error returned anywhere in the chain aborts the remaining layers and
//! reaches the error transformer unchanged.

mod context;
mod func;

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::RelayError;
use serde_json::Value;

pub use context::CallContext;
pub use func::{FnInterceptor, interceptor_fn};

/// A request/response hook around a procedure call.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or replace `req`, then call `next.run(ctx, req)` or return
    /// without calling it.
    async fn intercept(
        &self,
        ctx: &CallContext,
        req: Value,
        next: Next<'_>,
    ) -> Result<Value, RelayError>;
}

/// The innermost call the chain wraps.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Invoke the target.
    async fn call(&self, ctx: &CallContext, req: Value) -> Result<Value, RelayError>;
}

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    endpoint: &'a dyn Endpoint,
}

impl Next<'_> {
    /// Run the inner interceptors and the endpoint.
    pub async fn run(self, ctx: &CallContext, req: Value) -> Result<Value, RelayError> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    endpoint: self.endpoint,
                };
                head.intercept(ctx, req, next).await
            }
            None => self.endpoint.call(ctx, req).await,
        }
    }

    /// Number of interceptors still to run before the endpoint.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// An ordered list of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Create an empty chain. Running it calls the endpoint directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor (builder style).
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.push(Arc::new(interceptor));
        self
    }

    /// Append an interceptor. Later interceptors run inside earlier ones.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Flatten several chains into one, outermost first.
    pub fn compose<'a>(layers: impl IntoIterator<Item = &'a InterceptorChain>) -> Self {
        Self {
            interceptors: layers
                .into_iter()
                .flat_map(|c| c.interceptors.iter().cloned())
                .collect(),
        }
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the chain around `endpoint`.
    pub async fn run(
        &self,
        ctx: &CallContext,
        req: Value,
        endpoint: &dyn Endpoint,
    ) -> Result<Value, RelayError> {
        Next {
            rest: &self.interceptors,
            endpoint,
        }
        .run(ctx, req)
        .await
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
