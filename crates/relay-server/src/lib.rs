//! # relay-server
//!
//! Real-time delivery over HTTP and Server-Sent Events.
//!
//! - **Atoms**: observable cells whose subscribers always converge on the
//!   latest value, with intermediate updates coalesced per subscriber
//! - **Event streams**: ordered, acknowledged sends through an
//!   [`EventEmitter`](stream::EventEmitter), with sticky disconnect failure
//! - **SSE transport**: heartbeats, per-write deadlines and client
//!   disconnect detection
//! - **Interceptors**: onion-ordered middleware around every procedure
//! - Axum server with unary `POST` and streaming `GET` routes, health,
//!   Prometheus metrics and graceful shutdown

#![deny(unsafe_code)]

pub mod atom;
pub mod config;
pub mod health;
pub mod interceptor;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod stream;
pub mod transport;

pub use atom::{Atom, AtomSource, Subscription};
pub use config::ServerConfig;
pub use interceptor::{CallContext, Endpoint, Interceptor, InterceptorChain, Next, interceptor_fn};
pub use rpc::{
    ProcedureKind, ProcedureRegistry, StreamHandler, UnaryHandler, stream_fn, unary_fn,
};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
pub use stream::{EventEmitter, StreamError};
pub use transport::{SseTransport, TransportConfig, TransportEnd};
