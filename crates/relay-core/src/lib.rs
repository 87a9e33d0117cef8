//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Errors**: [`RelayError`](errors::RelayError) hierarchy via `thiserror`, wire
//!   [`ErrorBody`](errors::ErrorBody), error codes and the pluggable
//!   [`ErrorTransformer`](errors::ErrorTransformer)
//! - **Stream errors**: [`StreamError`](errors::stream::StreamError), the
//!   disconnect-class failures of an open event stream
//! - **Envelope**: the `{"result": ...}` / `{"error": ...}` wrapper applied to
//!   every delivered value
//! - **SSE framing**: byte-exact `id:` / `data:` / heartbeat encoding
//! - **IDs**: time-ordered request and connection identifiers
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod sse;

pub use envelope::Envelope;
pub use errors::stream::StreamError;
pub use errors::{ErrorBody, ErrorTransformer, RelayError};
