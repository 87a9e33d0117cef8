//! Machine-readable error codes carried in [`ErrorBody::code`](super::ErrorBody).

/// Invalid or missing input.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Caller is not authenticated.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
/// Caller is authenticated but not allowed.
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
/// Generic not-found.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// No procedure registered under the requested name.
pub const PROCEDURE_NOT_FOUND: &str = "PROCEDURE_NOT_FOUND";
/// Procedure exists but was called through the wrong transport.
pub const WRONG_PROCEDURE_KIND: &str = "WRONG_PROCEDURE_KIND";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Stream terminated by cancellation or disconnect.
pub const STREAM_CLOSED: &str = "STREAM_CLOSED";
/// Value could not be serialized.
pub const ENCODING_ERROR: &str = "ENCODING_ERROR";
