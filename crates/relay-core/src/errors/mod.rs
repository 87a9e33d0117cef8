//! Error hierarchy for relay procedures.
//!
//! - [`RelayError`]: what a handler or interceptor returns
//! - [`ErrorBody`]: the `{code, message, details}` wire shape
//! - [`ErrorTransformer`]: maps a [`RelayError`] to an [`ErrorBody`]; the
//!   default is [`RelayError::to_error_body`]
//!
//! Disconnect-class errors ([`RelayError::is_disconnect`]) are never written
//! to the client; they end a stream silently.

pub mod codes;
pub mod disconnect;
pub mod stream;

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use self::stream::StreamError;

/// Wire-format error carried inside an `{"error": ...}` envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (see [`codes`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details. Always an object on the wire, possibly empty.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ErrorBody {
    /// Build a body without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Map::new(),
        }
    }
}

/// Maps a handler error into the body the client sees.
pub type ErrorTransformer = Arc<dyn Fn(&RelayError) -> ErrorBody + Send + Sync>;

/// The transformer used when none is configured.
pub fn default_transformer() -> ErrorTransformer {
    Arc::new(RelayError::to_error_body)
}

/// Error returned by procedure handlers and interceptors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Input missing or malformed.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// Caller has no valid credentials.
    #[error("{message}")]
    Unauthenticated {
        /// Description.
        message: String,
    },

    /// Caller is not allowed to perform the call.
    #[error("{message}")]
    PermissionDenied {
        /// Description.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Specific code (e.g. `PROCEDURE_NOT_FOUND`).
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// Internal failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with arbitrary code, status and details.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// HTTP status used when the error surfaces before streaming starts.
        status: u16,
        /// Structured details.
        details: Map<String, Value>,
    },

    /// The stream this handler writes to is gone.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// I/O failure, possibly a disconnect.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Serialization failure.
    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl RelayError {
    /// Invalid input.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Missing credentials.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Forbidden.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Domain error with code and status (400 by default) and no details.
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            code: code.into(),
            message: message.into(),
            status: 400,
            details: Map::new(),
        }
    }

    /// Attach details to a [`Custom`](Self::Custom) error. Other variants are
    /// converted into `Custom` keeping their code, message and status.
    #[must_use]
    pub fn with_details(self, details: Map<String, Value>) -> Self {
        match self {
            Self::Custom {
                code,
                message,
                status,
                ..
            } => Self::Custom {
                code,
                message,
                status,
                details,
            },
            other => Self::Custom {
                code: other.code().to_owned(),
                message: other.to_string(),
                status: other.status_code(),
                details,
            },
        }
    }

    /// Override the HTTP status of a [`Custom`](Self::Custom) error.
    #[must_use]
    pub fn with_status(mut self, new_status: u16) -> Self {
        if let Self::Custom { status, .. } = &mut self {
            *status = new_status;
        }
        self
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::Unauthenticated { .. } => codes::UNAUTHENTICATED,
            Self::PermissionDenied { .. } => codes::PERMISSION_DENIED,
            Self::NotFound { code, .. } | Self::Custom { code, .. } => code,
            Self::Internal { .. } | Self::Io(_) => codes::INTERNAL_ERROR,
            Self::Stream(StreamError::Encode(_)) | Self::Encoding(_) => codes::ENCODING_ERROR,
            Self::Stream(_) => codes::STREAM_CLOSED,
        }
    }

    /// HTTP status for errors that surface before streaming headers are sent.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParams { .. } => 400,
            Self::Unauthenticated { .. } => 401,
            Self::PermissionDenied { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Custom { status, .. } => *status,
            Self::Internal { .. } | Self::Stream(_) | Self::Io(_) | Self::Encoding(_) => 500,
        }
    }

    /// Whether this error signals peer or context termination rather than an
    /// application failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Stream(err) => err.is_closed(),
            Self::Io(err) => disconnect::is_disconnect_io(err),
            _ => false,
        }
    }

    /// Whether this error was caused by request cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Stream(err) if err.is_canceled())
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => Map::new(),
            },
        }
    }
}
