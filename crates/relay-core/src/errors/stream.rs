//! Failures of an open event stream.

use std::time::Duration;

use thiserror::Error;

/// Why a send on an open stream did not complete.
///
/// Every variant except [`Encode`](Self::Encode) is *disconnect-class*: the
/// stream is gone and [`is_closed`](Self::is_closed) reports `true`. A
/// cancellation additionally reports [`is_canceled`](Self::is_canceled), so a
/// caller can test for either condition without caring which fired first.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The inbound request was canceled (client went away or server shutdown).
    #[error("stream closed: request canceled")]
    Canceled,

    /// The transport has already terminated.
    #[error("stream closed: transport terminated")]
    Closed,

    /// A single write did not complete within the configured deadline.
    #[error("stream closed: write deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The underlying connection reported a write failure.
    #[error("stream closed: {0}")]
    Transport(String),

    /// The event could not be serialized. The stream stays open.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl StreamError {
    /// Whether this error means the stream is closed for good.
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }

    /// Whether the stream closed because the request was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether the stream closed because a write hit its deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded(_))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
