//! Ordered, acknowledged event delivery for one streaming call.
//!
//! An [`EventEmitter`] hands each encoded event to the transport through a
//! single-slot channel and waits for the transport to report the write. Events
//! are never coalesced or reordered: the second `send` does not start until
//! the first has been written or has failed.
//!
//! The first disconnect-class failure is sticky. Every later `send` on the
//! same emitter, or any clone of it, returns that same error.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use relay_core::sse;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use relay_core::StreamError;

/// One framed event on its way to the transport.
#[derive(Debug)]
pub struct Outgoing {
    frame: Bytes,
    ack: Option<oneshot::Sender<Result<(), StreamError>>>,
}

impl Outgoing {
    /// A frame nobody waits on.
    pub fn new(frame: Bytes) -> Self {
        Self { frame, ack: None }
    }

    /// A frame whose sender waits for the write result.
    fn acked(frame: Bytes) -> (Self, oneshot::Receiver<Result<(), StreamError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                frame,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// The encoded SSE frame.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Report the write result to the waiting sender, if any.
    pub fn complete(self, result: Result<(), StreamError>) {
        if let Some(ack) = self.ack {
            let _ = ack.send(result);
        }
    }
}

/// Outbound side of an emitter, consumed by the transport.
pub type Outbound = ReceiverStream<Outgoing>;

/// Producer handle for a streaming procedure.
///
/// Cheap to clone; clones share ordering and failure state.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

#[derive(Debug)]
struct EmitterInner {
    tx: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
    last_event_id: String,
    failure: OnceLock<StreamError>,
}

impl EventEmitter {
    /// Create an emitter and the outbound stream the transport drains.
    pub fn channel(cancel: CancellationToken, last_event_id: impl Into<String>) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(1);
        let emitter = Self {
            inner: Arc::new(EmitterInner {
                tx,
                cancel,
                last_event_id: last_event_id.into(),
                failure: OnceLock::new(),
            }),
        };
        (emitter, ReceiverStream::new(rx))
    }

    /// Send one event without an id.
    ///
    /// Returns once the transport has written the event. Fails with a
    /// disconnect-class [`StreamError`] if the transport is gone, the call is
    /// cancelled or the write deadline passes. An event that fails to
    /// serialize returns [`StreamError::Encode`] and leaves the stream open.
    pub async fn send<T: Serialize + ?Sized>(&self, event: &T) -> Result<(), StreamError> {
        self.emit(None, event).await
    }

    /// Send one event preceded by an `id:` line.
    ///
    /// An empty `id` is sent like [`send`](Self::send), with no `id:` line.
    pub async fn send_with_id<T: Serialize + ?Sized>(
        &self,
        id: &str,
        event: &T,
    ) -> Result<(), StreamError> {
        self.emit(Some(id), event).await
    }

    /// Client-supplied `Last-Event-ID`, empty when none was sent.
    pub fn last_event_id(&self) -> &str {
        &self.inner.last_event_id
    }

    /// Resolves when the call is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Whether further sends are certain to fail.
    pub fn is_closed(&self) -> bool {
        self.inner.failure.get().is_some()
            || self.inner.cancel.is_cancelled()
            || self.inner.tx.is_closed()
    }

    async fn emit<T: Serialize + ?Sized>(
        &self,
        id: Option<&str>,
        event: &T,
    ) -> Result<(), StreamError> {
        if let Some(err) = self.inner.failure.get() {
            return Err(err.clone());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(self.fail(StreamError::Canceled));
        }
        let frame = sse::result_frame(id, event).map_err(|e| {
            warn!(error = %e, "stream event failed to serialize, skipped");
            StreamError::from(e)
        })?;
        self.deliver(frame).await
    }

    async fn deliver(&self, frame: Bytes) -> Result<(), StreamError> {
        let cancel = &self.inner.cancel;
        let (outgoing, ack) = Outgoing::acked(frame);

        let queued = tokio::select! {
            () = cancel.cancelled() => Err(StreamError::Canceled),
            sent = self.inner.tx.send(outgoing) => sent.map_err(|_| self.gone()),
        };
        let result = match queued {
            // a reported write result wins over a cancel that raced it
            Ok(()) => tokio::select! {
                biased;
                written = ack => written.unwrap_or_else(|_| Err(self.gone())),
                () = cancel.cancelled() => Err(StreamError::Canceled),
            },
            Err(e) => Err(e),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Failure for a transport that dropped the frame without reporting.
    fn gone(&self) -> StreamError {
        if self.inner.cancel.is_cancelled() {
            StreamError::Canceled
        } else {
            StreamError::Closed
        }
    }

    /// Record the first closing failure and return whichever one won.
    fn fail(&self, err: StreamError) -> StreamError {
        if !err.is_closed() {
            return err;
        }
        if self.inner.failure.set(err.clone()).is_ok() {
            debug!(error = %err, "event stream closed");
        }
        self.inner.failure.get().cloned().unwrap_or(err)
    }
}
