//! SSE wire transport for one connection.
//!
//! [`SseTransport::pump`] is the per-connection loop. It waits on three
//! sources at once and acts on whichever is ready first:
//!
//! - inbound cancellation (client gone or server shutting down)
//! - the heartbeat timer, which writes [`sse::HEARTBEAT`]
//! - the next outbound frame from an emitter or an atom subscription
//!
//! Each write gets its own deadline. A heartbeat write that fails ends the
//! connection exactly like a failed data write. Frames are handed to the HTTP
//! body whole, so a heartbeat never lands inside another event.

use std::convert::Infallible;
use std::pin::pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use metrics::counter;
use relay_core::ids::ConnectionId;
use relay_core::sse;
use relay_settings::StreamSettings;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::{SSE_DISCONNECTS_TOTAL, SSE_EVENTS_TOTAL, SSE_HEARTBEATS_TOTAL};
use crate::stream::{Outgoing, StreamError};

/// Byte stream backing the HTTP response body.
pub type SseBody = ReceiverStream<Result<Bytes, Infallible>>;

/// Timing and buffering for SSE connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Heartbeat period, `None` to disable.
    pub heartbeat_interval: Option<Duration>,
    /// Deadline for each individual write, `None` to disable.
    pub write_timeout: Option<Duration>,
    /// Frames buffered between the transport and the HTTP body.
    pub buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for TransportConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            heartbeat_interval: settings.heartbeat_interval(),
            write_timeout: settings.write_timeout(),
            buffer: settings.outbound_buffer.max(1),
        }
    }
}

/// Why [`SseTransport::pump`] returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEnd {
    /// The outbound source ended; the connection is still writable.
    Drained,
    /// Cancellation fired or the client went away.
    Canceled,
    /// A write failed or missed its deadline.
    Failed(StreamError),
}

/// Writer side of one SSE response.
#[derive(Debug)]
pub struct SseTransport {
    id: ConnectionId,
    body: mpsc::Sender<Result<Bytes, Infallible>>,
    config: TransportConfig,
    cancel: CancellationToken,
}

impl SseTransport {
    /// Create a transport and the body stream it feeds.
    pub fn new(config: TransportConfig, cancel: CancellationToken) -> (Self, SseBody) {
        let (body, rx) = mpsc::channel(config.buffer.max(1));
        let transport = Self {
            id: ConnectionId::new(),
            body,
            config,
            cancel,
        };
        (transport, ReceiverStream::new(rx))
    }

    /// Connection id, for logging.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The token this transport watches and cancels on failure.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run the connection loop until `outbound` ends or the connection does.
    ///
    /// Every frame's sender learns the outcome of its own write. On any exit
    /// other than [`TransportEnd::Drained`] the cancel token is fired and
    /// frames already queued are failed with the reason the loop stopped.
    pub async fn pump<S>(&self, outbound: S) -> TransportEnd
    where
        S: Stream<Item = Outgoing> + Send,
    {
        let mut outbound = pin!(outbound);
        let mut heartbeat = self.config.heartbeat_interval.map(heartbeat_timer);

        let end = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break TransportEnd::Canceled,
                () = self.body.closed() => {
                    debug!(conn = %self.id, "client went away");
                    break TransportEnd::Canceled;
                }
                () = next_tick(heartbeat.as_mut()) => {
                    if let Err(e) = self.write(sse::heartbeat()).await {
                        break TransportEnd::Failed(e);
                    }
                    counter!(SSE_HEARTBEATS_TOTAL).increment(1);
                    trace!(conn = %self.id, "heartbeat");
                }
                next = outbound.next() => {
                    let Some(out) = next else {
                        break TransportEnd::Drained;
                    };
                    let written = self.write(out.frame().clone()).await;
                    out.complete(written.clone());
                    if let Err(e) = written {
                        break TransportEnd::Failed(e);
                    }
                    counter!(SSE_EVENTS_TOTAL).increment(1);
                }
            }
        };

        let reason = match &end {
            TransportEnd::Drained => return end,
            TransportEnd::Canceled => StreamError::Canceled,
            TransportEnd::Failed(e) => {
                let reason = if e.is_deadline_exceeded() { "deadline" } else { "write" };
                counter!(SSE_DISCONNECTS_TOTAL, "reason" => reason).increment(1);
                debug!(conn = %self.id, error = %e, "sse write failed");
                e.clone()
            }
        };
        self.cancel.cancel();
        while let Some(Some(out)) = outbound.next().now_or_never() {
            out.complete(Err(reason.clone()));
        }
        end
    }

    /// Write one frame under the per-write deadline.
    pub async fn write(&self, frame: Bytes) -> Result<(), StreamError> {
        let send = async {
            let accepted = self.body.send(Ok(frame));
            match self.config.write_timeout {
                Some(limit) => match time::timeout(limit, accepted).await {
                    Ok(sent) => sent.map_err(|_| StreamError::Closed),
                    Err(_) => Err(StreamError::DeadlineExceeded(limit)),
                },
                None => accepted.await.map_err(|_| StreamError::Closed),
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StreamError::Canceled),
            result = send => result,
        }
    }
}

fn heartbeat_timer(period: Duration) -> Interval {
    // first tick one period from now, not immediately
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            let _ = timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
