//! Subscriber handle returned by [`Atom::subscribe`](super::Atom::subscribe).

use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::mailbox::Mailbox;

/// Removes a subscriber from its atom.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

/// A live registration on an atom.
///
/// Yields the snapshot current at subscribe time first, then each newer
/// snapshot that reached the mailbox. The registration is removed when the
/// cancel token fires and [`recv`](Self::recv) observes it, or when the
/// subscription is dropped, whichever comes first.
pub struct Subscription {
    id: u64,
    mailbox: Arc<Mailbox>,
    initial: Option<Bytes>,
    cancel: CancellationToken,
    owner: Weak<dyn Detach>,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        mailbox: Arc<Mailbox>,
        initial: Bytes,
        cancel: CancellationToken,
        owner: Weak<dyn Detach>,
    ) -> Self {
        Self {
            id,
            mailbox,
            initial: Some(initial),
            cancel,
            owner,
            detached: false,
        }
    }

    /// Subscriber id, unique within its atom.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next serialized snapshot, or `None` once cancelled.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.detached {
            return None;
        }
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        let next = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            snapshot = self.mailbox.recv() => Some(snapshot),
        };
        if next.is_none() {
            self.detach();
        }
        next
    }

    /// Take a snapshot if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        if self.detached || self.cancel.is_cancelled() {
            self.detach();
            return None;
        }
        self.initial.take().or_else(|| self.mailbox.take())
    }

    /// Convert into a stream that ends on cancellation.
    ///
    /// Dropping the stream early deregisters the subscriber.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let next = sub.recv().await?;
            Some((next, sub))
        })
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}
