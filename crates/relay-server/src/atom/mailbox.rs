//! Single-slot overwrite mailbox.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Bytes>,
    /// Highest snapshot version accepted so far.
    seen: u64,
}

/// Holds at most one undelivered snapshot for one subscriber.
///
/// Offers carry the atom's write version. An offer older than anything the
/// mailbox has already accepted is discarded, so concurrent writers that
/// finish delivery out of order never move a subscriber backwards.
#[derive(Debug)]
pub(crate) struct Mailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

/// Result of [`Mailbox::offer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The slot was empty.
    Stored,
    /// An undelivered snapshot was overwritten.
    Coalesced,
    /// The mailbox already holds or delivered something newer.
    Stale,
}

impl Mailbox {
    /// Create an empty mailbox that has already seen `version`.
    pub(crate) fn new(version: u64) -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                seen: version,
            }),
            notify: Notify::new(),
        }
    }

    /// Put `snapshot` into the slot, replacing any undelivered one.
    pub(crate) fn offer(&self, version: u64, snapshot: Bytes) -> Offer {
        let outcome = {
            let mut slot = self.slot.lock();
            if version <= slot.seen {
                return Offer::Stale;
            }
            slot.seen = version;
            if slot.pending.replace(snapshot).is_some() {
                Offer::Coalesced
            } else {
                Offer::Stored
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Take the pending snapshot without waiting.
    pub(crate) fn take(&self) -> Option<Bytes> {
        self.slot.lock().pending.take()
    }

    /// Wait for the next snapshot.
    ///
    /// `Notify` stores one permit when nobody is waiting, so an offer that
    /// lands between `take` and `notified` is not lost.
    pub(crate) async fn recv(&self) -> Bytes {
        loop {
            if let Some(snapshot) = self.take() {
                return snapshot;
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Option<Bytes> {
        self.slot.lock().pending.clone()
    }
}
