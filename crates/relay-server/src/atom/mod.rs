//! Broadcast state cells ("atoms").
//!
//! An [`Atom`] holds one value and its JSON snapshot. Every write serializes
//! the value once and offers the bytes to each subscriber's single-slot
//! mailbox. A subscriber that has not drained its slot sees the older
//! snapshot replaced, so it always catches up to the newest value and never
//! buffers more than one.
//!
//! The subscriber map and the value share one lock. Delivery happens after
//! that lock is released, so a slow subscriber cannot stall writers, readers
//! or other subscribers.

mod mailbox;
mod subscription;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use self::mailbox::{Mailbox, Offer};
use self::subscription::Detach;
use crate::metrics::ATOM_COALESCED_TOTAL;

pub use subscription::Subscription;

/// Type-erased view of an atom, used by the procedure registry.
pub trait AtomSource: Send + Sync {
    /// Register a subscriber. See [`Atom::subscribe`].
    fn subscribe(&self, cancel: CancellationToken) -> Subscription;
    /// Current serialized snapshot.
    fn snapshot(&self) -> Bytes;
    /// Number of registered subscribers.
    fn subscriber_count(&self) -> usize;
    /// Declared value type, for client tooling.
    fn value_type(&self) -> &'static str;
}

/// A shared value with coalescing fan-out to subscribers.
///
/// Cloning an `Atom` yields another handle to the same cell.
pub struct Atom<T> {
    inner: Arc<AtomInner<T>>,
}

struct AtomInner<T> {
    state: Mutex<AtomState<T>>,
    next_subscriber: AtomicU64,
}

struct AtomState<T> {
    value: T,
    /// Serialization of the last value that serialized successfully.
    snapshot: Bytes,
    /// Bumped on every snapshot change.
    version: u64,
    subscribers: HashMap<u64, Arc<Mailbox>>,
}

/// A snapshot to hand out once the state lock is released.
struct Delivery {
    version: u64,
    snapshot: Bytes,
    targets: Vec<Arc<Mailbox>>,
}

impl<T> AtomState<T> {
    fn publish(&mut self, snapshot: Bytes) -> Delivery {
        self.version += 1;
        self.snapshot = snapshot.clone();
        Delivery {
            version: self.version,
            snapshot,
            targets: self.subscribers.values().cloned().collect(),
        }
    }
}

impl Delivery {
    fn send(self) {
        for mailbox in self.targets {
            if mailbox.offer(self.version, self.snapshot.clone()) == Offer::Coalesced {
                counter!(ATOM_COALESCED_TOTAL).increment(1);
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(value).map(Bytes::from)
}

impl<T: Serialize + Send + 'static> Atom<T> {
    /// Create an atom holding `value`.
    ///
    /// If `value` cannot be serialized the initial snapshot is `null`.
    pub fn new(value: T) -> Self {
        let snapshot = encode(&value).unwrap_or_else(|e| {
            warn!(error = %e, value_type = std::any::type_name::<T>(), "initial atom value failed to serialize");
            Bytes::from_static(b"null")
        });
        Self {
            inner: Arc::new(AtomInner {
                state: Mutex::new(AtomState {
                    value,
                    snapshot,
                    version: 0,
                    subscribers: HashMap::new(),
                }),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Copy of the current value.
    pub fn read(&self) -> T
    where
        T: Clone,
    {
        self.inner.state.lock().value.clone()
    }

    /// Borrow the current value under the lock.
    ///
    /// `f` must not call back into this atom.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.lock().value)
    }

    /// Serialized form of the most recent value that serialized successfully.
    pub fn snapshot(&self) -> Bytes {
        self.inner.state.lock().snapshot.clone()
    }

    /// Replace the value and broadcast it.
    ///
    /// Serialization runs before the lock is taken. If it fails the value is
    /// still replaced, but the snapshot stays as it was and nothing is
    /// broadcast.
    pub fn write(&self, value: T) {
        let encoded = encode(&value);
        let delivery = {
            let mut state = self.inner.state.lock();
            state.value = value;
            encoded.as_ref().ok().map(|snapshot| state.publish(snapshot.clone()))
        };
        match (delivery, encoded) {
            (Some(delivery), _) => delivery.send(),
            (None, Err(e)) => warn!(error = %e, value_type = std::any::type_name::<T>(), "atom value failed to serialize, not broadcast"),
            (None, Ok(_)) => {}
        }
    }

    /// Derive the next value from the current one and broadcast it.
    ///
    /// Runs `f` and serialization under the lock so concurrent updates do not
    /// lose each other's changes. `f` must not call back into this atom.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let (delivery, failure) = {
            let mut state = self.inner.state.lock();
            let next = f(&state.value);
            let encoded = encode(&next);
            state.value = next;
            match encoded {
                Ok(snapshot) => (Some(state.publish(snapshot)), None),
                Err(e) => (None, Some(e)),
            }
        };
        if let Some(delivery) = delivery {
            delivery.send();
        }
        if let Some(e) = failure {
            warn!(error = %e, value_type = std::any::type_name::<T>(), "atom value failed to serialize, not broadcast");
        }
    }

    /// Register a subscriber.
    ///
    /// The returned subscription yields the snapshot current at this moment
    /// first. Registration and the initial snapshot are taken under the same
    /// lock, so a racing write is either the initial value or delivered after
    /// it, never skipped and never before it.
    pub fn subscribe(&self, cancel: CancellationToken) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (mailbox, initial) = {
            let mut state = self.inner.state.lock();
            let mailbox = Arc::new(Mailbox::new(state.version));
            let _ = state.subscribers.insert(id, mailbox.clone());
            (mailbox, state.snapshot.clone())
        };
        debug!(subscriber = id, value_type = std::any::type_name::<T>(), "atom subscriber registered");
        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription::new(id, mailbox, initial, cancel, Arc::downgrade(&inner))
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }
}

impl<T: Send + 'static> Detach for AtomInner<T> {
    fn detach(&self, id: u64) {
        if self.state.lock().subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "atom subscriber removed");
        }
    }
}

impl<T: Serialize + Send + 'static> AtomSource for Atom<T> {
    fn subscribe(&self, cancel: CancellationToken) -> Subscription {
        Atom::subscribe(self, cancel)
    }

    fn snapshot(&self) -> Bytes {
        Atom::snapshot(self)
    }

    fn subscriber_count(&self) -> usize {
        Atom::subscriber_count(self)
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Serialize + Send + Default + 'static> Default for Atom<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Atom")
            .field("version", &state.version)
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}
