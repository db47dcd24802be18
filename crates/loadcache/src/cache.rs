use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::{LoadError, LoadResult};

/// The channel over which every waiter of a loading episode receives its
/// outcome.
type LoadChannel<V> = Shared<oneshot::Receiver<LoadResult<V>>>;

/// The per-key slot.
enum Slot<V> {
    /// The value is resolved and is served to all further requests.
    Ready(V),
    /// A load is in flight; new requests for the key join this channel.
    Loading(LoadChannel<V>),
}

type SlotMap<K, V> = Arc<Mutex<BTreeMap<K, Slot<V>>>>;

/// A cache that deduplicates concurrent loads per key and memoizes successful
/// results.
///
/// Any number of callers can [`get`](Self::get) the same key concurrently; the
/// loader for that key is invoked at most once, and all callers receive the
/// outcome of that one invocation. Once a value has been loaded successfully
/// it is served to every subsequent request without invoking a loader again.
/// Failed loads are not memoized and are retried by the next request.
///
/// The cache is an explicit instance, there is no process-wide state. Handles
/// are cheap to clone and share the same underlying map.
pub struct SingleFlightCache<K, V> {
    slots: SlotMap<K, V>,
}

impl<K, V> SingleFlightCache<K, V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl<K, V> Default for SingleFlightCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> fmt::Debug for SingleFlightCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ready, loading) = self
            .slots
            .try_lock()
            .map(|slots| {
                let ready = slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Ready(_)))
                    .count();
                (ready, slots.len() - ready)
            })
            .unwrap_or_default();
        f.debug_struct("SingleFlightCache")
            .field("ready entries", &ready)
            .field("in-flight loads", &loading)
            .finish()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Clone + Ord + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value for `key`, loading it at most once.
    ///
    /// If the value is already cached it is returned without suspending and
    /// without invoking `loader`. If a load for the same key is already in
    /// flight, this call suspends until that load settles and shares its
    /// outcome. Otherwise this caller starts `loader()`, and every request
    /// arriving before it settles receives the same result.
    ///
    /// The `loader` closure itself is called synchronously while the cache is
    /// locked and must only construct the future; all actual work belongs
    /// into the future, which runs as a task on the current runtime. The load
    /// keeps running even if this caller goes away, so waiters that joined it
    /// still receive its outcome.
    ///
    /// # Errors
    ///
    /// A failed or panicked load surfaces as [`LoadError`] to every waiter.
    /// Failures are not memoized: the next call for the key starts a fresh
    /// load.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> LoadResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult<V>> + Send + 'static,
    {
        let channel = {
            // All three outcomes are decided under this one lock: between
            // checking the slot and publishing a fresh load there must not be
            // a suspension point, or two callers could both become the leader.
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(value)) => {
                    tracing::trace!("serving memoized value");
                    return Ok(value.clone());
                }
                Some(Slot::Loading(channel)) => {
                    // A concurrent load was deduplicated.
                    tracing::trace!("joining in-flight load");
                    channel.clone()
                }
                None => {
                    let channel = self.spawn_load(key.clone(), loader());
                    let evicted = slots.insert(key, Slot::Loading(channel.clone()));
                    debug_assert!(evicted.is_none());
                    channel
                }
            }
        };

        match channel.await {
            Ok(result) => result,
            // The sender is dropped without a result only when the loading
            // task died before settling.
            Err(oneshot::Canceled) => Err(LoadError::Canceled),
        }
    }

    /// Creates the shared channel for a fresh loading episode and spawns the
    /// load onto the current runtime.
    fn spawn_load<Fut>(&self, key: K, load: Fut) -> LoadChannel<V>
    where
        Fut: Future<Output = LoadResult<V>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let pending = PendingLoad::new(Arc::clone(&self.slots), key);
        let task = async move {
            let result = load.await;
            // Settle the slot first. This ensures that callers either see the
            // memoized value, or get a channel that will receive data, or
            // find the slot empty and start a new load.
            match &result {
                Ok(value) => {
                    tracing::trace!("load finished, memoizing value");
                    pending.resolve(value.clone());
                }
                Err(error) => {
                    tracing::trace!(%error, "load failed, clearing slot");
                    drop(pending);
                }
            }
            sender.send(result).ok();
        };
        tokio::spawn(task);

        receiver.shared()
    }
}

/// Tracks a published loading slot until its episode settles.
///
/// On success the slot is flipped to [`Slot::Ready`] via
/// [`resolve`](Self::resolve). In every other case, including a panicking
/// loader, dropping the guard clears the slot so that the next request starts
/// a fresh load.
struct PendingLoad<K: Ord, V> {
    slots: SlotMap<K, V>,
    key: Option<K>,
}

impl<K: Ord, V> PendingLoad<K, V> {
    fn new(slots: SlotMap<K, V>, key: K) -> Self {
        Self {
            slots,
            key: Some(key),
        }
    }

    /// Memoizes the loaded value, replacing the in-flight marker.
    fn resolve(mut self, value: V) {
        if let Some(key) = self.key.take() {
            self.slots.lock().insert(key, Slot::Ready(value));
        }
    }
}

impl<K: Ord, V> Drop for PendingLoad<K, V> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else { return };
        let mut slots = self.slots.lock();
        // Only an unsettled load may be cleared; a ready slot is permanent.
        if matches!(slots.get(&key), Some(Slot::Loading(_))) {
            slots.remove(&key);
        }
    }
}
