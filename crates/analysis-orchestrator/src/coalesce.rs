use analysis_core::FetchError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;
type InFlight<K, V> = DashMap<K, (u64, SharedFetch<V>)>;

/// Deduplicates concurrent requests for the same key.
///
/// The first caller for a key spawns the fetch as its own task; callers
/// arriving while it is outstanding await the same result. The task runs to
/// completion even if every caller goes away, and it releases the slot itself
/// once the fetch settles, so failures are never reused.
pub struct RequestCoalescer<K, V> {
    in_flight: Arc<InFlight<K, V>>,
    next_id: AtomicU64,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        // entry guard is dropped at the end of this statement, before any await
        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => {
                tracing::debug!("Joining in-flight request for {:?}", key);
                slot.get().1.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let shared = self.spawn_fetch(key, id, fetch());
                slot.insert((id, shared.clone()));
                shared
            }
        };

        shared.await
    }

    fn spawn_fetch<Fut>(&self, key: K, id: u64, fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let release = SlotRelease {
            in_flight: self.in_flight.clone(),
            key,
            id,
        };
        let task = tokio::spawn(async move {
            // released on completion and on panic alike
            let _release = release;
            fetch.await
        });

        task.map(|joined| {
            joined.unwrap_or_else(|e| Err(FetchError::unknown(format!("fetch task failed: {}", e))))
        })
        .boxed()
        .shared()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Frees an in-flight slot when the fetch task ends
struct SlotRelease<K, V>
where
    K: Eq + Hash,
{
    in_flight: Arc<InFlight<K, V>>,
    key: K,
    id: u64,
}

impl<K, V> Drop for SlotRelease<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // a newer request may already own the slot
        let id = self.id;
        self.in_flight.remove_if(&self.key, |_, (slot_id, _)| *slot_id == id);
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
