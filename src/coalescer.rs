//! Single-flight execution keyed by an arbitrary hashable key
//!
//! The first caller for a key registers a shared handle to the producer
//! future; callers arriving while it is still running await the same handle
//! and receive a clone of its output. The registry only stores a weak
//! reference, so the producer lives exactly as long as at least one caller
//! is still waiting on it. Dropping every waiter drops the producer.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type SharedOutput<T> = Shared<BoxFuture<'static, T>>;

struct Slot<T> {
    id: u64,
    handle: WeakShared<BoxFuture<'static, T>>,
}

struct Registry<K, T> {
    next_id: u64,
    in_flight: HashMap<K, Slot<T>>,
}

/// Deduplicates concurrent executions of the same keyed operation
pub struct FetchCoalescer<K, T> {
    registry: Arc<Mutex<Registry<K, T>>>,
}

impl<K, T> FetchCoalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                in_flight: HashMap::new(),
            })),
        }
    }

    /// Run `producer` for `key` unless a run for the same key is already in
    /// flight, in which case wait for that run and return its output.
    ///
    /// `producer` is only called by the caller that starts a new run. It
    /// must return without blocking; the work belongs in the future.
    pub async fn run_once<F, Fut>(&self, key: K, producer: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = {
            let mut registry = lock(&self.registry);
            let existing = registry
                .in_flight
                .get(&key)
                .and_then(|slot| slot.handle.upgrade());
            match existing {
                Some(existing) => {
                    debug!("Joining in-flight fetch for {:?}", key);
                    existing
                }
                None => self.register(&mut registry, key, producer()),
            }
        };

        handle.await
    }

    /// Number of runs that still have at least one waiter attached
    pub fn in_flight(&self) -> usize {
        lock(&self.registry)
            .in_flight
            .values()
            .filter(|slot| slot.handle.upgrade().is_some())
            .count()
    }

    fn register<Fut>(
        &self,
        registry: &mut Registry<K, T>,
        key: K,
        producer: Fut,
    ) -> SharedOutput<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        // Slots whose waiters all went away are dead weight
        registry
            .in_flight
            .retain(|_, slot| slot.handle.upgrade().is_some());

        let id = registry.next_id;
        registry.next_id += 1;
        debug!("Starting fetch {} for {:?}", id, key);

        let cleanup_registry = Arc::clone(&self.registry);
        let cleanup_key = key.clone();
        let handle = async move {
            let output = producer.await;
            // Clear the slot before anyone observes the output, so a caller
            // arriving afterwards starts a fresh run.
            {
                let mut registry = lock(&cleanup_registry);
                if registry.in_flight.get(&cleanup_key).map(|s| s.id) == Some(id) {
                    registry.in_flight.remove(&cleanup_key);
                }
            }
            output
        }
        .boxed()
        .shared();

        if let Some(weak) = handle.downgrade() {
            registry.in_flight.insert(key, Slot { id, handle: weak });
        }
        handle
    }
}

impl<K, T> Default for FetchCoalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<K, T>(registry: &Mutex<Registry<K, T>>) -> MutexGuard<'_, Registry<K, T>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
