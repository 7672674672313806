//! Coalescing of concurrent identical operations.
//!
//! The first caller for a key starts the operation; callers arriving while it is in
//! flight await the same future and receive a clone of its output. The entry is
//! released as soon as the operation completes, success or failure, so the next
//! caller starts a fresh one.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Single-flight map keyed by operation identity.
///
/// # Example
///
/// ```
/// use niu_transport::request::single_flight::SingleFlight;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights = SingleFlight::<&'static str, u32>::new();
/// let calls = Arc::new(AtomicUsize::new(0));
///
/// let run = || {
///     let calls = Arc::clone(&calls);
///     flights.run("refresh", move || async move {
///         calls.fetch_add(1, Ordering::SeqCst);
///         tokio::task::yield_now().await;
///         200
///     })
/// };
/// let (a, b) = tokio::join!(run(), run());
/// assert_eq!((a, b), (200, 200));
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # }
/// ```
pub struct SingleFlight<K, T> {
    flights: Mutex<HashMap<K, (u64, Flight<T>)>>,
    generation: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Run `make()` for `key`, or join the run already in flight.
    ///
    /// `make` is only called by the caller that starts the operation.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, flight) = {
            let mut flights = self.lock();
            match flights.get(&key) {
                Some((generation, flight)) => {
                    trace!("joining in-flight operation");
                    (*generation, flight.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let flight = make().boxed().shared();
                    flights.insert(key.clone(), (generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let output = flight.await;

        let mut flights = self.lock();
        if flights.get(&key).is_some_and(|(g, _)| *g == generation) {
            flights.remove(&key);
        }
        output
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, (u64, Flight<T>)>> {
        self.flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
