//! Coalesces concurrent identical async requests into one in-flight future.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Mutex;

use futures::future::{FutureExt, Shared};

type BoxedShared<V> = Shared<Pin<Box<dyn Future<Output = V> + Send>>>;

/// A map from key to in-flight [`Shared`] future.
///
/// When two callers ask for the same key while a request is already
/// running, the second caller awaits the first caller's future instead of
/// starting a duplicate — the embedding-provider equivalent of avoiding two
/// identical HTTPS calls for one query fired twice in quick succession.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, BoxedShared<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    /// Creates an empty single-flight coalescer.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `fut` for `key`, or joins an already-running call for the same
    /// key if one exists.
    ///
    /// `fut` is only constructed (and polled) for the first caller; later
    /// callers receive a clone of the same [`Shared`] future.
    pub async fn run<Fut>(&self, key: K, fut: Fut) -> V
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut map = self.inflight.lock().unwrap();
            if let Some(existing) = map.get(&key) {
                existing.clone()
            } else {
                let boxed: Pin<Box<dyn Future<Output = V> + Send>> = Box::pin(fut);
                let shared = boxed.shared();
                map.insert(key.clone(), shared.clone());
                shared
            }
        };

        let result = shared.await;
        // Best-effort cleanup: if a new call for this key started between
        // our await completing and this line, it gets evicted too and the
        // next caller starts a fresh future. Harmless, just one redundant
        // call in a narrow race window.
        self.inflight.lock().unwrap().remove(&key);
        result
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_calls_coalesce_to_one_execution() {
        let flight: Arc<SingleFlight<String, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("key".to_string(), async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        42u32
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_each_run() {
        let flight: SingleFlight<String, u32> = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            flight
                .run("key".to_string(), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    7u32
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
