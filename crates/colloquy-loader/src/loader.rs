use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LoadError, LoadResult};
use crate::traits::BatchFn;

/// Default coalescing window.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(2);

/// Default upper bound on keys per batched call.
pub const DEFAULT_MAX_BATCH: usize = 512;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Tuning for a [`BatchLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long the first pending key waits for company before the flush.
    pub delay: Duration,
    /// Keys per batched call; 0 means unbounded.
    pub max_batch: usize,
}

impl LoaderConfig {
    pub fn new(delay: Duration, max_batch: usize) -> Self {
        Self { delay, max_batch }
    }

    fn effective_delay(&self) -> Duration {
        self.delay.max(MIN_DELAY)
    }

    fn effective_max_batch(&self) -> usize {
        if self.max_batch == 0 {
            usize::MAX
        } else {
            self.max_batch
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

type Waiter<V> = oneshot::Sender<LoadResult<V>>;

struct LoaderState<K, V> {
    cache: HashMap<K, V>,
    /// Keys waiting for the next flush, with everyone waiting on each.
    pending: HashMap<K, Vec<Waiter<V>>>,
    /// Pending keys in arrival order.
    queue: VecDeque<K>,
    /// A flush task exists and will drain `queue`.
    flush_scheduled: bool,
}

struct LoaderInner<K, V, F> {
    source: F,
    config: LoaderConfig,
    state: Mutex<LoaderState<K, V>>,
}

/// Coalescing, caching front for a [`BatchFn`].
///
/// Cloning is cheap and clones share the cache and pending table.
pub struct BatchLoader<K, V, F> {
    inner: Arc<LoaderInner<K, V, F>>,
}

impl<K, V, F> Clone for BatchLoader<K, V, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, F> BatchLoader<K, V, F>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    pub fn new(source: F) -> Self {
        Self::with_config(source, LoaderConfig::default())
    }

    pub fn with_config(source: F, config: LoaderConfig) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                source,
                config,
                state: Mutex::new(LoaderState {
                    cache: HashMap::new(),
                    pending: HashMap::new(),
                    queue: VecDeque::new(),
                    flush_scheduled: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> LoaderConfig {
        self.inner.config
    }

    /// Resolve one key, joining the current batch if one is forming.
    ///
    /// Dropping the returned future abandons the wait; the batch itself
    /// still runs for any other waiters.
    pub async fn load(&self, key: K) -> LoadResult<V> {
        let rx = {
            let mut state = self.inner.lock();
            if let Some(value) = state.cache.get(&key) {
                return Ok(value.clone());
            }

            let (tx, rx) = oneshot::channel();
            match state.pending.get_mut(&key) {
                Some(waiters) => waiters.push(tx),
                None => {
                    state.pending.insert(key.clone(), vec![tx]);
                    state.queue.push_back(key);
                }
            }

            if !state.flush_scheduled {
                state.flush_scheduled = true;
                let delay = self.inner.config.effective_delay();
                tokio::spawn(Arc::clone(&self.inner).flush_after(delay));
            }
            rx
        };

        rx.await.unwrap_or(Err(LoadError::Aborted))
    }

    /// Like [`load`](Self::load), but returns [`LoadError::Cancelled`] as soon
    /// as `cancel` fires. Other waiters on the same key are unaffected.
    pub async fn load_cancellable(&self, key: K, cancel: &CancellationToken) -> LoadResult<V> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LoadError::Cancelled),
            result = self.load(key) => result,
        }
    }

    /// Resolve several keys; all of them land in the same window.
    pub async fn load_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<LoadResult<V>> {
        join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Seed the cache. An existing entry is left alone.
    pub fn prime(&self, key: K, value: V) {
        self.inner.lock().cache.entry(key).or_insert(value);
    }

    /// Drop a cached value so the next `load` goes back to the source.
    pub fn clear(&self, key: &K) {
        self.inner.lock().cache.remove(key);
    }

    pub fn cached_len(&self) -> usize {
        self.inner.lock().cache.len()
    }
}

impl<K, V, F> LoaderInner<K, V, F>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    /// The state is only mutated in short non-panicking sections, so a
    /// poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, LoaderState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn flush_after(self: Arc<Self>, delay: Duration) {
        tokio::time::sleep(delay).await;
        self.flush().await;
    }

    /// Answer up to `max_batch` pending keys. Overflow gets its own flush
    /// task straight away.
    fn flush(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let mut batch: Vec<(K, Vec<Waiter<V>>)> = Vec::new();
            let remaining = {
                let mut state = self.lock();
                let max_batch = self.config.effective_max_batch();

                while batch.len() < max_batch {
                    let Some(key) = state.queue.pop_front() else {
                        break;
                    };
                    let Some(mut waiters) = state.pending.remove(&key) else {
                        continue;
                    };
                    // Callers that gave up before the flush.
                    waiters.retain(|w| !w.is_closed());
                    if waiters.is_empty() {
                        continue;
                    }
                    if let Some(value) = state.cache.get(&key) {
                        for waiter in waiters {
                            let _ = waiter.send(Ok(value.clone()));
                        }
                        continue;
                    }
                    batch.push((key, waiters));
                }

                let remaining = state.queue.len();
                if remaining == 0 {
                    state.flush_scheduled = false;
                } else {
                    tokio::spawn(Arc::clone(&self).flush());
                }
                remaining
            };

            if batch.is_empty() {
                return;
            }

            let keys: Vec<K> = batch.iter().map(|(key, _)| key.clone()).collect();
            debug!(batch = keys.len(), remaining, "flushing batch");

            match self.source.load_batch(&keys).await {
                Ok(mut values) => {
                    let mut state = self.lock();
                    for (key, waiters) in batch {
                        let result = match values.remove(&key) {
                            Some(value) => {
                                state.cache.insert(key, value.clone());
                                Ok(value)
                            }
                            None => Err(LoadError::MissingKey),
                        };
                        for waiter in waiters {
                            let _ = waiter.send(result.clone());
                        }
                    }
                }
                Err(err) => {
                    warn!(batch = keys.len(), error = %err, "batch load failed");
                    let err = LoadError::Batch(Arc::new(err));
                    for (_, waiters) in batch {
                        for waiter in waiters {
                            let _ = waiter.send(Err(err.clone()));
                        }
                    }
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("source unavailable")]
    struct SourceDown;

    /// Doubles each key; records every batch it is asked for.
    #[derive(Default)]
    struct Doubler {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<u32>>>,
        fail_next: AtomicBool,
        skip: Option<u32>,
    }

    #[async_trait]
    impl BatchFn<u32, u64> for Arc<Doubler> {
        type Error = SourceDown;

        async fn load_batch(&self, keys: &[u32]) -> Result<HashMap<u32, u64>, SourceDown> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(keys.to_vec());
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(SourceDown);
            }
            Ok(keys
                .iter()
                .filter(|k| Some(**k) != self.skip)
                .map(|k| (*k, u64::from(*k) * 2))
                .collect())
        }
    }

    fn loader(source: &Arc<Doubler>, config: LoaderConfig) -> BatchLoader<u32, u64, Arc<Doubler>> {
        BatchLoader::with_config(Arc::clone(source), config)
    }

    fn window(ms: u64) -> LoaderConfig {
        LoaderConfig::new(Duration::from_millis(ms), DEFAULT_MAX_BATCH)
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_call() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(20));

        let results = join_all((0..50).map(|i| {
            let loader = loader.clone();
            async move { loader.load(i % 5).await }
        }))
        .await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), (i as u64 % 5) * 2);
        }
        let batches = source.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 5);
    }

    #[tokio::test]
    async fn spawned_loads_share_one_call() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(50));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.load(7).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 14);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_key_skips_source() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(1));

        assert_eq!(loader.load(3).await.unwrap(), 6);
        assert_eq!(loader.load(3).await.unwrap(), 6);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cached_len(), 1);
    }

    #[tokio::test]
    async fn primed_key_never_hits_source() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(1));
        loader.prime(9, 100);
        loader.prime(9, 5);
        assert_eq!(loader.load(9).await.unwrap(), 100);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_forces_reload() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(1));
        loader.load(1).await.unwrap();
        loader.clear(&1);
        loader.load(1).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_siblings_alone() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(50));
        let token = CancellationToken::new();

        let sibling = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load(4).await })
        };
        let cancelled = {
            let loader = loader.clone();
            let token = token.clone();
            tokio::spawn(async move { loader.load_cancellable(4, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();

        let err = cancelled.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(sibling.await.unwrap().unwrap(), 8);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_key_is_not_fetched() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, window(30));
        let token = CancellationToken::new();
        token.cancel();

        let err = loader.load_cancellable(1, &token).await.unwrap_err();
        assert!(err.is_cancelled());
        // Nothing was registered for the pre-cancelled call.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_reaches_all_waiters_and_is_retried() {
        let source = Arc::new(Doubler::default());
        source.fail_next.store(true, Ordering::SeqCst);
        let loader = loader(&source, window(10));

        let results = loader.load_many([1, 1, 2]).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(LoadError::Batch(_)))));
        assert_eq!(loader.cached_len(), 0);

        assert_eq!(loader.load(1).await.unwrap(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overflow_is_flushed_without_new_keys() {
        let source = Arc::new(Doubler::default());
        let loader = loader(&source, LoaderConfig::new(Duration::from_millis(10), 2));

        let results = loader.load_many(0..5).await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 2, 4, 6, 8]);

        let batches = source.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 2));
    }

    #[tokio::test]
    async fn missing_key_is_an_error_and_not_cached() {
        let source = Arc::new(Doubler {
            skip: Some(13),
            ..Default::default()
        });
        let loader = loader(&source, window(5));

        let results = loader.load_many([12, 13]).await;
        assert_eq!(*results[0].as_ref().unwrap(), 24);
        assert!(matches!(results[1], Err(LoadError::MissingKey)));
        assert_eq!(loader.cached_len(), 1);
    }

    #[test]
    fn zero_config_is_normalized() {
        let config = LoaderConfig::new(Duration::ZERO, 0);
        assert_eq!(config.effective_delay(), MIN_DELAY);
        assert_eq!(config.effective_max_batch(), usize::MAX);
        assert_eq!(LoaderConfig::default().max_batch, 512);
    }
}
