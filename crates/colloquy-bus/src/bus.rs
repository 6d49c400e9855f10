use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{BusError, BusResult};
use crate::traits::Handler;

/// A handler registered under one topic.
struct Registration<M> {
    id: u64,
    handler: Arc<dyn Handler<M>>,
}

struct BusInner<T, M> {
    topics: RwLock<HashMap<T, Vec<Registration<M>>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<T, M> BusInner<T, M>
where
    T: Eq + Hash,
{
    // Registration edits never panic mid-update, so a poisoned table is
    // still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<T, Vec<Registration<M>>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<T, Vec<Registration<M>>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &T, id: u64) -> bool {
        let mut topics = self.write();
        let Some(registrations) = topics.get_mut(topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// Outcome of [`FanoutBus::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Registrations still present when the bus shut down.
    pub subscriptions_dropped: usize,
    /// Deliveries that were still running when shutdown began.
    pub in_flight: usize,
    /// `true` if every delivery finished within the grace period; `false`
    /// if the remainder had to be cancelled.
    pub drained: bool,
}

/// Topic-keyed publish/subscribe with per-handler delivery tasks.
///
/// Cloning is cheap; clones share one registration table.
pub struct FanoutBus<T, M> {
    inner: Arc<BusInner<T, M>>,
}

impl<T, M> Clone for FanoutBus<T, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, M> Default for FanoutBus<T, M>
where
    T: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, M> FanoutBus<T, M>
where
    T: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register `handler` under `topic`.
    ///
    /// The handler receives every message published to `topic` after this
    /// call returns, until the returned [`Subscription`] is dropped or
    /// [`unsubscribe`](Subscription::unsubscribe)d.
    pub fn subscribe<H>(&self, topic: T, handler: H) -> BusResult<Subscription<T, M>>
    where
        H: Handler<M>,
    {
        let mut topics = self.inner.write();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Shutdown);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        topics.entry(topic.clone()).or_default().push(Registration {
            id,
            handler: Arc::new(handler),
        });
        drop(topics);

        debug!(?topic, id, "subscribed");
        Ok(Subscription {
            topic,
            id,
            bus: Some(Arc::downgrade(&self.inner)),
        })
    }

    /// Subscribe through a bounded channel.
    ///
    /// A full channel holds up only this subscriber's deliveries. Dropping
    /// the receiver turns further deliveries into logged
    /// [`BusError::ChannelClosed`] failures until the subscription is dropped.
    pub fn subscribe_channel(
        &self,
        topic: T,
        capacity: usize,
    ) -> BusResult<(mpsc::Receiver<M>, Subscription<T, M>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = self.subscribe(topic, ChannelHandler { tx })?;
        Ok((rx, subscription))
    }

    /// Deliver `message` to every handler currently registered under `topic`.
    ///
    /// Returns the number of deliveries started. Never waits on handlers.
    pub fn publish(&self, topic: &T, message: M) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            debug!(?topic, "publish after shutdown ignored");
            return 0;
        }

        let handlers: Vec<(u64, Arc<dyn Handler<M>>)> = match self.inner.read().get(topic) {
            Some(registrations) => registrations
                .iter()
                .map(|r| (r.id, Arc::clone(&r.handler)))
                .collect(),
            None => return 0,
        };

        for (id, handler) in &handlers {
            let id = *id;
            let handler = Arc::clone(handler);
            let message = message.clone();
            let cancel = self.inner.cancel.clone();
            let topic = topic.clone();
            self.inner.tracker.spawn(async move {
                let delivery = AssertUnwindSafe(handler.handle(message)).catch_unwind();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(?topic, id, "delivery cancelled");
                    }
                    outcome = delivery => match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(?topic, id, error = %err, "handler failed"),
                        Err(_) => warn!(?topic, id, "handler panicked"),
                    },
                }
            });
        }

        debug!(?topic, deliveries = handlers.len(), "published");
        handlers.len()
    }

    /// Stop accepting subscriptions, drop every registration, and wait up to
    /// `grace` for running deliveries before cancelling them.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let subscriptions_dropped = {
            let mut topics = self.inner.write();
            self.inner.closed.store(true, Ordering::Release);
            let count = topics.values().map(Vec::len).sum();
            topics.clear();
            count
        };

        self.inner.tracker.close();
        let in_flight = self.inner.tracker.len();
        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            self.inner.cancel.cancel();
            self.inner.tracker.wait().await;
        }

        info!(subscriptions_dropped, in_flight, drained, "bus shut down");
        ShutdownReport {
            subscriptions_dropped,
            in_flight,
            drained,
        }
    }

    pub fn subscriber_count(&self, topic: &T) -> usize {
        self.inner.read().get(topic).map_or(0, Vec::len)
    }

    pub fn topic_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Deliveries currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Forwards messages into a bounded mpsc channel.
struct ChannelHandler<M> {
    tx: mpsc::Sender<M>,
}

#[async_trait::async_trait]
impl<M> Handler<M> for ChannelHandler<M>
where
    M: Send + 'static,
{
    async fn handle(&self, message: M) -> BusResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BusError::ChannelClosed)
    }
}

/// Deregistration handle returned by [`FanoutBus::subscribe`].
///
/// Dropping it deregisters the handler. Publishes that start after the
/// deregistration never reach the handler.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T, M>
where
    T: Eq + Hash,
{
    topic: T,
    id: u64,
    bus: Option<Weak<BusInner<T, M>>>,
}

impl<T, M> Subscription<T, M>
where
    T: Eq + Hash,
{
    pub fn topic(&self) -> &T {
        &self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deregister now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(bus) = self.bus.take().and_then(|weak| weak.upgrade()) {
            if bus.remove(&self.topic, self.id) {
                debug!(id = self.id, "unsubscribed");
            }
        }
    }
}

impl<T, M> Drop for Subscription<T, M>
where
    T: Eq + Hash,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, M> Debug for Subscription<T, M>
where
    T: Eq + Hash + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
