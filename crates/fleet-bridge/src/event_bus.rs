use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, warn};

use crate::protocol::{Message, Payload};

/// Per-subscriber queue depth used by [`EventBus::new`].
pub const DEFAULT_CAPACITY: usize = 256;

struct BusInner {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl BusInner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Message>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget `topic` once nobody listens to it any more.
    fn release(&self, topic: &str) {
        let mut topics = self.topics();
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(topic);
            debug!(topic, "topic removed after last unsubscribe");
        }
    }
}

/// In-process, topic-partitioned publish/subscribe bus.
///
/// Each topic is a `tokio::sync::broadcast` ring of fixed capacity. A
/// publisher never waits: when a subscriber falls more than `capacity`
/// messages behind, the oldest messages are overwritten and the loss is
/// counted on that subscription and on the bus. Messages published before a
/// subscription exists are never replayed to it.
///
/// The bus is cheap to clone; clones share the same topics.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Counters exposed on the status endpoint.
///
/// `dropped` grows when a lagging subscriber next reads, not when its ring
/// overflows, so a subscriber that never reads again is not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub topics: usize,
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose per-subscriber queues hold at least `capacity`
    /// messages. The broadcast ring only comes in powers of two, so the
    /// bound is rounded up; [`EventBus::capacity`] reports the real one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1).next_power_of_two(),
                topics: Mutex::new(HashMap::new()),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Publish `payload` on `topic` and return the number of subscribers it
    /// was queued for. Zero subscribers is not an error.
    pub fn publish(&self, topic: &str, payload: impl Into<Payload>) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // Sending under the map lock keeps a topic from being removed between
        // lookup and send.
        let topics = self.inner.topics();
        match topics.get(topic) {
            Some(tx) => tx.send(Message::new(topic, payload)).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to `topic`. Only messages published after this call are
    /// delivered. On a shut-down bus the subscription is already closed.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let rx = {
            let mut topics = self.inner.topics();
            if self.inner.closed.load(Ordering::Acquire) {
                None
            } else {
                let tx = topics
                    .entry(topic.to_string())
                    .or_insert_with(|| broadcast::channel(self.inner.capacity).0);
                Some(tx.subscribe())
            }
        };
        Subscription {
            topic: topic.to_string(),
            rx,
            bus: self.inner.clone(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map_or(0, |tx| tx.receiver_count())
    }

    pub fn topic_count(&self) -> usize {
        self.inner.topics().len()
    }

    /// Total messages lost to slow subscribers across the bus.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BusStats {
        let topics = self.inner.topics();
        BusStats {
            topics: topics.len(),
            subscribers: topics.values().map(|tx| tx.receiver_count()).sum(),
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close every topic. Subscribers drain what is already queued and then
    /// see the end of their stream; later publishes are discarded.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut topics = self.inner.topics();
        let count = topics.len();
        topics.clear();
        debug!(topics = count, "event bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to one subscriber queue. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    rx: Option<broadcast::Receiver<Message>>,
    bus: Arc<BusInner>,
    dropped: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// `false` after unsubscribe or once the bus has closed the topic.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Messages this subscriber lost because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Wait for the next message. Returns `None` once unsubscribed or after
    /// the bus shuts down and the queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Turn the subscription into an endless stream of messages.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let msg = sub.recv().await?;
            Some((msg, sub))
        })
    }

    /// Release the queue. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.bus.release(&self.topic);
        }
    }

    fn record_lag(&mut self, n: u64) {
        self.dropped += n;
        self.bus.dropped.fetch_add(n, Ordering::Relaxed);
        warn!(topic = %self.topic, dropped = n, "subscriber lagged; oldest messages dropped");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.rx.is_some())
            .field("dropped", &self.dropped)
            .finish()
    }
}
