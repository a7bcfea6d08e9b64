//! Per-topic fan-out of published values.
//!
//! Each topic has two independent lanes:
//!
//! - **outbound**: values the engine publishes; delivered to local
//!   subscribers and then emitted on the transport.
//! - **inbound**: commands arriving from observers through the transport;
//!   delivered to `receive` handlers only.
//!
//! # Ordering
//!
//! A lane has a single ordering domain. The set of handlers is captured when
//! `publish` is called, so a subscriber registered afterwards never sees that
//! value. A publish issued while the lane is already dispatching (from inside
//! a handler, or from another thread) is queued and drained by the dispatcher
//! already running, so every subscriber observes values in publish order.
//!
//! # Re-entrancy
//!
//! The topic table lock is never held while a handler runs. Handlers may
//! subscribe, unsubscribe or publish freely.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ahash::AHashMap;
use mm_core::error::MmError;
use mm_core::topic::TopicKey;
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::{Envelope, Transport};

/// A subscriber or receiver callback. Returning `Err` is logged as a delivery
/// error and does not affect other handlers.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Produces the current snapshot of a topic for late subscribers.
pub type SnapshotFn = Arc<dyn Fn() -> Vec<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Outbound,
    Inbound,
}

struct Pending {
    value: Value,
    handlers: Vec<(u64, Handler)>,
}

#[derive(Default)]
struct LaneState {
    handlers: Vec<(u64, Handler)>,
    dispatching: bool,
    pending: VecDeque<Pending>,
}

#[derive(Default)]
struct TopicSlot {
    outbound: LaneState,
    inbound: LaneState,
    snapshot: Option<SnapshotFn>,
}

impl TopicSlot {
    fn lane_mut(&mut self, lane: Lane) -> &mut LaneState {
        match lane {
            Lane::Outbound => &mut self.outbound,
            Lane::Inbound => &mut self.inbound,
        }
    }
}

struct Inner {
    topics: Mutex<AHashMap<TopicKey, TopicSlot>>,
    next_id: AtomicU64,
    transport: Option<Arc<dyn Transport>>,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, AHashMap<TopicKey, TopicSlot>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts for the values one `publish` / `deliver_inbound` call dispatched.
///
/// A call that found its lane busy only enqueues, and reports zero values;
/// the value is counted by the call that drains it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub values: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Topic-scoped publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// A bus with local delivery only.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A bus that also emits every published value on `transport`.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::build(Some(transport))
    }

    fn build(transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(AHashMap::new()),
                next_id: AtomicU64::new(1),
                transport,
            }),
        }
    }

    /// Deliver `value` to every subscriber registered on `topic` right now,
    /// then emit it on the transport.
    pub fn publish(&self, topic: &TopicKey, value: Value) -> DeliveryReport {
        self.dispatch(topic, value, Lane::Outbound)
    }

    /// Route a command received from an observer to the `receive` handlers.
    pub fn deliver_inbound(&self, topic: &TopicKey, value: Value) -> DeliveryReport {
        self.dispatch(topic, value, Lane::Inbound)
    }

    /// Register a handler for future publishes on `topic`.
    pub fn subscribe<F>(&self, topic: &TopicKey, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(handler), Lane::Outbound)
    }

    /// Register a handler for commands sent by observers on `topic`.
    pub fn receive<F>(&self, topic: &TopicKey, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(handler), Lane::Inbound)
    }

    /// Back `topic` with a snapshot accessor for late subscribers.
    pub fn set_snapshot<F>(&self, topic: &TopicKey, snapshot: F)
    where
        F: Fn() -> Vec<Value> + Send + Sync + 'static,
    {
        let mut topics = self.inner.topics();
        topics.entry(topic.clone()).or_default().snapshot = Some(Arc::new(snapshot));
    }

    /// Current snapshot of `topic`, or `None` if it has no snapshot accessor.
    pub fn snapshot(&self, topic: &TopicKey) -> Option<Vec<Value>> {
        let accessor = {
            let topics = self.inner.topics();
            topics.get(topic).and_then(|slot| slot.snapshot.clone())
        };
        accessor.map(|f| f())
    }

    /// Number of outbound subscribers currently registered on `topic`.
    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map_or(0, |slot| slot.outbound.handlers.len())
    }

    fn register(&self, topic: &TopicKey, handler: Handler, lane: Lane) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut topics = self.inner.topics();
            topics
                .entry(topic.clone())
                .or_default()
                .lane_mut(lane)
                .handlers
                .push((id, handler));
        }
        debug!("[bus] {lane:?} handler {id} registered on {topic}");
        Subscription {
            inner: Arc::downgrade(&self.inner),
            topic: topic.clone(),
            id,
            lane,
        }
    }

    fn dispatch(&self, topic: &TopicKey, value: Value, lane: Lane) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        {
            let mut topics = self.inner.topics();
            let state = topics.entry(topic.clone()).or_default().lane_mut(lane);
            let handlers = state.handlers.clone();
            state.pending.push_back(Pending { value, handlers });
            if state.dispatching {
                return report;
            }
            state.dispatching = true;
        }

        let _guard = DispatchGuard {
            inner: self.inner.as_ref(),
            topic,
            lane,
        };

        loop {
            let next = {
                let mut topics = self.inner.topics();
                let state = topics.entry(topic.clone()).or_default().lane_mut(lane);
                match state.pending.pop_front() {
                    Some(p) => p,
                    None => {
                        // Must clear under the lock publishers check.
                        state.dispatching = false;
                        break;
                    }
                }
            };

            report.values += 1;
            for (id, handler) in &next.handlers {
                match handler(&next.value) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        report.failed += 1;
                        let err = MmError::Delivery {
                            topic: topic.to_string(),
                            reason: format!("{e:#}"),
                        };
                        warn!("[bus] handler {id}: {err}");
                    }
                }
            }

            if lane == Lane::Outbound {
                if let Some(transport) = &self.inner.transport {
                    transport.emit(&Envelope {
                        topic: topic.clone(),
                        value: next.value,
                    });
                }
            }
        }

        report
    }
}

/// Clears the lane's `dispatching` flag when a handler panics, so the topic
/// is not left wedged for later publishers.
struct DispatchGuard<'a> {
    inner: &'a Inner,
    topic: &'a TopicKey,
    lane: Lane,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut topics = self.inner.topics();
        if let Some(slot) = topics.get_mut(self.topic) {
            slot.lane_mut(self.lane).dispatching = false;
        }
    }
}

/// Handle returned by [`Bus::subscribe`] and [`Bus::receive`].
///
/// Dropping the handle keeps the handler registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    topic: TopicKey,
    id: u64,
    lane: Lane,
}

impl Subscription {
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Remove the handler. Returns `false` if the bus is gone or the handler
    /// was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut topics = inner.topics();
        let Some(slot) = topics.get_mut(&self.topic) else {
            return false;
        };
        let handlers = &mut slot.lane_mut(self.lane).handlers;
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        handlers.len() != before
    }
}
