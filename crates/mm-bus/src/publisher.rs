//! Typed publishers and receivers on top of the untyped [`Bus`].
//!
//! Values are serialized to JSON once per publish; every subscriber, the
//! transport and the HTTP mirror see the same encoding.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context;
use mm_core::topic::TopicKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::bus::{Bus, DeliveryReport, Subscription};

/// Anything that can publish `T` on a topic. Implemented by [`Publisher`] and
/// the HTTP-mirrored [`HttpPublisher`](crate::HttpPublisher), so collaborators
/// can take either.
pub trait Publish<T>: Send + Sync {
    fn publish(&self, value: &T) -> DeliveryReport;
    fn topic(&self) -> &TopicKey;
}

/// Publishes `T` on one topic.
pub struct Publisher<T> {
    bus: Bus,
    topic: TopicKey,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize> Publisher<T> {
    pub fn new(bus: &Bus, topic: TopicKey) -> Self {
        Self {
            bus: bus.clone(),
            topic,
            _marker: PhantomData,
        }
    }

    /// A publisher whose topic is backed by `snapshot` for late subscribers.
    pub fn with_snapshot<F>(bus: &Bus, topic: TopicKey, snapshot: F) -> Self
    where
        F: Fn() -> Vec<T> + Send + Sync + 'static,
        T: 'static,
    {
        bus.set_snapshot(&topic, move || {
            snapshot()
                .iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect()
        });
        Self::new(bus, topic)
    }
}

impl<T: Serialize> Publish<T> for Publisher<T> {
    fn publish(&self, value: &T) -> DeliveryReport {
        match serde_json::to_value(value) {
            Ok(v) => self.bus.publish(&self.topic, v),
            Err(e) => {
                error!("[publisher] failed to encode value for {}: {e}", self.topic);
                DeliveryReport::default()
            }
        }
    }

    fn topic(&self) -> &TopicKey {
        &self.topic
    }
}

impl<T, P: Publish<T> + ?Sized> Publish<T> for Arc<P> {
    fn publish(&self, value: &T) -> DeliveryReport {
        (**self).publish(value)
    }

    fn topic(&self) -> &TopicKey {
        (**self).topic()
    }
}

/// Receives commands of type `T` sent by observers on one topic.
pub struct Receiver<T> {
    bus: Bus,
    topic: TopicKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + 'static> Receiver<T> {
    pub fn new(bus: &Bus, topic: TopicKey) -> Self {
        Self {
            bus: bus.clone(),
            topic,
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Register `handler` for incoming commands. Payloads that do not decode
    /// as `T` are reported as delivery errors for this handler only.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = self.topic.clone();
        self.bus.receive(&self.topic, move |raw| {
            let value: T = serde_json::from_value(raw.clone())
                .with_context(|| format!("undecodable command on {topic}"))?;
            handler(value)
        })
    }
}

/// Subscribe to published values of `T` on `topic`.
pub fn subscribe_as<T, F>(bus: &Bus, topic: &TopicKey, handler: F) -> Subscription
where
    T: DeserializeOwned + 'static,
    F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let key = topic.clone();
    bus.subscribe(topic, move |raw| {
        let value: T = serde_json::from_value(raw.clone())
            .with_context(|| format!("undecodable value on {key}"))?;
        handler(value)
    })
}
