//! HTTP mirror: the latest value of selected topics, readable with a plain
//! request/response accessor independent of the push transport.
//!
//! [`HttpMirror`] is only a registry of named accessors; serving it over HTTP
//! is the runner's job.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ahash::AHashMap;
use mm_core::topic::TopicKey;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::bus::DeliveryReport;
use crate::publisher::{Publish, Publisher};

/// Returns the current mirrored value of one name.
pub type Accessor = Arc<dyn Fn() -> Value + Send + Sync>;

/// Registry of mirrored names. Cheap to clone.
#[derive(Clone, Default)]
pub struct HttpMirror {
    routes: Arc<RwLock<AHashMap<String, Accessor>>>,
}

impl HttpMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the accessor for `name`.
    pub fn register<F>(&self, name: &str, accessor: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(accessor));
    }

    /// Current value for `name`, or `None` if nothing is registered under it.
    pub fn get(&self, name: &str) -> Option<Value> {
        let accessor = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        accessor.map(|f| f())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Publishes on the bus and mirrors the latest value under a logical name.
///
/// Until the first publish the mirror returns `null`.
pub struct HttpPublisher<T> {
    inner: Publisher<T>,
    latest: Arc<Mutex<Value>>,
}

impl<T: Serialize> HttpPublisher<T> {
    pub fn new(name: &str, inner: Publisher<T>, mirror: &HttpMirror) -> Self {
        let latest = Arc::new(Mutex::new(Value::Null));
        let read = latest.clone();
        mirror.register(name, move || {
            read.lock().unwrap_or_else(PoisonError::into_inner).clone()
        });
        Self { inner, latest }
    }
}

impl<T: Serialize> Publish<T> for HttpPublisher<T> {
    fn publish(&self, value: &T) -> DeliveryReport {
        match serde_json::to_value(value) {
            Ok(v) => *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = v,
            Err(e) => error!("[mirror] failed to encode value for {}: {e}", self.inner.topic()),
        }
        self.inner.publish(value)
    }

    fn topic(&self) -> &TopicKey {
        self.inner.topic()
    }
}

/// HTTP-only publisher keeping a bounded backlog (no bus topic).
pub struct StandaloneHttpPublisher<T> {
    backlog: Arc<Mutex<VecDeque<Value>>>,
    capacity: usize,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize> StandaloneHttpPublisher<T> {
    pub fn new(name: &str, mirror: &HttpMirror, capacity: usize) -> Self {
        let backlog = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let read = backlog.clone();
        mirror.register(name, move || {
            let items = read.lock().unwrap_or_else(PoisonError::into_inner);
            Value::Array(items.iter().cloned().collect())
        });
        Self {
            backlog,
            capacity: capacity.max(1),
            _marker: PhantomData,
        }
    }

    /// Append `value`, evicting the oldest entry once the backlog is full.
    pub fn publish(&self, value: &T) {
        let encoded = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                error!("[mirror] failed to encode backlog value: {e}");
                return;
            }
        };
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        if backlog.len() == self.capacity {
            backlog.pop_front();
        }
        backlog.push_back(encoded);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mm_core::topic::{Topic, TopicNamespace};
    use mm_core::types::*;
    use serde_json::json;

    use super::*;
    use crate::bus::Bus;

    fn ns() -> TopicNamespace {
        TopicNamespace::new(ExchangeIdentity::new(
            Exchange::Null,
            CurrencyPair::new(Currency::Btc, Currency::Usd),
        ))
    }

    #[test]
    fn http_publisher_mirrors_latest_and_forwards() {
        let bus = Bus::new();
        let mirror = HttpMirror::new();
        let topic = ns().key(Topic::FairValue);
        let publisher = HttpPublisher::new("FairValue", Publisher::<f64>::new(&bus, topic.clone()), &mirror);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(&topic, move |v| {
            sink.lock().unwrap().push(v.clone());
            Ok(())
        });

        assert_eq!(mirror.get("FairValue"), Some(Value::Null));
        publisher.publish(&100.5);
        publisher.publish(&101.0);

        assert_eq!(mirror.get("FairValue"), Some(json!(101.0)));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn standalone_backlog_is_bounded() {
        let mirror = HttpMirror::new();
        let latency = StandaloneHttpPublisher::<u64>::new("latency", &mirror, 3);
        for i in 0..5 {
            latency.publish(&i);
        }
        assert_eq!(mirror.get("latency"), Some(json!([2, 3, 4])));
    }

    #[test]
    fn unknown_name_is_none() {
        let mirror = HttpMirror::new();
        assert!(mirror.get("nothing").is_none());
        assert!(mirror.names().is_empty());
    }
}
