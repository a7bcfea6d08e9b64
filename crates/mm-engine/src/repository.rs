//! Latest-value repositories for operator-tunable parameters.
//!
//! A [`Repository`] is seeded from the bootstrap snapshot, accepts updates
//! from observers on the inbound lane of its topic, and republishes every
//! accepted change. Persistence is a separate observer on the outbound lane
//! ([`persist_on_publish`]), so a repository never talks to storage itself.

use std::sync::{Arc, Mutex, PoisonError};

use mm_bus::{Bus, Publish, Receiver, Subscription, subscribe_as};
use mm_core::topic::TopicKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::persist::RecordStore;

/// Holds the latest `T` and publishes each change.
pub struct Repository<T> {
    latest: Arc<Mutex<T>>,
    publisher: Arc<dyn Publish<T>>,
    _inbound: Subscription,
}

impl<T> Repository<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + 'static,
{
    /// Seed with `initial` and accept updates arriving on `updates`.
    pub fn new(initial: T, publisher: Arc<dyn Publish<T>>, updates: &Receiver<T>) -> Self {
        let latest = Arc::new(Mutex::new(initial));

        let state = latest.clone();
        let out = publisher.clone();
        let inbound = updates.on(move |value: T| {
            apply(&state, out.as_ref(), value);
            Ok(())
        });

        Self {
            latest,
            publisher,
            _inbound: inbound,
        }
    }

    pub fn latest(&self) -> T {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the value locally. Returns `false` if it was unchanged.
    pub fn update(&self, value: T) -> bool {
        apply(&self.latest, self.publisher.as_ref(), value)
    }

    /// Publish the current value, e.g. once after wiring.
    pub fn publish_latest(&self) {
        let value = self.latest();
        self.publisher.publish(&value);
    }

    pub fn topic(&self) -> &TopicKey {
        self.publisher.topic()
    }
}

fn apply<T: Clone + PartialEq>(state: &Mutex<T>, publisher: &dyn Publish<T>, value: T) -> bool {
    {
        let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == value {
            debug!("[repository] unchanged value on {}", publisher.topic());
            return false;
        }
        *current = value.clone();
    }
    // Lock released before publishing; subscribers may read the repository.
    publisher.publish(&value);
    true
}

/// Persist every value published on `topic` through `store`.
///
/// Bus handlers are synchronous, so each write runs on a spawned task; a
/// handler invoked outside a tokio runtime reports a delivery error.
pub fn persist_on_publish<T>(bus: &Bus, topic: &TopicKey, store: Arc<dyn RecordStore<T>>) -> Subscription
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let key = topic.clone();
    info!("[repository] persisting values published on {key}");
    subscribe_as::<T, _>(bus, topic, move |value| {
        let runtime = tokio::runtime::Handle::try_current()?;
        let store = store.clone();
        let key = key.clone();
        runtime.spawn(async move {
            if let Err(e) = store.persist(&value).await {
                error!("[repository] failed to persist value from {key}: {e}");
            }
        });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use mm_bus::Publisher;
    use mm_core::topic::{Topic, TopicNamespace};
    use mm_core::types::*;

    use super::*;
    use crate::persist::MemoryRecord;

    fn ns() -> TopicNamespace {
        TopicNamespace::new(ExchangeIdentity::new(
            Exchange::Null,
            CurrencyPair::new(Currency::Btc, Currency::Usd),
        ))
    }

    fn collect<T: DeserializeOwned + Send + 'static>(bus: &Bus, topic: &TopicKey) -> Arc<Mutex<Vec<T>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        subscribe_as::<T, _>(bus, topic, move |v| {
            sink.lock().unwrap().push(v);
            Ok(())
        });
        seen
    }

    #[test]
    fn inbound_update_is_applied_and_republished() {
        let bus = Bus::new();
        let topic = ns().key(Topic::QuotingParametersChange);
        let publisher: Arc<dyn Publish<QuotingParameters>> =
            Arc::new(Publisher::<QuotingParameters>::new(&bus, topic.clone()));
        let repo = Repository::new(
            QuotingParameters::default(),
            publisher,
            &Receiver::new(&bus, topic.clone()),
        );
        let seen = collect::<QuotingParameters>(&bus, &topic);

        let wider = QuotingParameters {
            width: 0.9,
            ..QuotingParameters::default()
        };
        let report = bus.deliver_inbound(&topic, serde_json::to_value(&wider).unwrap());

        assert_eq!(report.delivered, 1);
        assert_eq!(repo.latest(), wider);
        assert_eq!(*seen.lock().unwrap(), vec![wider]);
    }

    #[test]
    fn unchanged_value_is_not_republished() {
        let bus = Bus::new();
        let topic = ns().key(Topic::SafetySettings);
        let publisher: Arc<dyn Publish<SafetySettings>> =
            Arc::new(Publisher::<SafetySettings>::new(&bus, topic.clone()));
        let repo = Repository::new(
            SafetySettings::default(),
            publisher,
            &Receiver::new(&bus, topic.clone()),
        );
        let seen = collect::<SafetySettings>(&bus, &topic);

        assert!(!repo.update(SafetySettings::default()));
        assert!(seen.lock().unwrap().is_empty());

        repo.publish_latest();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn published_values_are_persisted() {
        let bus = Bus::new();
        let topic = ns().key(Topic::SafetySettings);
        let store = Arc::new(MemoryRecord::new(SafetySettings::default()));
        let _observer = persist_on_publish::<SafetySettings>(&bus, &topic, store.clone());

        let strict = SafetySettings {
            trades_per_minute: 1.0,
            ..SafetySettings::default()
        };
        let report = Publisher::<SafetySettings>::new(&bus, topic).publish(&strict);
        assert_eq!(report.delivered, 1);

        // Let the spawned write run.
        tokio::task::yield_now().await;
        assert_eq!(store.load_latest().await.unwrap(), strict);
    }

    #[test]
    fn persisting_outside_a_runtime_is_a_delivery_failure() {
        let bus = Bus::new();
        let topic = ns().key(Topic::SafetySettings);
        let store = Arc::new(MemoryRecord::new(SafetySettings::default()));
        let _observer = persist_on_publish::<SafetySettings>(&bus, &topic, store);

        let report =
            Publisher::<SafetySettings>::new(&bus, topic).publish(&SafetySettings::default());
        assert_eq!(report.failed, 1);
    }
}
