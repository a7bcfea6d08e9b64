//! Transport mediator seam.
//!
//! The bus hands every outbound value to a [`Transport`], which fans it out to
//! remote observers. Commands travel the other way: whatever receives them
//! from the wire calls [`Bus::deliver_inbound`](crate::Bus::deliver_inbound),
//! which [`pump_inbound`] does for an mpsc channel.
//!
//! [`BroadcastTransport`] is the in-process implementation used by the runner
//! and tests: outbound envelopes go to a tokio broadcast channel that any
//! number of observers can subscribe to.

use mm_core::topic::TopicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::bus::Bus;

/// One value on one topic, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: TopicKey,
    pub value: Value,
}

/// Outbound side of the transport mediator.
pub trait Transport: Send + Sync {
    /// Fan `envelope` out to remote observers. Must not block.
    fn emit(&self, envelope: &Envelope);
}

/// In-process transport over a tokio broadcast channel.
///
/// Slow observers lag and skip old envelopes rather than stalling publishers.
#[derive(Clone)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attach a new remote observer.
    pub fn observe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Transport for BroadcastTransport {
    fn emit(&self, envelope: &Envelope) {
        // No observers attached is not an error.
        if self.sender.send(envelope.clone()).is_err() {
            debug!("[transport] no observers for {}", envelope.topic);
        }
    }
}

/// Route inbound envelopes from `rx` into the bus until the channel closes.
pub async fn pump_inbound(bus: Bus, mut rx: mpsc::Receiver<Envelope>) {
    info!("[transport] inbound pump started");
    while let Some(envelope) = rx.recv().await {
        debug!("[transport] inbound on {}", envelope.topic);
        bus.deliver_inbound(&envelope.topic, envelope.value);
    }
    info!("[transport] inbound pump exited");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mm_core::topic::{Scope, topic_key};
    use mm_core::types::{Currency, CurrencyPair, Exchange, ExchangeIdentity};
    use serde_json::json;

    use super::*;

    fn key(name: &str) -> TopicKey {
        let id = ExchangeIdentity::new(Exchange::Null, CurrencyPair::new(Currency::Btc, Currency::Usd));
        topic_key(name, Scope::Global, &id).unwrap()
    }

    #[tokio::test]
    async fn observers_receive_published_envelopes() {
        let transport = Arc::new(BroadcastTransport::new(16));
        let mut observer = transport.observe();
        let bus = Bus::with_transport(transport.clone());
        let topic = key("Message");

        bus.publish(&topic, json!("hello"));

        let envelope = observer.recv().await.unwrap();
        assert_eq!(envelope.topic, topic);
        assert_eq!(envelope.value, json!("hello"));
    }

    #[tokio::test]
    async fn emit_without_observers_is_harmless() {
        let transport = BroadcastTransport::new(4);
        assert_eq!(transport.observer_count(), 0);
        transport.emit(&Envelope {
            topic: key("Message"),
            value: json!(1),
        });
    }

    #[tokio::test]
    async fn pump_routes_commands_to_receivers() {
        let bus = Bus::new();
        let topic = key("CancelOrder");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.receive(&topic, move |v| {
            sink.lock().unwrap().push(v.clone());
            Ok(())
        });

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_inbound(bus.clone(), rx));
        tx.send(Envelope {
            topic: topic.clone(),
            value: json!({"order_id": "1"}),
        })
        .await
        .unwrap();
        drop(tx);
        pump.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![json!({"order_id": "1"})]);
    }
}
