//! Operator messages: timestamped text on the Message topic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use mm_bus::{Bus, Publish, Publisher};
use mm_core::time_util::now_ms;
use mm_core::topic::TopicKey;
use mm_core::types::Message;
use tracing::info;

/// Publishes operator messages and keeps the most recent ones as the topic's
/// snapshot for late subscribers.
pub struct Messages {
    publisher: Publisher<Message>,
    backlog: Arc<Mutex<VecDeque<Message>>>,
    capacity: usize,
}

impl Messages {
    pub fn new(bus: &Bus, topic: TopicKey, capacity: usize) -> Self {
        let backlog = Arc::new(Mutex::new(VecDeque::new()));
        let read = backlog.clone();
        let publisher = Publisher::with_snapshot(bus, topic, move || {
            read.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect::<Vec<Message>>()
        });
        Self {
            publisher,
            backlog,
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, text: impl Into<String>) {
        let message = Message {
            text: text.into(),
            time: now_ms(),
        };
        info!("[messages] {}", message.text);
        {
            let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(message.clone());
        }
        self.publisher.publish(&message);
    }

    /// Messages currently retained, oldest first.
    pub fn recent(&self) -> Vec<Message> {
        self.backlog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use mm_core::topic::{Topic, TopicNamespace};
    use mm_core::types::*;

    use super::*;

    #[test]
    fn backlog_feeds_the_snapshot_and_is_bounded() {
        let bus = Bus::new();
        let ns = TopicNamespace::new(ExchangeIdentity::new(
            Exchange::Null,
            CurrencyPair::new(Currency::Btc, Currency::Usd),
        ));
        let topic = ns.key(Topic::Message);
        let messages = Messages::new(&bus, topic.clone(), 2);

        messages.publish("start up");
        messages.publish("second");
        messages.publish("third");

        let texts: Vec<_> = messages.recent().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["second", "third"]);

        let snapshot = bus.snapshot(&topic).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1]["text"], "third");
    }
}
