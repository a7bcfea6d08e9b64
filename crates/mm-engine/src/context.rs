//! Application context: everything wired for one deployment.
//!
//! [`Engine::start`] is the only constructor. It checks the gateway, runs the
//! bootstrap barrier and wires publishers, repositories and the order broker
//! from the snapshot. Nothing is published or subscribed before the barrier
//! resolves, so a failed load leaves the bus untouched.

use std::sync::{Arc, Weak};
use std::time::Instant;

use mm_bus::{
    Bus, HttpMirror, HttpPublisher, Publish, Publisher, Receiver, StandaloneHttpPublisher, Subscription,
};
use mm_core::config::{EngineConfig, Selection};
use mm_core::error::MmError;
use mm_core::topic::{Topic, TopicNamespace};
use mm_core::types::*;
use tracing::{info, warn};

use crate::bootstrap::{Snapshot, load_snapshot};
use crate::gateway::{self, OrderBroker};
use crate::messages::Messages;
use crate::persist::{Persistence, spawn_append};
use crate::repository::{Repository, persist_on_publish};
use crate::shutdown::{CancelOpenOrders, CleanupAction};

/// HTTP-only name for our own fills.
pub const TRADES_HTTP: &str = "trades";
/// HTTP-only name for startup / round-trip latencies in milliseconds.
pub const LATENCY_HTTP: &str = "latency";

pub struct Engine;

impl Engine {
    /// Check the gateway, load persisted state, then wire the context.
    pub async fn start(
        selection: Selection,
        config: &EngineConfig,
        stores: &Persistence,
        bus: Bus,
        mirror: HttpMirror,
    ) -> Result<AppContext, MmError> {
        gateway::ensure_supported(selection.identity.exchange)?;

        let started = Instant::now();
        let snapshot = load_snapshot(stores, &selection.identity, &config.limits).await?;
        let load_ms = started.elapsed().as_millis() as u64;

        let ctx = AppContext::wire(selection, config, stores, bus, mirror, snapshot)?;
        ctx.latency.publish(&load_ms);
        Ok(ctx)
    }
}

/// Owns every long-lived component of a running deployment.
pub struct AppContext {
    pub selection: Selection,
    pub namespace: TopicNamespace,
    pub bus: Bus,
    pub mirror: HttpMirror,
    pub messages: Messages,
    pub safety: Repository<SafetySettings>,
    pub params: Repository<QuotingParameters>,
    pub order_broker: Arc<dyn OrderBroker>,
    pub connectivity: HttpPublisher<ConnectivityStatus>,
    pub market_trades: Publisher<ExchangePairMessage<MarketTrade>>,
    trades: HttpPublisher<Trade>,
    trades_http: StandaloneHttpPublisher<Trade>,
    latency: StandaloneHttpPublisher<u64>,
    stores: Persistence,
    subscriptions: Vec<Subscription>,
}

impl AppContext {
    fn wire(
        selection: Selection,
        config: &EngineConfig,
        stores: &Persistence,
        bus: Bus,
        mirror: HttpMirror,
        snapshot: Snapshot,
    ) -> Result<Self, MmError> {
        let identity = selection.identity;
        let ns = TopicNamespace::new(identity);
        let mut subscriptions = Vec::new();

        // Discovery
        let advert = ProductAdvertisement {
            exchange: identity.exchange,
            pair: identity.pair,
            environment: selection.environment,
        };
        let advert_snapshot = advert.clone();
        let advert_publisher = Publisher::with_snapshot(&bus, ns.key(Topic::ProductAdvertisement), move || {
            vec![advert_snapshot.clone()]
        });
        advert_publisher.publish(&advert);

        let messages = Messages::new(&bus, ns.key(Topic::Message), config.http_backlog);
        messages.publish("start up");

        // Parameter repositories
        let safety_key = ns.key(Topic::SafetySettings);
        let safety = Repository::new(
            snapshot.safety,
            mirrored(&bus, &mirror, Topic::SafetySettings, &ns),
            &Receiver::new(&bus, safety_key.clone()),
        );
        safety.publish_latest();
        subscriptions.push(persist_on_publish(&bus, &safety_key, stores.safety.clone()));

        let params_key = ns.key(Topic::QuotingParametersChange);
        let params = Repository::new(
            snapshot.params,
            mirrored(&bus, &mirror, Topic::QuotingParametersChange, &ns),
            &Receiver::new(&bus, params_key.clone()),
        );
        params.publish_latest();
        subscriptions.push(persist_on_publish(&bus, &params_key, stores.params.clone()));

        // Orders
        let reports_key = ns.key(Topic::OrderStatusReports);
        let order_broker = gateway::create_order_broker(
            identity,
            &snapshot.orders,
            mirrored(&bus, &mirror, Topic::OrderStatusReports, &ns),
            stores.orders.clone(),
        )?;
        let weak: Weak<dyn OrderBroker> = Arc::downgrade(&order_broker);
        bus.set_snapshot(&reports_key, move || match weak.upgrade() {
            Some(broker) => broker
                .open_orders()
                .iter()
                .filter_map(|o| serde_json::to_value(o).ok())
                .collect(),
            None => Vec::new(),
        });
        subscriptions.extend(gateway::attach_commands(
            &order_broker,
            &Receiver::new(&bus, ns.key(Topic::SubmitNewOrder)),
            &Receiver::new(&bus, ns.key(Topic::CancelOrder)),
        ));

        // Trades
        let trades_http = StandaloneHttpPublisher::new(TRADES_HTTP, &mirror, config.http_backlog);
        for trade in &snapshot.trades {
            trades_http.publish(trade);
        }
        let trades = HttpPublisher::new(
            Topic::Trades.name(),
            Publisher::<Trade>::new(&bus, ns.key(Topic::Trades)),
            &mirror,
        );
        let latency = StandaloneHttpPublisher::new(LATENCY_HTTP, &mirror, config.http_backlog);

        let init_market_trades = Arc::new(snapshot.market_trades);
        let market_trades = Publisher::with_snapshot(&bus, ns.key(Topic::MarketTrade), move || {
            init_market_trades.as_ref().clone()
        });

        // Connectivity is per exchange, shared by every pair on it.
        let connectivity = HttpPublisher::new(
            Topic::ExchangeConnectivity.name(),
            Publisher::<ConnectivityStatus>::new(&bus, ns.key(Topic::ExchangeConnectivity)),
            &mirror,
        );
        connectivity.publish(&ConnectivityStatus::Connected);

        info!(
            "[context] wired {identity} ({}) with {} subscription(s)",
            selection.environment,
            subscriptions.len()
        );

        Ok(Self {
            selection,
            namespace: ns,
            bus,
            mirror,
            messages,
            safety,
            params,
            order_broker,
            connectivity,
            market_trades,
            trades,
            trades_http,
            latency,
            stores: stores.clone(),
            subscriptions,
        })
    }

    /// The shutdown cleanup for this deployment.
    pub fn cleanup_action(&self) -> Arc<dyn CleanupAction> {
        Arc::new(CancelOpenOrders(self.order_broker.clone()))
    }

    /// Record one of our fills: publish it, keep it for HTTP and persist it.
    pub fn record_trade(&self, trade: Trade) {
        self.trades.publish(&trade);
        self.trades_http.publish(&trade);
        if let Err(e) = spawn_append(self.stores.trades.clone(), self.selection.identity, trade) {
            warn!("[context] trade not persisted: {e}");
        }
    }

    /// Record a measured latency in milliseconds.
    pub fn record_latency(&self, millis: u64) {
        self.latency.publish(&millis);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

/// Engine publisher on `topic`, mirrored over HTTP under the topic's name.
fn mirrored<T>(bus: &Bus, mirror: &HttpMirror, topic: Topic, ns: &TopicNamespace) -> Arc<dyn Publish<T>>
where
    T: serde::Serialize + 'static,
{
    Arc::new(HttpPublisher::new(
        topic.name(),
        Publisher::<T>::new(bus, ns.key(topic)),
        mirror,
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use mm_bus::BroadcastTransport;
    use mm_core::topic::Scope;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::persist::CollectionStore;
    use crate::shutdown::{ShutdownOrchestrator, ShutdownState, Trigger};

    fn selection(exchange: &str) -> Selection {
        Selection::parse(exchange, "dev", "BTC/USD").unwrap()
    }

    struct Unreachable;

    #[async_trait]
    impl CollectionStore<Trade> for Unreachable {
        async fn load(&self, _: &ExchangeIdentity, _: usize) -> Result<Vec<Trade>, MmError> {
            Err(MmError::Persist("connection refused".into()))
        }

        async fn append(&self, _: &ExchangeIdentity, _: Trade) -> Result<(), MmError> {
            Err(MmError::Persist("connection refused".into()))
        }
    }

    fn observed_bus() -> (Bus, Arc<BroadcastTransport>) {
        let transport = Arc::new(BroadcastTransport::new(64));
        (Bus::with_transport(transport.clone()), transport)
    }

    #[tokio::test]
    async fn unsupported_exchange_fails_before_loading() {
        let err = Engine::start(
            selection("coinbase"),
            &EngineConfig::default(),
            &Persistence::in_memory(),
            Bus::new(),
            HttpMirror::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, MmError::Config(msg) if msg.contains("coinbase")));
    }

    #[tokio::test]
    async fn failed_load_wires_nothing() {
        let (bus, transport) = observed_bus();
        let mut observer = transport.observe();
        let mirror = HttpMirror::new();
        let mut stores = Persistence::in_memory();
        stores.trades = Arc::new(Unreachable);

        let err = Engine::start(selection("null"), &EngineConfig::default(), &stores, bus, mirror.clone())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, MmError::Load { collection: "trades", .. }));
        assert!(matches!(observer.try_recv(), Err(TryRecvError::Empty)));
        assert!(mirror.names().is_empty());
    }

    #[tokio::test]
    async fn start_wires_and_shuts_down_cleanly() {
        let (bus, transport) = observed_bus();
        let mut observer = transport.observe();
        let ctx = Engine::start(
            selection("null"),
            &EngineConfig::default(),
            &Persistence::in_memory(),
            bus,
            HttpMirror::new(),
        )
        .await
        .unwrap();

        let quote = ctx.namespace.key(Topic::Quote);
        let position = ctx.namespace.key(Topic::Position);
        assert_eq!(quote.as_str(), "xp.null.BTC-USD.Quote");
        assert_eq!(position.as_str(), "x.null.Position");
        assert_ne!(
            ctx.namespace.key_at(Topic::Position, Scope::PerExchangePair),
            position
        );

        // Product advertisement went out on the global topic first.
        let first = observer.try_recv().unwrap();
        assert_eq!(first.topic.as_str(), "g.ProductAdvertisement");
        assert_eq!(first.value["exchange"], json!("null"));
        assert_eq!(ctx.bus.snapshot(&first.topic).unwrap().len(), 1);

        assert_eq!(ctx.messages.recent()[0].text, "start up");
        assert_eq!(ctx.safety.latest(), SafetySettings::default());
        assert!(ctx.mirror.get("SafetySettings").unwrap().is_object());
        assert_eq!(ctx.mirror.get("ExchangeConnectivity"), Some(json!("Connected")));
        assert_eq!(ctx.mirror.get(TRADES_HTTP), Some(json!([])));

        let orchestrator = ShutdownOrchestrator::new(ctx.cleanup_action(), Duration::from_millis(2000));
        orchestrator.handle().trigger(Trigger::Interrupt);
        let report = orchestrator.run().await;
        assert_eq!(report.state, ShutdownState::Succeeded);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.outcome.items_processed, 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_orders_submitted_over_the_bus() {
        let stores = Persistence::in_memory();
        let ctx = Engine::start(
            selection("null"),
            &EngineConfig::default(),
            &stores,
            Bus::new(),
            HttpMirror::new(),
        )
        .await
        .unwrap();

        let submit = ctx.namespace.key(Topic::SubmitNewOrder);
        assert_eq!(submit.as_str(), "g.SubmitNewOrder");
        let report = ctx.bus.deliver_inbound(
            &submit,
            json!({"side": "Bid", "price": 100.0, "quantity": 0.01}),
        );
        assert_eq!(report.delivered, 1);
        let reports_key = ctx.namespace.key(Topic::OrderStatusReports);
        assert_eq!(ctx.bus.snapshot(&reports_key).unwrap().len(), 1);

        let orchestrator = ShutdownOrchestrator::new(ctx.cleanup_action(), Duration::from_millis(2000));
        orchestrator.handle().trigger(Trigger::Terminate);
        let report = orchestrator.run().await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.outcome.items_processed, 1);
        assert!(ctx.order_broker.open_orders().is_empty());
        assert!(ctx.bus.snapshot(&reports_key).unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_resumes_open_orders_and_parameters() {
        let stores = Persistence::in_memory();
        let sel = selection("null");
        let resting = OrderStatusReport {
            order_id: "prev-1".into(),
            exchange: Exchange::Null,
            pair: sel.identity.pair,
            side: Side::Ask,
            price: 101.0,
            quantity: 0.2,
            status: OrderStatus::Working,
            time: 1,
            reason: None,
        };
        stores.orders.append(&sel.identity, resting.clone()).await.unwrap();
        let tuned = QuotingParameters {
            width: 0.7,
            ..QuotingParameters::default()
        };
        stores.params.persist(&tuned).await.unwrap();

        let ctx = Engine::start(sel, &EngineConfig::default(), &stores, Bus::new(), HttpMirror::new())
            .await
            .unwrap();

        assert_eq!(ctx.order_broker.open_orders(), vec![resting]);
        assert_eq!(ctx.params.latest(), tuned);
    }

    #[tokio::test]
    async fn recorded_trades_reach_http_and_storage() {
        let stores = Persistence::in_memory();
        let sel = selection("null");
        let ctx = Engine::start(sel, &EngineConfig::default(), &stores, Bus::new(), HttpMirror::new())
            .await
            .unwrap();

        ctx.record_trade(Trade {
            trade_id: "t-1".into(),
            order_id: "o-1".into(),
            exchange: Exchange::Null,
            pair: sel.identity.pair,
            side: Side::Bid,
            price: 100.0,
            quantity: 0.01,
            time: 5,
        });
        tokio::task::yield_now().await;

        let http = ctx.mirror.get(TRADES_HTTP).unwrap();
        assert_eq!(http.as_array().unwrap().len(), 1);
        assert_eq!(ctx.mirror.get("Trades").unwrap()["trade_id"], json!("t-1"));
        assert_eq!(stores.trades.load(&sel.identity, 10).await.unwrap().len(), 1);
    }
}
