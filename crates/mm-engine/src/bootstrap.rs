//! Bootstrap barrier.
//!
//! All five persisted collections are loaded concurrently and the engine is
//! only wired once every load has resolved. The loads are polled together by
//! `tokio::try_join!` on the caller's task: each one starts on the first poll,
//! none waits on another, and the first failure resolves the whole barrier
//! with that error. A partially loaded [`Snapshot`] is never constructed.

use std::future::Future;
use std::time::Instant;

use mm_core::config::LoadLimits;
use mm_core::error::MmError;
use mm_core::types::*;
use tracing::{error, info};

use crate::persist::Persistence;

/// Everything loaded at startup. Each field is handed to the component that
/// owns it during wiring.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub orders: Vec<OrderStatusReport>,
    pub trades: Vec<Trade>,
    pub market_trades: Vec<ExchangePairMessage<MarketTrade>>,
    pub safety: SafetySettings,
    pub params: QuotingParameters,
}

/// Run the five startup loads concurrently and resolve once all succeed.
pub async fn load_snapshot(
    stores: &Persistence,
    identity: &ExchangeIdentity,
    limits: &LoadLimits,
) -> Result<Snapshot, MmError> {
    let started = Instant::now();
    info!("[bootstrap] loading persisted state for {identity}");

    let result = tokio::try_join!(
        labelled("orders", stores.orders.load(identity, limits.orders)),
        labelled("trades", stores.trades.load(identity, limits.trades)),
        labelled("market_trades", stores.market_trades.load(identity, limits.market_trades)),
        labelled("safety_settings", stores.safety.load_latest()),
        labelled("quoting_parameters", stores.params.load_latest()),
    );

    let (orders, trades, market_trades, safety, params) = match result {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("[bootstrap] aborted after {:?}: {e}", started.elapsed());
            return Err(e);
        }
    };

    info!(
        "[bootstrap] loaded {} order(s), {} trade(s), {} market trade(s) in {:?}",
        orders.len(),
        trades.len(),
        market_trades.len(),
        started.elapsed(),
    );

    Ok(Snapshot {
        orders,
        trades,
        market_trades,
        safety,
        params,
    })
}

/// Tag a load's error with the collection it came from.
async fn labelled<T>(
    collection: &'static str,
    load: impl Future<Output = Result<T, MmError>>,
) -> Result<T, MmError> {
    load.await.map_err(|e| match e {
        MmError::Load { .. } => e,
        other => MmError::Load {
            collection,
            reason: other.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    use super::*;
    use crate::persist::{CollectionStore, RecordStore};

    type Reply<T> = oneshot::Sender<Result<T, MmError>>;

    /// A load that records when it starts and resolves when the test says so.
    struct Gated<R> {
        started: Arc<AtomicUsize>,
        reply: Mutex<Option<oneshot::Receiver<Result<R, MmError>>>>,
    }

    impl<R: Send + 'static> Gated<R> {
        fn new(started: &Arc<AtomicUsize>) -> (Arc<Self>, Reply<R>) {
            let (tx, rx) = oneshot::channel();
            let gated = Arc::new(Self {
                started: started.clone(),
                reply: Mutex::new(Some(rx)),
            });
            (gated, tx)
        }

        async fn wait(&self) -> Result<R, MmError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let rx = self.reply.lock().unwrap().take().expect("loaded twice");
            rx.await.unwrap_or_else(|_| Err(MmError::Persist("dropped".into())))
        }
    }

    #[async_trait]
    impl<T: Send + Sync + 'static> CollectionStore<T> for Gated<Vec<T>> {
        async fn load(&self, _: &ExchangeIdentity, _: usize) -> Result<Vec<T>, MmError> {
            self.wait().await
        }

        async fn append(&self, _: &ExchangeIdentity, _: T) -> Result<(), MmError> {
            Ok(())
        }
    }

    #[async_trait]
    impl<T: Send + Sync + 'static> RecordStore<T> for Gated<T> {
        async fn load_latest(&self) -> Result<T, MmError> {
            self.wait().await
        }

        async fn persist(&self, _: &T) -> Result<(), MmError> {
            Ok(())
        }
    }

    struct Replies {
        orders: Reply<Vec<OrderStatusReport>>,
        trades: Reply<Vec<Trade>>,
        market_trades: Reply<Vec<ExchangePairMessage<MarketTrade>>>,
        safety: Reply<SafetySettings>,
        params: Reply<QuotingParameters>,
    }

    fn gated_stores() -> (Persistence, Replies, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicUsize::new(0));
        let (orders, orders_tx) = Gated::<Vec<OrderStatusReport>>::new(&started);
        let (trades, trades_tx) = Gated::<Vec<Trade>>::new(&started);
        let (market_trades, market_tx) =
            Gated::<Vec<ExchangePairMessage<MarketTrade>>>::new(&started);
        let (safety, safety_tx) = Gated::<SafetySettings>::new(&started);
        let (params, params_tx) = Gated::<QuotingParameters>::new(&started);
        let stores = Persistence {
            orders,
            trades,
            market_trades,
            safety,
            params,
        };
        let replies = Replies {
            orders: orders_tx,
            trades: trades_tx,
            market_trades: market_tx,
            safety: safety_tx,
            params: params_tx,
        };
        (stores, replies, started)
    }

    fn identity() -> ExchangeIdentity {
        ExchangeIdentity::new(Exchange::Null, CurrencyPair::new(Currency::Btc, Currency::Usd))
    }

    #[test]
    fn resolves_only_after_all_five_loads() {
        let (stores, replies, started) = gated_stores();
        let id = identity();
        let limits = LoadLimits::default();
        let mut barrier = task::spawn(load_snapshot(&stores, &id, &limits));

        assert_pending!(barrier.poll());
        assert_eq!(started.load(Ordering::SeqCst), 5, "every load starts before any resolves");

        replies.params.send(Ok(QuotingParameters::default())).unwrap();
        replies.orders.send(Ok(Vec::new())).unwrap();
        replies.safety.send(Ok(SafetySettings::default())).unwrap();
        replies.market_trades.send(Ok(Vec::new())).unwrap();
        assert_pending!(barrier.poll());

        replies.trades.send(Ok(Vec::new())).unwrap();
        let snapshot = assert_ready_ok!(barrier.poll());
        assert_eq!(snapshot.safety, SafetySettings::default());
        assert_eq!(snapshot.params, QuotingParameters::default());
    }

    #[test]
    fn any_failure_fails_the_barrier() {
        let (stores, replies, _started) = gated_stores();
        let id = identity();
        let limits = LoadLimits::default();
        let mut barrier = task::spawn(load_snapshot(&stores, &id, &limits));

        assert_pending!(barrier.poll());
        replies.orders.send(Ok(Vec::new())).unwrap();
        replies
            .trades
            .send(Err(MmError::Persist("disk on fire".into())))
            .unwrap();

        let err = assert_ready_err!(barrier.poll());
        match err {
            MmError::Load { collection, reason } => {
                assert_eq!(collection, "trades");
                assert!(reason.contains("disk on fire"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn results_land_in_their_slots() {
        let stores = Persistence::in_memory();
        let id = identity();
        let order = OrderStatusReport {
            order_id: "o-1".into(),
            exchange: Exchange::Null,
            pair: id.pair,
            side: Side::Bid,
            price: 100.0,
            quantity: 1.0,
            status: OrderStatus::Working,
            time: 1,
            reason: None,
        };
        stores.orders.append(&id, order.clone()).await.unwrap();
        let params = QuotingParameters {
            width: 1.5,
            ..QuotingParameters::default()
        };
        stores.params.persist(&params).await.unwrap();

        let snapshot = load_snapshot(&stores, &id, &LoadLimits::default()).await.unwrap();
        assert_eq!(snapshot.orders, vec![order]);
        assert!(snapshot.trades.is_empty());
        assert_eq!(snapshot.params, params);
        assert_eq!(snapshot.safety, SafetySettings::default());
    }
}
