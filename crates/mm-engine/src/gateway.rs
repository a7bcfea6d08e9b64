//! Order gateways.
//!
//! The exchange selection maps to one [`OrderBroker`]. Only the null gateway
//! ships here: it keeps orders in memory, never fills, and answers every
//! command immediately, which is enough to exercise the full startup and
//! shutdown path against a real persistence layer.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use mm_bus::{Publish, Receiver, Subscription};
use mm_core::error::MmError;
use mm_core::time_util::now_ms;
use mm_core::types::*;
use tracing::{info, warn};

use crate::persist::{CollectionStore, spawn_append};

/// Order management for one deployment.
///
/// Commands arrive synchronously from bus handlers; only the shutdown cleanup
/// is async, because it must wait for every cancel to be persisted.
#[async_trait]
pub trait OrderBroker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Place a new order. Returns the report that was published.
    fn submit(&self, order: SubmitOrder) -> Result<OrderStatusReport>;

    /// Cancel one open order by ID.
    fn cancel(&self, order_id: &str) -> Result<OrderStatusReport>;

    /// Orders still resting, ordered by ID.
    fn open_orders(&self) -> Vec<OrderStatusReport>;

    /// Cancel everything still open. Returns the number of orders cancelled.
    async fn cancel_open_orders(&self) -> Result<usize, MmError>;
}

/// Route the SubmitNewOrder / CancelOrder command topics to `broker`.
pub fn attach_commands(
    broker: &Arc<dyn OrderBroker>,
    submits: &Receiver<SubmitOrder>,
    cancels: &Receiver<CancelOrder>,
) -> Vec<Subscription> {
    let on_submit = broker.clone();
    let on_cancel = broker.clone();
    vec![
        submits.on(move |order| on_submit.submit(order).map(drop)),
        cancels.on(move |cmd| on_cancel.cancel(&cmd.order_id).map(drop)),
    ]
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Fail fast, before any load or wiring, when no gateway exists for `exchange`.
pub fn ensure_supported(exchange: Exchange) -> Result<(), MmError> {
    match exchange {
        Exchange::Null => Ok(()),
        other => Err(MmError::Config(format!("no gateway provided for exchange {other}"))),
    }
}

/// Create the order broker for `identity`, seeded with the orders loaded at
/// startup.
pub fn create_order_broker(
    identity: ExchangeIdentity,
    init_orders: &[OrderStatusReport],
    publisher: Arc<dyn Publish<OrderStatusReport>>,
    store: Arc<dyn CollectionStore<OrderStatusReport>>,
) -> Result<Arc<dyn OrderBroker>, MmError> {
    ensure_supported(identity.exchange)?;
    let broker = NullOrderBroker::new(identity, init_orders, publisher, store);
    info!(
        "[gateway] {} broker ready for {identity} with {} open order(s)",
        broker.name(),
        broker.open_orders().len()
    );
    Ok(Arc::new(broker))
}

// ---------------------------------------------------------------------------
// Null gateway
// ---------------------------------------------------------------------------

/// In-memory broker for the `null` exchange.
pub struct NullOrderBroker {
    identity: ExchangeIdentity,
    open: Mutex<AHashMap<String, OrderStatusReport>>,
    next_id: AtomicU64,
    publisher: Arc<dyn Publish<OrderStatusReport>>,
    store: Arc<dyn CollectionStore<OrderStatusReport>>,
}

impl NullOrderBroker {
    pub fn new(
        identity: ExchangeIdentity,
        init_orders: &[OrderStatusReport],
        publisher: Arc<dyn Publish<OrderStatusReport>>,
        store: Arc<dyn CollectionStore<OrderStatusReport>>,
    ) -> Self {
        // Reports are oldest first; the last one per ID wins.
        let mut latest: AHashMap<String, OrderStatusReport> = AHashMap::new();
        for report in init_orders {
            if report.exchange == identity.exchange && report.pair == identity.pair {
                latest.insert(report.order_id.clone(), report.clone());
            }
        }
        // Continue numbering after every ID seen so far, closed ones included.
        let next_id = init_orders
            .iter()
            .filter_map(|r| null_sequence(&r.order_id))
            .max()
            .map_or(1, |n| n + 1);
        latest.retain(|_, r| r.status.is_open());

        Self {
            identity,
            open: Mutex::new(latest),
            next_id: AtomicU64::new(next_id),
            publisher,
            store,
        }
    }

    fn emit(&self, report: &OrderStatusReport) {
        self.publisher.publish(report);
        if let Err(e) = spawn_append(self.store.clone(), self.identity, report.clone()) {
            warn!("[gateway] order {} not persisted: {e}", report.order_id);
        }
    }

    fn report(&self, order_id: String, order: &SubmitOrder, status: OrderStatus) -> OrderStatusReport {
        OrderStatusReport {
            order_id,
            exchange: self.identity.exchange,
            pair: self.identity.pair,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            status,
            time: now_ms(),
            reason: None,
        }
    }
}

#[async_trait]
impl OrderBroker for NullOrderBroker {
    fn name(&self) -> &'static str {
        "null"
    }

    fn submit(&self, order: SubmitOrder) -> Result<OrderStatusReport> {
        let order_id = format!("null-{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        if !(order.price > 0.0 && order.quantity > 0.0) {
            let mut rejected = self.report(order_id, &order, OrderStatus::Rejected);
            rejected.reason = Some("price and quantity must be positive".into());
            warn!("[gateway] rejected {}: {:?}", rejected.order_id, rejected.reason);
            self.emit(&rejected);
            return Ok(rejected);
        }

        let working = self.report(order_id, &order, OrderStatus::Working);
        match self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(working.order_id.clone())
        {
            Entry::Occupied(_) => return Err(anyhow!("order id {} is already open", working.order_id)),
            Entry::Vacant(slot) => {
                slot.insert(working.clone());
            }
        }
        self.emit(&working);
        Ok(working)
    }

    fn cancel(&self, order_id: &str) -> Result<OrderStatusReport> {
        let removed = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(order_id);
        let Some(mut report) = removed else {
            return Err(anyhow!("cannot cancel unknown order {order_id}"));
        };
        report.status = OrderStatus::Cancelled;
        report.time = now_ms();
        self.emit(&report);
        Ok(report)
    }

    fn open_orders(&self) -> Vec<OrderStatusReport> {
        let mut orders: Vec<_> = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    async fn cancel_open_orders(&self) -> Result<usize, MmError> {
        // An order leaves the open set only once its cancel is persisted.
        let pending = self.open_orders();
        let total = pending.len();
        info!("[gateway] cancelling {total} open order(s)");

        let mut cancelled = 0;
        for mut report in pending {
            report.status = OrderStatus::Cancelled;
            report.time = now_ms();
            report.reason = Some("shutdown".into());
            if let Err(e) = self.store.append(&self.identity, report.clone()).await {
                return Err(MmError::Cleanup(format!(
                    "order {}: {e} ({cancelled} of {total} cancelled)",
                    report.order_id
                )));
            }
            self.open
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&report.order_id);
            self.publisher.publish(&report);
            cancelled += 1;
        }
        Ok(cancelled)
    }
}

/// The sequence number of an ID this broker issued (`null-N`).
fn null_sequence(order_id: &str) -> Option<u64> {
    order_id.strip_prefix("null-")?.parse().ok()
}
