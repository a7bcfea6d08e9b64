//! Record models persisted between runs and exchanged over the bus.
//!
//! Everything here is plain serde data. The bus carries these as JSON so the
//! same shape reaches in-process subscribers, remote observers and the HTTP
//! mirror.

use serde::{Deserialize, Serialize};

use super::enums::{Environment, Exchange, FairValueModel, OrderStatus, QuotingMode, Side};
use super::identity::{CurrencyPair, ExchangeIdentity};

// ---------------------------------------------------------------------------
// Orders and trades
// ---------------------------------------------------------------------------

/// Latest known state of one engine-managed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Engine-assigned order ID.
    pub order_id: String,
    pub exchange: Exchange,
    pub pair: CurrencyPair,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    /// Timestamp of this report (ms since epoch).
    pub time: u64,
    /// Free-text reason attached to cancels and rejects.
    #[serde(default)]
    pub reason: Option<String>,
}

/// One of our own fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub exchange: Exchange,
    pub pair: CurrencyPair,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub time: u64,
}

/// A trade observed on the public market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub price: f64,
    pub size: f64,
    pub time: u64,
    pub make_side: Side,
}

/// Any payload stamped with the exchange and pair it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePairMessage<T> {
    pub exchange: Exchange,
    pub pair: CurrencyPair,
    pub data: T,
}

impl<T> ExchangePairMessage<T> {
    pub fn new(identity: ExchangeIdentity, data: T) -> Self {
        Self {
            exchange: identity.exchange,
            pair: identity.pair,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter records
// ---------------------------------------------------------------------------

/// Trade-rate safety limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    pub trades_per_minute: f64,
    pub cool_off_minutes: f64,
    pub trade_rate_seconds: f64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            trades_per_minute: 4.0,
            cool_off_minutes: 5.0,
            trade_rate_seconds: 4.0,
        }
    }
}

/// Parameters handed to the quoting algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotingParameters {
    pub width: f64,
    pub size: f64,
    pub mode: QuotingMode,
    pub fv_model: FairValueModel,
}

impl Default for QuotingParameters {
    fn default() -> Self {
        Self {
            width: 0.3,
            size: 0.05,
            mode: QuotingMode::Top,
            fv_model: FairValueModel::Bbo,
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery and operator messages
// ---------------------------------------------------------------------------

/// What this deployment trades, advertised on a global topic so observers can
/// find the scoped topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAdvertisement {
    pub exchange: Exchange,
    pub pair: CurrencyPair,
    pub environment: Environment,
}

/// Free-text operator message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub time: u64,
}

/// Inbound request to place an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

/// Inbound request to cancel an order by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: String,
}
