//! Enumerations used throughout the engine.
//!
//! The string forms accepted by `FromStr` are the ones read from the
//! environment at startup; anything else is an [`MmError::Config`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MmError;

// ---------------------------------------------------------------------------
// Exchange identifiers
// ---------------------------------------------------------------------------

/// Exchanges the engine can be deployed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    HitBtc,
    OkCoin,
    Coinbase,
    Null,
}

impl Exchange {
    pub const ALL: [Exchange; 4] = [Self::HitBtc, Self::OkCoin, Self::Coinbase, Self::Null];
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HitBtc => write!(f, "hitbtc"),
            Self::OkCoin => write!(f, "okcoin"),
            Self::Coinbase => write!(f, "coinbase"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl FromStr for Exchange {
    type Err = MmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hitbtc" => Ok(Self::HitBtc),
            "okcoin" => Ok(Self::OkCoin),
            "coinbase" => Ok(Self::Coinbase),
            "null" => Ok(Self::Null),
            other => Err(MmError::Config(format!(
                "unknown configuration env variable EXCHANGE {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Currencies
// ---------------------------------------------------------------------------

/// Currencies that can appear on either side of a traded pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Ltc,
    Eth,
    Usd,
    Eur,
    Gbp,
    Cny,
}

impl Currency {
    pub const ALL: [Currency; 7] = [
        Self::Btc,
        Self::Ltc,
        Self::Eth,
        Self::Usd,
        Self::Eur,
        Self::Gbp,
        Self::Cny,
    ];
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::Btc => "BTC",
            Self::Ltc => "LTC",
            Self::Eth => "ETH",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Cny => "CNY",
        };
        f.write_str(code)
    }
}

impl FromStr for Currency {
    type Err = MmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MmError::Config(format!("unknown currency {s:?}")))
    }
}

// ---------------------------------------------------------------------------
// Deployment environment
// ---------------------------------------------------------------------------

/// Deployment environment tag, advertised alongside the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = MmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(MmError::Config(format!("unknown environment {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Order / quoting enums
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// Order status as reported by the order broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Working,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Whether an order in this state still rests on the exchange.
    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::Working)
    }
}

/// How the quoting algorithm positions itself against the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotingMode {
    Top,
    Mid,
    Join,
}

/// Fair value model used by the quoting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FairValueModel {
    Bbo,
    WeightedBbo,
}

/// Gateway connectivity as published on the exchange-scoped topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}
