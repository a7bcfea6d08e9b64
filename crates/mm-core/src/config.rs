//! Configuration for one engine deployment.
//!
//! Two sources feed startup:
//!
//! - The **selection** (exchange, deployment environment, pair) comes from
//!   the environment / CLI as plain strings. Unrecognised values are
//!   [`MmError::Config`] and abort before any wiring.
//! - The optional **engine config** JSON file tunes load limits, the cleanup
//!   deadline and the HTTP mirror. Every field has a default.
//!
//! # Example engine config
//!
//! ```json
//! {
//!   "limits": { "orders": 25000, "trades": 10000, "market_trades": 100 },
//!   "cleanup_deadline_ms": 2000,
//!   "http_bind": "0.0.0.0:3000"
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::MmError;
use crate::types::{CurrencyPair, Environment, Exchange, ExchangeIdentity};

/// Validated runtime selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub identity: ExchangeIdentity,
    pub environment: Environment,
}

impl Selection {
    /// Parse the raw environment strings.
    pub fn parse(exchange: &str, mode: &str, pair: &str) -> Result<Self, MmError> {
        let exchange: Exchange = exchange.parse()?;
        let environment: Environment = mode.parse()?;
        let pair: CurrencyPair = pair.parse()?;
        Ok(Self {
            identity: ExchangeIdentity::new(exchange, pair),
            environment,
        })
    }
}

/// Row limits for the startup loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoadLimits {
    pub orders: usize,
    pub trades: usize,
    pub market_trades: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            orders: 25_000,
            trades: 10_000,
            market_trades: 100,
        }
    }
}

/// Engine tuning, deserialized from an optional JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LoadLimits,

    /// How long shutdown waits for open orders to be cancelled.
    pub cleanup_deadline_ms: u64,

    /// Bind address of the HTTP mirror.
    pub http_bind: String,

    /// Capacity of the in-process transport broadcast channel.
    pub transport_capacity: usize,

    /// How many values HTTP-only topics keep.
    pub http_backlog: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: LoadLimits::default(),
            cleanup_deadline_ms: 2_000,
            http_bind: "0.0.0.0:3000".to_string(),
            transport_capacity: 1_024,
            http_backlog: 100,
        }
    }
}

impl EngineConfig {
    pub fn cleanup_deadline(&self) -> Duration {
        Duration::from_millis(self.cleanup_deadline_ms)
    }
}

/// Load and parse a JSON engine config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    Ok(config)
}
