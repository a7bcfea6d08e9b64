//! Runtime identity of one engine deployment: the exchange it trades on and
//! the instrument pair. Selected once at startup and immutable afterwards.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::enums::{Currency, Exchange};
use crate::error::MmError;

/// A traded instrument pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl CurrencyPair {
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }
}

impl std::fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Parses `"BTC/USD"` (also accepts `-` or `_` as separator).
impl FromStr for CurrencyPair {
    type Err = MmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once(['/', '-', '_'])
            .ok_or_else(|| MmError::Config(format!("invalid currency pair {s:?}")))?;
        Ok(Self::new(base.parse()?, quote.parse()?))
    }
}

/// Exchange plus pair: the namespace every scoped topic is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeIdentity {
    pub exchange: Exchange,
    pub pair: CurrencyPair,
}

impl ExchangeIdentity {
    pub fn new(exchange: Exchange, pair: CurrencyPair) -> Self {
        Self { exchange, pair }
    }
}

impl std::fmt::Display for ExchangeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pair() {
        let pair: CurrencyPair = "btc/usd".parse().unwrap();
        assert_eq!(pair, CurrencyPair::new(Currency::Btc, Currency::Usd));
        assert_eq!(pair.to_string(), "BTC/USD");
    }

    #[test]
    fn parse_pair_rejects_missing_separator() {
        assert!("BTCUSD".parse::<CurrencyPair>().is_err());
    }
}
