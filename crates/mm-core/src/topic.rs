//! Topic namespace derivation.
//!
//! Every publisher and receiver is constructed with a [`TopicKey`] derived
//! from a logical topic name, a [`Scope`] and the deployment's
//! [`ExchangeIdentity`]. Deployments sharing one transport therefore never
//! cross-talk on scoped topics.
//!
//! # Wire format
//!
//! ```text
//! Global           g.<name>
//! PerExchange      x.<exchange>.<name>
//! PerExchangePair  xp.<exchange>.<BASE>-<QUOTE>.<name>
//! ```
//!
//! The prefix fixes how many components follow, and exchange / currency codes
//! never contain `.`, so the logical name is always the unambiguous remainder.
//! Distinct `(scope, exchange, pair, name)` tuples never encode to the same key.

use serde::{Deserialize, Serialize};

use crate::error::MmError;
use crate::types::ExchangeIdentity;

/// Namespacing level of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    PerExchange,
    PerExchangePair,
}

impl Scope {
    fn prefix(self) -> &'static str {
        match self {
            Self::Global => "g",
            Self::PerExchange => "x",
            Self::PerExchangePair => "xp",
        }
    }
}

/// Well-known logical topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    FairValue,
    Quote,
    ActiveChange,
    MarketData,
    QuotingParametersChange,
    SafetySettings,
    ProductAdvertisement,
    OrderStatusReports,
    Trades,
    Position,
    ExchangeConnectivity,
    SubmitNewOrder,
    CancelOrder,
    MarketTrade,
    Message,
    ExternalValuation,
}

impl Topic {
    /// Logical name used in the wire key.
    pub fn name(self) -> &'static str {
        match self {
            Self::FairValue => "FairValue",
            Self::Quote => "Quote",
            Self::ActiveChange => "ActiveChange",
            Self::MarketData => "MarketData",
            Self::QuotingParametersChange => "QuotingParametersChange",
            Self::SafetySettings => "SafetySettings",
            Self::ProductAdvertisement => "ProductAdvertisement",
            Self::OrderStatusReports => "OrderStatusReports",
            Self::Trades => "Trades",
            Self::Position => "Position",
            Self::ExchangeConnectivity => "ExchangeConnectivity",
            Self::SubmitNewOrder => "SubmitNewOrder",
            Self::CancelOrder => "CancelOrder",
            Self::MarketTrade => "MarketTrade",
            Self::Message => "Message",
            Self::ExternalValuation => "ExternalValuation",
        }
    }

    /// Scope the engine wires this topic with.
    pub fn default_scope(self) -> Scope {
        match self {
            Self::ProductAdvertisement | Self::SubmitNewOrder | Self::CancelOrder => Scope::Global,
            Self::Position | Self::ExchangeConnectivity => Scope::PerExchange,
            _ => Scope::PerExchangePair,
        }
    }
}

/// Encoded topic identifier, stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicKey(String);

impl TopicKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the key for `name` at `scope` within `identity`.
///
/// `identity` is ignored for [`Scope::Global`]. The only failure is an empty
/// logical name.
pub fn topic_key(name: &str, scope: Scope, identity: &ExchangeIdentity) -> Result<TopicKey, MmError> {
    if name.is_empty() {
        return Err(MmError::Topic("logical topic name must not be empty".into()));
    }
    Ok(encode(name, scope, identity))
}

fn encode(name: &str, scope: Scope, identity: &ExchangeIdentity) -> TopicKey {
    let prefix = scope.prefix();
    let key = match scope {
        Scope::Global => format!("{prefix}.{name}"),
        Scope::PerExchange => format!("{prefix}.{}.{name}", identity.exchange),
        Scope::PerExchangePair => format!(
            "{prefix}.{}.{}-{}.{name}",
            identity.exchange, identity.pair.base, identity.pair.quote
        ),
    };
    TopicKey(key)
}

/// Topic key factory bound to one deployment identity.
#[derive(Debug, Clone, Copy)]
pub struct TopicNamespace {
    identity: ExchangeIdentity,
}

impl TopicNamespace {
    pub fn new(identity: ExchangeIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> ExchangeIdentity {
        self.identity
    }

    /// Key for a well-known topic at its default scope.
    pub fn key(&self, topic: Topic) -> TopicKey {
        self.key_at(topic, topic.default_scope())
    }

    /// Key for a well-known topic at an explicit scope.
    pub fn key_at(&self, topic: Topic, scope: Scope) -> TopicKey {
        encode(topic.name(), scope, &self.identity)
    }

    /// Key for an arbitrary logical name.
    pub fn custom(&self, name: &str, scope: Scope) -> Result<TopicKey, MmError> {
        topic_key(name, scope, &self.identity)
    }
}
