//! Typed error definitions for the market-making engine.
//!
//! [`MmError`] carries the startup/shutdown error taxonomy. Configuration and
//! load errors abort startup, delivery errors stay at the subscriber boundary,
//! cleanup errors drive the process exit code. All variants implement
//! `std::error::Error` via `thiserror`, so they integrate with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the market-making engine.
#[derive(Debug, Error)]
pub enum MmError {
    /// Unrecognised exchange, environment or currency. Fatal before wiring.
    #[error("config error: {0}")]
    Config(String),

    /// A persisted-state load failed during bootstrap.
    #[error("load error ({collection}): {reason}")]
    Load {
        collection: &'static str,
        reason: String,
    },

    /// A subscriber handler failed while a value was being dispatched.
    #[error("delivery error on {topic}: {reason}")]
    Delivery { topic: String, reason: String },

    /// The shutdown cleanup action failed.
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Invalid logical topic (empty name).
    #[error("topic error: {0}")]
    Topic(String),

    /// Persistence read or write error.
    #[error("persistence error: {0}")]
    Persist(String),
}
