//! # mm-core
//!
//! Core crate for the market-making engine, providing:
//!
//! - **Types** (`types`): exchange identity, currencies, persisted record models
//! - **Topics** (`topic`): namespaced topic key derivation
//! - **Configuration** (`config`): environment selection and JSON engine config
//! - **Error types** (`error`): domain-specific `MmError` via thiserror
//! - **Time utilities** (`time_util`): millisecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod topic;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
