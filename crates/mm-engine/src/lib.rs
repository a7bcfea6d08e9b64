//! # mm-engine
//!
//! Startup and shutdown orchestration for one engine deployment.
//!
//! ## Lifecycle
//!
//! ```text
//! Selection ──► gateway check ──► bootstrap barrier (5 concurrent loads)
//!           ──► AppContext::wire (publishers, repositories, order broker)
//!           ──► ShutdownOrchestrator::run (armed until the first trigger)
//! ```
//!
//! - [`persist`]: load/persist contracts and the in-memory store
//! - [`bootstrap`]: the concurrent-load barrier producing a [`Snapshot`]
//! - [`repository`]: latest-value parameter repositories
//! - [`gateway`]: order broker contract, gateway registry, null gateway
//! - [`messages`]: operator message publisher
//! - [`shutdown`]: single-fire shutdown with a bounded cleanup deadline
//! - [`context`]: the application context and [`Engine::start`]

pub mod bootstrap;
pub mod context;
pub mod gateway;
pub mod messages;
pub mod persist;
pub mod repository;
pub mod shutdown;

pub use bootstrap::{Snapshot, load_snapshot};
pub use context::{AppContext, Engine};
pub use gateway::{NullOrderBroker, OrderBroker};
pub use messages::Messages;
pub use persist::Persistence;
pub use repository::Repository;
pub use shutdown::{
    CleanupAction, CleanupOutcome, ShutdownHandle, ShutdownOrchestrator, ShutdownReport, ShutdownState, Trigger,
};
