//! Core data types: exchange identity, enums, and the persisted record models
//! loaded at startup and exchanged over the bus.

pub mod enums;
pub mod identity;
pub mod models;

pub use enums::*;
pub use identity::*;
pub use models::*;
