//! # mm-bus
//!
//! Topic-scoped publish/subscribe for the engine.
//!
//! ## Architecture
//!
//! ```text
//! Publisher<T> ──► Bus::publish ──► local subscribers (in publish order)
//!                              └──► Transport::emit ──► remote observers
//! remote command ──► Bus::deliver_inbound ──► Receiver<T> handlers
//! ```
//!
//! - [`bus`]: untyped per-topic fan-out over `serde_json::Value`
//! - [`publisher`]: typed [`Publisher`], [`Receiver`] and the [`Publish`] seam
//! - [`transport`]: transport mediator seam and an in-process broadcast transport
//! - [`mirror`]: HTTP mirror registry and the publishers that feed it

pub mod bus;
pub mod mirror;
pub mod publisher;
pub mod transport;

pub use bus::{Bus, DeliveryReport, Handler, Subscription};
pub use mirror::{HttpMirror, HttpPublisher, StandaloneHttpPublisher};
pub use publisher::{Publish, Publisher, Receiver, subscribe_as};
pub use transport::{BroadcastTransport, Envelope, Transport, pump_inbound};
