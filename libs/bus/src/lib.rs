//! # armada-bus
//!
//! Message bus abstraction and correlated request/reply transport.
//!
//! The orchestrator talks to in-VM agents over a subject-based pub/sub
//! bus. This crate provides:
//!
//! - [`Bus`]: the minimal publish/subscribe seam. Payloads are opaque
//!   byte strings; the bus never interprets them.
//! - [`InMemoryBus`]: an in-process bus used by tests and loopback
//!   deployments. Production deployments plug an external transport in
//!   behind the same trait.
//! - [`RpcClient`]: correlated request/reply on top of [`Bus`]. Each
//!   request gets a fresh [`RequestId`] and a dedicated reply subject;
//!   the reply is delivered through a oneshot completion, and in-flight
//!   requests can be cancelled.

mod bus;
mod error;
mod rpc;

pub use bus::{Bus, InMemoryBus, Subscription, SubscriptionId};
pub use error::BusError;
pub use rpc::RpcClient;

pub use armada_id::RequestId;
