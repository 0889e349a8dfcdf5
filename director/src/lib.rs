//! # armada-director
//!
//! VM provisioning core of the armada orchestrator.
//!
//! Two tightly coupled responsibilities live here:
//!
//! - **Parallel VM creation** for a batch of instance plans: compute
//!   resources are allocated through a pluggable cloud provider
//!   ([`cpi::CloudProvider`]), persisted as [`models::VmRecord`]s, and
//!   bound to deployment instances, with bounded concurrency
//!   ([`pool::WorkerPool`]) and per-VM compensation on failure
//!   ([`vm::VmCreator`]).
//! - **Agent RPC** over the message bus: [`agent::AgentClient`] talks to
//!   the bootstrap agent inside each VM, hiding task polling, per-method
//!   retries, timeouts, cancellation, and optional payload encryption
//!   behind blocking-style calls.
//!
//! Collaborators the core consumes but does not own (IP allocation,
//! disk attachment, blobstore transport, the bus itself) enter through
//! narrow traits so deployments and tests can swap them freely.

pub mod agent;
pub mod blobstore;
pub mod config;
pub mod cpi;
pub mod instance;
pub mod models;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod store;
pub mod vm;
