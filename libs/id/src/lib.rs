//! # armada-id
//!
//! Stable ID types, parsing, and validation for the armada orchestrator.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Format
//!
//! Record IDs use a prefixed ULID format: `{prefix}_{ulid}`, e.g.
//! `vm_01HV4Z2WQXKJNM8GPQY6VBKC3D`. The prefix gives type safety, the
//! ULID gives time-ordering and uniqueness.
//!
//! The one exception is [`AgentId`]: agents are addressed on the wire by a
//! bare UUIDv4. The in-VM agent treats its identity as an opaque globally
//! unique token rather than a sortable record key.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::parse_prefixed;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
