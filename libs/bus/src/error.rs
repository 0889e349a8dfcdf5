//! Error types for bus operations.

use thiserror::Error;

/// Errors that can occur at the bus transport layer.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus connection is closed or the subscription is gone.
    #[error("bus connection closed")]
    Closed,

    /// A payload could not be encoded for the wire.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// Transport-level failure (connect, publish, subscribe).
    #[error("bus transport error: {0}")]
    Transport(String),
}
