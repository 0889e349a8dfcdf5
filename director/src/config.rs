//! Configuration for the provisioning core.

use anyhow::Result;
use tokio::sync::watch;

/// Observer for cooperative job cancellation.
///
/// The current deployment job flips the sender side to `true`; workers
/// and agent calls read it between suspension points. Never written by
/// this crate.
pub type CancelSignal = watch::Receiver<bool>;

/// Create a cancellation pair with cancellation not yet requested.
pub fn cancel_channel() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// Process-wide director configuration, immutable after init.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Stable identity of this director; scopes bus reply subjects.
    pub director_uuid: String,

    /// Worker pool size for batch VM creation.
    pub max_threads: usize,

    /// Total CPI attempts per VM on retryable creation failures.
    pub max_vm_create_tries: u32,

    /// Whether agent channels are encrypted (generates per-VM credentials).
    pub encryption: bool,

    /// PEM bundle pushed to each new agent via `update_settings`.
    pub trusted_certs: String,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            director_uuid: uuid::Uuid::new_v4().to_string(),
            max_threads: 32,
            max_vm_create_tries: 5,
            encryption: false,
            trusted_certs: String::new(),
        }
    }
}

impl DirectorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let director_uuid =
            std::env::var("ARMADA_DIRECTOR_UUID").unwrap_or(defaults.director_uuid);

        let max_threads = match std::env::var("ARMADA_MAX_THREADS") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.max_threads,
        };

        let max_vm_create_tries = match std::env::var("ARMADA_MAX_VM_CREATE_TRIES") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.max_vm_create_tries,
        };

        let encryption = std::env::var("ARMADA_ENCRYPTION")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let trusted_certs = match std::env::var("ARMADA_TRUSTED_CERTS_FILE") {
            Ok(path) => std::fs::read_to_string(path)?,
            Err(_) => defaults.trusted_certs,
        };

        Ok(Self {
            director_uuid,
            max_threads,
            max_vm_create_tries,
            encryption,
            trusted_certs,
        })
    }
}
