//! Agent RPC: client, method table, and the encryption envelope.

mod client;
mod envelope;
mod methods;

pub use client::{AgentClient, AgentError, DEFAULT_REQUEST_TIMEOUT, PROTOCOL_VERSION, READY_DEADLINE};
pub use envelope::{CredentialEnvelope, CryptoError};
pub use methods::AgentMethod;

use std::sync::Arc;

use armada_bus::{Bus, RpcClient};

use crate::blobstore::Blobstore;
use crate::config::CancelSignal;
use crate::models::VmRecord;

/// Builds per-VM agent clients over the shared bus.
#[derive(Clone)]
pub struct AgentFactory {
    bus: Arc<dyn Bus>,
    blobstore: Arc<dyn Blobstore>,
    director_uuid: String,
    cancelled: CancelSignal,
}

impl AgentFactory {
    /// Create a factory scoped to this director's reply subjects.
    pub fn new(
        bus: Arc<dyn Bus>,
        blobstore: Arc<dyn Blobstore>,
        director_uuid: String,
        cancelled: CancelSignal,
    ) -> Self {
        Self {
            bus,
            blobstore,
            director_uuid,
            cancelled,
        }
    }

    /// Client for a VM's agent, encrypted when the record carries
    /// credentials.
    pub fn client_for(&self, vm: &VmRecord) -> Result<AgentClient, CryptoError> {
        let rpc = RpcClient::new(Arc::clone(&self.bus), "director", &self.director_uuid);
        AgentClient::new(
            rpc,
            Arc::clone(&self.blobstore),
            vm.agent_id,
            vm.credentials.as_ref(),
            self.cancelled.clone(),
        )
    }
}
