//! Cloud Provider Interface: the pluggable IaaS seam.
//!
//! The core consumes exactly two operations. Everything else a provider
//! can do (metadata tagging, disk lifecycle, networking) belongs to
//! other subsystems.

use armada_id::AgentId;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from the cloud provider.
#[derive(Debug, Error)]
pub enum CpiError {
    /// The provider failed to create the VM. `ok_to_retry` marks
    /// transient failures the factory may retry.
    #[error("VM creation failed: {message}")]
    VmCreationFailed { message: String, ok_to_retry: bool },

    /// Any other provider failure.
    #[error("cloud provider error: {0}")]
    Provider(String),
}

/// Pluggable IaaS adapter.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a VM and return its cloud-assigned cid.
    ///
    /// `disk_cids` carries only the persistent disk the VM must be able
    /// to see at boot (zero or one entries); remaining disks are
    /// attached after creation.
    async fn create_vm(
        &self,
        agent_id: AgentId,
        stemcell_cid: &str,
        cloud_properties: &Value,
        network_settings: &Value,
        disk_cids: &[String],
        env: &Value,
    ) -> Result<String, CpiError>;

    /// Delete a VM by cid.
    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CpiError>;
}
