//! Collaborator hooks the VM creator drives but does not own.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::instance::Instance;
use crate::models::VmRecord;
use crate::plan::IpReservation;

/// IP allocation subsystem; only the release side is consumed here.
#[async_trait]
pub trait IpProvider: Send + Sync {
    /// Return a reservation to the pool. Called exactly once per
    /// obsolete reservation, after the replacement VM exists.
    async fn release(&self, reservation: &IpReservation) -> Result<()>;
}

/// Disk subsystem; the creator attaches an instance's disks after its
/// VM is up.
#[async_trait]
pub trait DiskManager: Send + Sync {
    async fn attach_disks_for(&self, instance: &Instance) -> Result<()>;
}

/// Pushes IaaS-level metadata (tags) onto a VM.
#[async_trait]
pub trait MetadataUpdater: Send + Sync {
    async fn update_vm_metadata(
        &self,
        vm: &VmRecord,
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Metadata updater for providers without tagging support.
#[derive(Default)]
pub struct NoopMetadataUpdater;

#[async_trait]
impl MetadataUpdater for NoopMetadataUpdater {
    async fn update_vm_metadata(
        &self,
        vm: &VmRecord,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        debug!(vm_cid = %vm.cid, tag_count = tags.len(), "Skipping VM metadata update");
        Ok(())
    }
}
