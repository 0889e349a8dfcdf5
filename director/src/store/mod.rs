//! Persistence seam for VM and instance records.
//!
//! The core only needs row-level operations on two tables; everything
//! else about the schema belongs to the wider system. [`PgStore`] is the
//! production implementation, [`InMemoryStore`] backs tests and
//! dry-runs.

mod memory;
mod postgres;

pub use memory::{InMemoryStore, InstanceRow};
pub use postgres::PgStore;

use armada_id::{DeploymentId, InstanceId, VmId};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{NewVmRecord, VmRecord};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness or FK constraint was violated.
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Row-level persistence operations for the provisioning core.
///
/// VM saves are independent across instances; implementations must be
/// safe for concurrent workers.
#[async_trait]
pub trait DirectorStore: Send + Sync {
    /// Persist a new VM record atomically and return it.
    async fn insert_vm(&self, vm: NewVmRecord) -> Result<VmRecord, StoreError>;

    /// Delete a VM record.
    async fn delete_vm(&self, id: VmId) -> Result<(), StoreError>;

    /// Look up a VM record by id.
    async fn find_vm(&self, id: VmId) -> Result<VmRecord, StoreError>;

    /// Look up a VM record by cloud cid.
    async fn find_vm_by_cid(&self, cid: &str) -> Result<Option<VmRecord>, StoreError>;

    /// All VM records belonging to a deployment.
    async fn vms_for_deployment(
        &self,
        deployment: DeploymentId,
    ) -> Result<Vec<VmRecord>, StoreError>;

    /// Set or clear the instance → VM link.
    async fn bind_instance_vm(
        &self,
        instance: InstanceId,
        vm: Option<VmId>,
    ) -> Result<(), StoreError>;

    /// Replace the instance's persisted apply spec.
    async fn update_instance_apply_spec(
        &self,
        instance: InstanceId,
        spec: &Value,
    ) -> Result<(), StoreError>;

    /// Replace the instance's persisted cloud properties.
    async fn update_instance_cloud_properties(
        &self,
        instance: InstanceId,
        properties: &Value,
    ) -> Result<(), StoreError>;

    /// Record the digest of the trusted certificate bundle last pushed
    /// to the instance's agent.
    async fn update_instance_trusted_certs(
        &self,
        instance: InstanceId,
        digest: &str,
    ) -> Result<(), StoreError>;
}
