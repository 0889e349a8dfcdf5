//! Deployment instances and their VM lifecycle operations.

use anyhow::Result;
use armada_id::{InstanceId, VmId};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::agent::AgentClient;
use crate::models::{DeploymentRef, Stemcell, VmRecord};
use crate::store::DirectorStore;

/// The desired state of one logical instance in a deployment.
///
/// Carries everything VM creation needs; the persistent row is reached
/// through the store handle passed into each operation.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub job_name: String,
    pub index: u32,
    pub deployment: DeploymentRef,
    pub stemcell: Stemcell,
    /// Opaque IaaS-specific properties for the CPI.
    pub cloud_properties: Value,
    /// Opaque env map handed to the CPI.
    pub env: Value,
    /// Cloud cid of the instance's persistent disk, if it has one.
    pub persistent_disk_cid: Option<String>,
    /// VM currently bound to this instance.
    pub bound_vm: Option<VmId>,
}

impl Instance {
    /// `job/index`, the canonical diagnostic name.
    pub fn name(&self) -> String {
        format!("{}/{}", self.job_name, self.index)
    }

    /// Bind a freshly created VM to this instance, persisting the link.
    pub async fn bind_to_vm_model(
        &mut self,
        store: &dyn DirectorStore,
        vm: &VmRecord,
    ) -> Result<()> {
        store.bind_instance_vm(self.id, Some(vm.id)).await?;
        self.bound_vm = Some(vm.id);
        debug!(instance = %self.name(), vm_cid = %vm.cid, "Bound instance to VM");
        Ok(())
    }

    /// Push the trusted certificate bundle to the agent and record its
    /// digest on the instance row.
    pub async fn update_trusted_certs(
        &self,
        store: &dyn DirectorStore,
        agent: &AgentClient,
        trusted_certs: &str,
    ) -> Result<()> {
        agent
            .update_settings(json!({ "trusted_certs": trusted_certs }))
            .await?;

        let digest = hex::encode(Sha256::digest(trusted_certs.as_bytes()));
        store.update_instance_trusted_certs(self.id, &digest).await?;
        Ok(())
    }

    /// Persist the desired cloud properties on the instance row.
    pub async fn update_cloud_properties(&self, store: &dyn DirectorStore) -> Result<()> {
        store
            .update_instance_cloud_properties(self.id, &self.cloud_properties)
            .await?;
        Ok(())
    }

    /// Compute a fresh apply spec, persist it, and apply it on the agent.
    pub async fn apply_vm_state(
        &self,
        store: &dyn DirectorStore,
        agent: &AgentClient,
        network_settings: &Value,
    ) -> Result<()> {
        let spec = json!({
            "deployment": self.deployment.name,
            "job": { "name": self.job_name },
            "index": self.index,
            "networks": network_settings,
        });

        store.update_instance_apply_spec(self.id, &spec).await?;
        agent.apply(spec).await?;
        info!(instance = %self.name(), "Applied VM state");
        Ok(())
    }
}

#[cfg(test)]
impl Instance {
    /// Minimal instance for unit tests.
    pub(crate) fn for_tests(job_name: &str, index: u32) -> Self {
        use armada_id::DeploymentId;
        use serde_json::json;

        Self {
            id: InstanceId::new(),
            job_name: job_name.to_string(),
            index,
            deployment: DeploymentRef {
                id: DeploymentId::new(),
                name: "test-deployment".to_string(),
            },
            stemcell: Stemcell {
                name: "ubuntu-noble".to_string(),
                version: "1.100".to_string(),
                cid: "sc-1".to_string(),
            },
            cloud_properties: json!({}),
            env: json!({}),
            persistent_disk_cid: None,
            bound_vm: None,
        }
    }
}
