//! VM factory: CPI invocation, record persistence, and cleanup.

use std::sync::Arc;

use armada_id::AgentId;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::cpi::{CloudProvider, CpiError};
use crate::models::{AgentCredentials, DeploymentRef, NewVmRecord, Stemcell, VmRecord};
use crate::store::{DirectorStore, StoreError};

/// Errors from VM creation.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Cpi(#[from] CpiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates cloud VMs and their persistent records.
///
/// Between CPI success and record save the cloud resource is untracked;
/// any failure inside that window deletes the VM before the error
/// propagates, so no record ever references a VM that does not exist.
pub struct VmFactory {
    cpi: Arc<dyn CloudProvider>,
    store: Arc<dyn DirectorStore>,
    max_create_tries: u32,
    encryption: bool,
}

impl VmFactory {
    pub fn new(
        cpi: Arc<dyn CloudProvider>,
        store: Arc<dyn DirectorStore>,
        max_create_tries: u32,
        encryption: bool,
    ) -> Self {
        Self {
            cpi,
            store,
            max_create_tries: max_create_tries.max(1),
            encryption,
        }
    }

    /// Create a VM and persist its record.
    ///
    /// The caller's `env` is never mutated; credentials (when encryption
    /// is enabled) are injected into a copy under `agent.credentials`.
    /// Retryable CPI failures are re-attempted up to the configured
    /// total; everything else propagates.
    pub async fn create(
        &self,
        deployment: &DeploymentRef,
        stemcell: &Stemcell,
        cloud_properties: &Value,
        network_settings: &Value,
        disk_cids: &[String],
        env: &Value,
    ) -> Result<VmRecord, FactoryError> {
        let mut env = env.clone();
        let agent_id = AgentId::new();

        let credentials = if self.encryption {
            let credentials = AgentCredentials::generate();
            inject_credentials(&mut env, &credentials);
            Some(credentials)
        } else {
            None
        };

        let cid = self
            .create_cloud_vm(
                agent_id,
                stemcell,
                cloud_properties,
                network_settings,
                disk_cids,
                &env,
            )
            .await?;

        match self
            .store
            .insert_vm(NewVmRecord {
                cid: cid.clone(),
                agent_id,
                deployment_id: deployment.id,
                env,
                credentials,
            })
            .await
        {
            Ok(vm) => {
                info!(
                    vm_cid = %vm.cid,
                    agent_id = %vm.agent_id,
                    deployment = %deployment.name,
                    "Created VM"
                );
                Ok(vm)
            }
            Err(e) => {
                warn!(vm_cid = %cid, error = %e, "Failed to persist VM record, deleting cloud VM");
                self.delete_vm(&cid).await;
                Err(e.into())
            }
        }
    }

    /// Delete a cloud VM, downgrading failures to warnings.
    pub async fn delete_vm(&self, cid: &str) {
        if let Err(e) = self.cpi.delete_vm(cid).await {
            warn!(vm_cid = %cid, error = %e, "Failed to delete cloud VM");
        }
    }

    async fn create_cloud_vm(
        &self,
        agent_id: AgentId,
        stemcell: &Stemcell,
        cloud_properties: &Value,
        network_settings: &Value,
        disk_cids: &[String],
        env: &Value,
    ) -> Result<String, CpiError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .cpi
                .create_vm(
                    agent_id,
                    &stemcell.cid,
                    cloud_properties,
                    network_settings,
                    disk_cids,
                    env,
                )
                .await
            {
                Ok(cid) => return Ok(cid),
                Err(CpiError::VmCreationFailed {
                    ok_to_retry: true,
                    message,
                }) if attempt < self.max_create_tries => {
                    warn!(
                        attempt,
                        max_tries = self.max_create_tries,
                        error = %message,
                        "Retryable VM creation failure"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn inject_credentials(env: &mut Value, credentials: &AgentCredentials) {
    if !env.is_object() {
        *env = Value::Object(Map::new());
    }
    if let Some(root) = env.as_object_mut() {
        let agent = root
            .entry("agent".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !agent.is_object() {
            *agent = Value::Object(Map::new());
        }
        if let Some(agent) = agent.as_object_mut() {
            agent.insert(
                "credentials".to_string(),
                serde_json::json!({ "key": credentials.key }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inject_credentials_preserves_env() {
        let mut env = json!({"agent": {"mbus": "tls"}, "custom": 1});
        let credentials = AgentCredentials::generate();

        inject_credentials(&mut env, &credentials);

        assert_eq!(env["custom"], 1);
        assert_eq!(env["agent"]["mbus"], "tls");
        assert_eq!(env["agent"]["credentials"]["key"], credentials.key);
    }

    #[test]
    fn test_inject_credentials_into_empty_env() {
        let mut env = Value::Null;
        let credentials = AgentCredentials::generate();

        inject_credentials(&mut env, &credentials);

        assert_eq!(env["agent"]["credentials"]["key"], credentials.key);
    }
}
