//! In-memory store for tests and dry-runs.

use std::collections::HashMap;

use armada_id::{DeploymentId, InstanceId, VmId};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{NewVmRecord, VmRecord};

use super::{DirectorStore, StoreError};

/// Per-instance persisted state the core touches.
#[derive(Debug, Clone, Default)]
pub struct InstanceRow {
    pub vm_id: Option<VmId>,
    pub apply_spec: Option<Value>,
    pub cloud_properties: Option<Value>,
    pub trusted_certs_digest: Option<String>,
}

/// Map-backed [`DirectorStore`].
///
/// Instance rows are created lazily on first write, so tests don't have
/// to seed them.
#[derive(Default)]
pub struct InMemoryStore {
    vms: RwLock<HashMap<VmId, VmRecord>>,
    instances: RwLock<HashMap<InstanceId, InstanceRow>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an instance row, if the core has written to it.
    pub async fn instance_row(&self, instance: InstanceId) -> Option<InstanceRow> {
        self.instances.read().await.get(&instance).cloned()
    }

    /// Snapshot of all persisted VM records.
    pub async fn all_vms(&self) -> Vec<VmRecord> {
        self.vms.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl DirectorStore for InMemoryStore {
    async fn insert_vm(&self, vm: NewVmRecord) -> Result<VmRecord, StoreError> {
        if vm.cid.is_empty() {
            return Err(StoreError::Conflict("vm cid must not be empty".to_string()));
        }

        let mut vms = self.vms.write().await;
        if vms.values().any(|existing| existing.cid == vm.cid) {
            return Err(StoreError::Conflict(format!(
                "vm cid already registered: {}",
                vm.cid
            )));
        }

        let record = VmRecord {
            id: VmId::new(),
            cid: vm.cid,
            agent_id: vm.agent_id,
            deployment_id: vm.deployment_id,
            env: vm.env,
            credentials: vm.credentials,
            created_at: Utc::now(),
        };
        vms.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_vm(&self, id: VmId) -> Result<(), StoreError> {
        self.vms
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_vm(&self, id: VmId) -> Result<VmRecord, StoreError> {
        self.vms
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_vm_by_cid(&self, cid: &str) -> Result<Option<VmRecord>, StoreError> {
        Ok(self
            .vms
            .read()
            .await
            .values()
            .find(|vm| vm.cid == cid)
            .cloned())
    }

    async fn vms_for_deployment(
        &self,
        deployment: DeploymentId,
    ) -> Result<Vec<VmRecord>, StoreError> {
        Ok(self
            .vms
            .read()
            .await
            .values()
            .filter(|vm| vm.deployment_id == deployment)
            .cloned()
            .collect())
    }

    async fn bind_instance_vm(
        &self,
        instance: InstanceId,
        vm: Option<VmId>,
    ) -> Result<(), StoreError> {
        self.instances.write().await.entry(instance).or_default().vm_id = vm;
        Ok(())
    }

    async fn update_instance_apply_spec(
        &self,
        instance: InstanceId,
        spec: &Value,
    ) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .entry(instance)
            .or_default()
            .apply_spec = Some(spec.clone());
        Ok(())
    }

    async fn update_instance_cloud_properties(
        &self,
        instance: InstanceId,
        properties: &Value,
    ) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .entry(instance)
            .or_default()
            .cloud_properties = Some(properties.clone());
        Ok(())
    }

    async fn update_instance_trusted_certs(
        &self,
        instance: InstanceId,
        digest: &str,
    ) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .entry(instance)
            .or_default()
            .trusted_certs_digest = Some(digest.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_id::AgentId;
    use serde_json::json;

    fn new_vm(cid: &str, deployment: DeploymentId) -> NewVmRecord {
        NewVmRecord {
            cid: cid.to_string(),
            agent_id: AgentId::new(),
            deployment_id: deployment,
            env: json!({}),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_vm() {
        let store = InMemoryStore::new();
        let deployment = DeploymentId::new();

        let vm = store.insert_vm(new_vm("i-123", deployment)).await.unwrap();
        let found = store.find_vm(vm.id).await.unwrap();
        assert_eq!(found.cid, "i-123");

        let by_cid = store.find_vm_by_cid("i-123").await.unwrap();
        assert_eq!(by_cid.unwrap().id, vm.id);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_cid() {
        let store = InMemoryStore::new();
        let deployment = DeploymentId::new();

        store.insert_vm(new_vm("i-123", deployment)).await.unwrap();
        let result = store.insert_vm(new_vm("i-123", deployment)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_insert_rejects_empty_cid() {
        let store = InMemoryStore::new();
        let result = store.insert_vm(new_vm("", DeploymentId::new())).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_vm() {
        let store = InMemoryStore::new();
        let vm = store
            .insert_vm(new_vm("i-123", DeploymentId::new()))
            .await
            .unwrap();

        store.delete_vm(vm.id).await.unwrap();
        assert!(matches!(
            store.find_vm(vm.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_vms_for_deployment_filters() {
        let store = InMemoryStore::new();
        let ours = DeploymentId::new();
        let theirs = DeploymentId::new();

        store.insert_vm(new_vm("i-1", ours)).await.unwrap();
        store.insert_vm(new_vm("i-2", theirs)).await.unwrap();

        let vms = store.vms_for_deployment(ours).await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].cid, "i-1");
    }

    #[tokio::test]
    async fn test_bind_and_clear_instance_vm() {
        let store = InMemoryStore::new();
        let instance = InstanceId::new();
        let vm_id = VmId::new();

        store.bind_instance_vm(instance, Some(vm_id)).await.unwrap();
        assert_eq!(store.instance_row(instance).await.unwrap().vm_id, Some(vm_id));

        store.bind_instance_vm(instance, None).await.unwrap();
        assert_eq!(store.instance_row(instance).await.unwrap().vm_id, None);
    }
}
