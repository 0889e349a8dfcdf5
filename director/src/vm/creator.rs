//! Batch VM creation for instance plans.
//!
//! One pool worker per plan. Within a worker the sequence is strict:
//! CPI create → record save → instance bind → agent ready → trusted
//! certs → cloud properties → disk attach → apply state → network plan
//! bookkeeping → obsolete reservation release. Failures between the
//! record save and the cloud-properties update tear the VM down again
//! before propagating.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};

use crate::agent::{AgentClient, AgentFactory, READY_DEADLINE};
use crate::plan::InstancePlan;
use crate::pool::WorkerPool;
use crate::progress::EventLog;
use crate::store::DirectorStore;

use super::deleter::VmDeleter;
use super::factory::VmFactory;
use super::hooks::{DiskManager, IpProvider, MetadataUpdater};

/// Stage name under which batch creation reports progress.
const CREATE_STAGE: &str = "Creating missing vms";

/// Orchestrates VM creation for batches of instance plans.
#[derive(Clone)]
pub struct VmCreator {
    factory: Arc<VmFactory>,
    deleter: Arc<VmDeleter>,
    disk_manager: Arc<dyn DiskManager>,
    metadata_updater: Arc<dyn MetadataUpdater>,
    agents: AgentFactory,
    store: Arc<dyn DirectorStore>,
    max_threads: usize,
    trusted_certs: String,
}

impl VmCreator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<VmFactory>,
        deleter: Arc<VmDeleter>,
        disk_manager: Arc<dyn DiskManager>,
        metadata_updater: Arc<dyn MetadataUpdater>,
        agents: AgentFactory,
        store: Arc<dyn DirectorStore>,
        max_threads: usize,
        trusted_certs: String,
    ) -> Self {
        Self {
            factory,
            deleter,
            disk_manager,
            metadata_updater,
            agents,
            store,
            max_threads,
            trusted_certs,
        }
    }

    /// Create VMs for every plan in the batch.
    ///
    /// Plans run under a bounded worker pool; the first failure becomes
    /// the batch error once all outstanding workers have drained. An
    /// empty batch opens no stage and spawns no pool.
    pub async fn create_for_instance_plans(
        &self,
        plans: Vec<InstancePlan>,
        ip_provider: Arc<dyn IpProvider>,
        event_log: &EventLog,
    ) -> Result<()> {
        if plans.is_empty() {
            return Ok(());
        }

        let total = plans.len();
        let stage = event_log.begin_stage(CREATE_STAGE, total);
        let mut pool: WorkerPool<anyhow::Error> = WorkerPool::new(self.max_threads);

        for (i, mut plan) in plans.into_iter().enumerate() {
            let worker_name = format!(
                "{}/{} ({}/{})",
                plan.instance.job_name,
                plan.instance.index,
                i + 1,
                total
            );
            let task_name = plan.instance.name();
            let creator = self.clone();
            let ip_provider = Arc::clone(&ip_provider);
            let stage = stage.clone();

            pool.spawn(worker_name, async move {
                stage
                    .advance_and_track(&task_name, async {
                        creator.create_for_instance_plan(&mut plan).await?;

                        for network_plan in plan.network_plans.iter().filter(|p| p.obsolete) {
                            ip_provider.release(&network_plan.reservation).await?;
                        }
                        plan.release_obsolete_network_plans();

                        Ok(())
                    })
                    .await
            });
        }

        pool.join_all().await
    }

    /// Create and set up the VM for one plan.
    pub async fn create_for_instance_plan(&self, plan: &mut InstancePlan) -> Result<()> {
        let existing_apply_spec = plan
            .existing
            .as_ref()
            .map(|existing| existing.apply_spec.clone())
            .unwrap_or_else(|| json!({}));

        let disk_cids: Vec<String> = plan.instance.persistent_disk_cid.iter().cloned().collect();
        let network_settings = plan.network_settings();

        let vm = self
            .factory
            .create(
                &plan.instance.deployment,
                &plan.instance.stemcell,
                &plan.instance.cloud_properties,
                &network_settings,
                &disk_cids,
                &plan.instance.env,
            )
            .await?;

        let agent = match self.prepare_vm(plan, &vm).await {
            Ok(agent) => agent,
            Err(setup_error) => {
                error!(
                    vm_cid = %vm.cid,
                    instance = %plan.instance.name(),
                    error = %setup_error,
                    "VM setup failed, deleting VM"
                );
                if let Err(delete_error) = self.deleter.delete_for_instance_plan(plan).await {
                    warn!(
                        vm_cid = %vm.cid,
                        error = %delete_error,
                        "Cleanup after failed VM setup also failed"
                    );
                }
                return Err(setup_error);
            }
        };

        self.disk_manager.attach_disks_for(&plan.instance).await?;

        if plan.existing.is_some() && plan.needs_recreate() {
            self.store
                .update_instance_apply_spec(plan.instance.id, &existing_apply_spec)
                .await?;
            agent.apply(existing_apply_spec).await?;
            info!(instance = %plan.instance.name(), "Restored previous VM state");
        } else {
            plan.instance
                .apply_vm_state(&*self.store, &agent, &network_settings)
                .await?;
        }

        plan.mark_desired_network_plans_as_existing();
        Ok(())
    }

    /// The compensating window: everything here runs after the VM record
    /// exists, and any failure hands the plan to the deleter.
    async fn prepare_vm(
        &self,
        plan: &mut InstancePlan,
        vm: &crate::models::VmRecord,
    ) -> Result<AgentClient> {
        plan.instance.bind_to_vm_model(&*self.store, vm).await?;

        self.metadata_updater
            .update_vm_metadata(vm, &BTreeMap::new())
            .await?;

        let agent = self.agents.client_for(vm)?;
        agent.wait_until_ready(READY_DEADLINE).await?;

        plan.instance
            .update_trusted_certs(&*self.store, &agent, &self.trusted_certs)
            .await?;
        plan.instance.update_cloud_properties(&*self.store).await?;

        Ok(agent)
    }
}
