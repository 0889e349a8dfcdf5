//! VM deletion: cloud resource, record, and instance unbinding.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cpi::CloudProvider;
use crate::plan::InstancePlan;
use crate::store::DirectorStore;

/// Tears down an instance plan's VM.
///
/// Used both for compensation when VM setup fails mid-flight and by
/// external deletion flows. CPI delete failures are downgraded to
/// warnings; record and binding cleanup always runs.
pub struct VmDeleter {
    cpi: Arc<dyn CloudProvider>,
    store: Arc<dyn DirectorStore>,
}

impl VmDeleter {
    pub fn new(cpi: Arc<dyn CloudProvider>, store: Arc<dyn DirectorStore>) -> Self {
        Self { cpi, store }
    }

    /// Delete the VM bound to the plan's instance, if any.
    pub async fn delete_for_instance_plan(&self, plan: &mut InstancePlan) -> Result<()> {
        let Some(vm_id) = plan.instance.bound_vm else {
            return Ok(());
        };

        let vm = self.store.find_vm(vm_id).await?;

        if let Err(e) = self.cpi.delete_vm(&vm.cid).await {
            warn!(vm_cid = %vm.cid, error = %e, "Failed to delete cloud VM");
        }

        self.store.bind_instance_vm(plan.instance.id, None).await?;
        plan.instance.bound_vm = None;
        self.store.delete_vm(vm.id).await?;

        info!(
            vm_cid = %vm.cid,
            instance = %plan.instance.name(),
            "Deleted VM for instance"
        );
        Ok(())
    }
}
