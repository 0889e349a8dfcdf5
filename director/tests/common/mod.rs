//! Shared test harness: scripted fake agent, mock cloud provider, and
//! recording fakes for the creator's collaborators.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use armada_bus::{Bus, InMemoryBus};
use armada_id::{DeploymentId, InstanceId, VmId};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use armada_director::agent::{AgentFactory, CredentialEnvelope};
use armada_director::blobstore::InMemoryBlobstore;
use armada_director::config::{cancel_channel, CancelSignal, DirectorConfig};
use armada_director::cpi::{CloudProvider, CpiError};
use armada_director::instance::Instance;
use armada_director::models::{AgentCredentials, DeploymentRef, NewVmRecord, Stemcell, VmRecord};
use armada_director::plan::{ExistingInstance, InstancePlan, IpReservation, NetworkPlan};
use armada_director::progress::EventLog;
use armada_director::store::{DirectorStore, InMemoryStore, StoreError};
use armada_director::vm::{
    DiskManager, IpProvider, MetadataUpdater, NoopMetadataUpdater, VmCreator, VmDeleter, VmFactory,
};

/// Route test logs through tracing, honoring `RUST_LOG`.
///
/// Safe to call from every harness constructor; only the first call in
/// a test binary installs the subscriber.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fake agent
// =============================================================================

/// One request observed by the fake agent.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<Value>,
    pub reply_to: String,
}

/// Handle to a scripted agent responder on the bus.
///
/// The responder closure maps `(method, args)` to a full reply object,
/// or `None` to stay silent. State (call counters, flips) lives in the
/// closure's captures.
#[derive(Clone)]
pub struct FakeAgent {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl FakeAgent {
    /// Serve every `agent.*` subject on the bus, plaintext.
    pub async fn spawn<F>(bus: Arc<InMemoryBus>, responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        Self::spawn_inner(bus, None, responder).await
    }

    /// Serve with an encrypted channel keyed by `credentials`.
    pub async fn spawn_encrypted<F>(
        bus: Arc<InMemoryBus>,
        credentials: &AgentCredentials,
        responder: F,
    ) -> Self
    where
        F: Fn(&str, &[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        let envelope = CredentialEnvelope::new(credentials).expect("valid credentials");
        Self::spawn_inner(bus, Some(envelope), responder).await
    }

    async fn spawn_inner<F>(
        bus: Arc<InMemoryBus>,
        envelope: Option<CredentialEnvelope>,
        responder: F,
    ) -> Self
    where
        F: Fn(&str, &[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let mut subscription = bus.subscribe("agent.>").await.expect("subscribe agent.>");

        tokio::spawn(async move {
            while let Some(bytes) = subscription.receiver.recv().await {
                let Ok(wire) = serde_json::from_slice::<Value>(&bytes) else {
                    continue;
                };

                // reply_to travels outside the encrypted envelope.
                let Some(reply_to) = wire["reply_to"].as_str().map(str::to_string) else {
                    continue;
                };

                let request = match &envelope {
                    Some(envelope) => envelope.open(wire.clone()),
                    None => wire.clone(),
                };

                let method = request["method"].as_str().unwrap_or_default().to_string();
                let args = request["arguments"].as_array().cloned().unwrap_or_default();

                recorded.lock().unwrap().push(RecordedCall {
                    method: method.clone(),
                    args: args.clone(),
                    reply_to: reply_to.clone(),
                });

                if let Some(reply) = responder(&method, &args) {
                    let reply = match &envelope {
                        Some(envelope) => envelope.seal(&reply).expect("seal reply"),
                        None => reply,
                    };
                    let _ = bus
                        .publish(&reply_to, serde_json::to_vec(&reply).expect("encode reply"))
                        .await;
                }
            }
        });

        Self { calls }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }
}

/// Responder for the straight-through creation flow: agents answer
/// `ping` immediately, run `apply` as a short task, and accept settings.
pub fn happy_responder() -> impl Fn(&str, &[Value]) -> Option<Value> + Send + Sync + 'static {
    |method, _args| match method {
        "ping" => Some(json!({"value": "pong"})),
        "apply" => Some(json!({"value": {"agent_task_id": "task-apply"}})),
        "get_task" => Some(json!({"value": {"state": "done", "value": null}})),
        _ => Some(json!({"value": "ok"})),
    }
}

// =============================================================================
// Mock cloud provider
// =============================================================================

#[derive(Debug, Clone)]
pub struct CreatedVm {
    pub agent_id: armada_id::AgentId,
    pub cid: String,
    pub disk_cids: Vec<String>,
    pub env: Value,
}

/// Scriptable CPI: queued outcomes are consumed first, then creation
/// succeeds with sequential cids.
#[derive(Default)]
pub struct MockCloudProvider {
    created: Mutex<Vec<CreatedVm>>,
    deleted: Mutex<Vec<String>>,
    queued_failures: Mutex<VecDeque<CpiError>>,
    next_cid: AtomicUsize,
}

impl MockCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next `create_vm` call.
    pub fn fail_next_create(&self, error: CpiError) {
        self.queued_failures.lock().unwrap().push_back(error);
    }

    pub fn retryable_failure(message: &str) -> CpiError {
        CpiError::VmCreationFailed {
            message: message.to_string(),
            ok_to_retry: true,
        }
    }

    pub fn created(&self) -> Vec<CreatedVm> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn create_attempts(&self) -> usize {
        self.next_cid.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for MockCloudProvider {
    async fn create_vm(
        &self,
        agent_id: armada_id::AgentId,
        _stemcell_cid: &str,
        _cloud_properties: &Value,
        _network_settings: &Value,
        disk_cids: &[String],
        env: &Value,
    ) -> Result<String, CpiError> {
        let attempt = self.next_cid.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(error) = self.queued_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let cid = format!("i-{attempt:04}");
        self.created.lock().unwrap().push(CreatedVm {
            agent_id,
            cid: cid.clone(),
            disk_cids: disk_cids.to_vec(),
            env: env.clone(),
        });
        Ok(cid)
    }

    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CpiError> {
        self.deleted.lock().unwrap().push(vm_cid.to_string());
        Ok(())
    }
}

// =============================================================================
// Recording collaborator fakes
// =============================================================================

#[derive(Default)]
pub struct RecordingIpProvider {
    released: Mutex<Vec<IpReservation>>,
}

impl RecordingIpProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn released(&self) -> Vec<IpReservation> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl IpProvider for RecordingIpProvider {
    async fn release(&self, reservation: &IpReservation) -> anyhow::Result<()> {
        self.released.lock().unwrap().push(reservation.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDiskManager {
    attached: Mutex<Vec<InstanceId>>,
}

impl RecordingDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self) -> Vec<InstanceId> {
        self.attached.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiskManager for RecordingDiskManager {
    async fn attach_disks_for(&self, instance: &Instance) -> anyhow::Result<()> {
        self.attached.lock().unwrap().push(instance.id);
        Ok(())
    }
}

/// Store whose VM inserts always fail; everything else delegates.
pub struct FailingVmStore {
    inner: InMemoryStore,
}

impl FailingVmStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
        }
    }
}

#[async_trait]
impl DirectorStore for FailingVmStore {
    async fn insert_vm(&self, _vm: NewVmRecord) -> Result<VmRecord, StoreError> {
        Err(StoreError::Database("injected insert failure".to_string()))
    }

    async fn delete_vm(&self, id: VmId) -> Result<(), StoreError> {
        self.inner.delete_vm(id).await
    }

    async fn find_vm(&self, id: VmId) -> Result<VmRecord, StoreError> {
        self.inner.find_vm(id).await
    }

    async fn find_vm_by_cid(&self, cid: &str) -> Result<Option<VmRecord>, StoreError> {
        self.inner.find_vm_by_cid(cid).await
    }

    async fn vms_for_deployment(
        &self,
        deployment: DeploymentId,
    ) -> Result<Vec<VmRecord>, StoreError> {
        self.inner.vms_for_deployment(deployment).await
    }

    async fn bind_instance_vm(
        &self,
        instance: InstanceId,
        vm: Option<VmId>,
    ) -> Result<(), StoreError> {
        self.inner.bind_instance_vm(instance, vm).await
    }

    async fn update_instance_apply_spec(
        &self,
        instance: InstanceId,
        spec: &Value,
    ) -> Result<(), StoreError> {
        self.inner.update_instance_apply_spec(instance, spec).await
    }

    async fn update_instance_cloud_properties(
        &self,
        instance: InstanceId,
        properties: &Value,
    ) -> Result<(), StoreError> {
        self.inner
            .update_instance_cloud_properties(instance, properties)
            .await
    }

    async fn update_instance_trusted_certs(
        &self,
        instance: InstanceId,
        digest: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .update_instance_trusted_certs(instance, digest)
            .await
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn deployment() -> DeploymentRef {
    DeploymentRef {
        id: DeploymentId::new(),
        name: "prod-deployment".to_string(),
    }
}

pub fn instance_in(deployment: &DeploymentRef, job_name: &str, index: u32) -> Instance {
    Instance {
        id: InstanceId::new(),
        job_name: job_name.to_string(),
        index,
        deployment: deployment.clone(),
        stemcell: Stemcell {
            name: "ubuntu-noble".to_string(),
            version: "1.100".to_string(),
            cid: "sc-ubuntu-noble".to_string(),
        },
        cloud_properties: json!({"instance_type": "m1.small"}),
        env: json!({"bootstrap": index == 0}),
        persistent_disk_cid: None,
        bound_vm: None,
    }
}

pub fn reservation(network: &str, ip: &str) -> IpReservation {
    IpReservation {
        network_name: network.to_string(),
        ip: ip.to_string(),
        settings: json!({"type": "manual", "ip": ip}),
    }
}

pub fn plan_for(instance: Instance) -> InstancePlan {
    InstancePlan {
        instance,
        existing: None,
        network_plans: vec![NetworkPlan::desired(reservation("default", "10.0.0.10"))],
        recreate: false,
    }
}

pub fn recreate_plan_for(instance: Instance, apply_spec: Value) -> InstancePlan {
    InstancePlan {
        existing: Some(ExistingInstance { apply_spec }),
        recreate: true,
        ..plan_for(instance)
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Fully wired creator over in-memory collaborators.
pub struct Harness {
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<InMemoryStore>,
    pub cpi: Arc<MockCloudProvider>,
    pub blobstore: Arc<InMemoryBlobstore>,
    pub ip_provider: Arc<RecordingIpProvider>,
    pub disk_manager: Arc<RecordingDiskManager>,
    pub event_log: EventLog,
    pub cancel_tx: watch::Sender<bool>,
    pub creator: VmCreator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DirectorConfig {
            max_threads: 3,
            ..DirectorConfig::default()
        })
    }

    /// The common case keeps a typed handle to the in-memory store for
    /// assertions; [`HarnessOverStore`] is the variant for tests that
    /// inject their own store.
    pub fn with_config(config: DirectorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let parts =
            HarnessOverStore::build(Arc::clone(&store) as Arc<dyn DirectorStore>, config);

        Self {
            bus: parts.bus,
            store,
            cpi: parts.cpi,
            blobstore: parts.blobstore,
            ip_provider: parts.ip_provider,
            disk_manager: parts.disk_manager,
            event_log: parts.event_log,
            cancel_tx: parts.cancel_tx,
            creator: parts.creator,
        }
    }
}

pub struct HarnessOverStore {
    pub bus: Arc<InMemoryBus>,
    pub cpi: Arc<MockCloudProvider>,
    pub blobstore: Arc<InMemoryBlobstore>,
    pub ip_provider: Arc<RecordingIpProvider>,
    pub disk_manager: Arc<RecordingDiskManager>,
    pub event_log: EventLog,
    pub cancel_tx: watch::Sender<bool>,
    pub creator: VmCreator,
}

impl HarnessOverStore {
    pub fn build(store: Arc<dyn DirectorStore>, config: DirectorConfig) -> Self {
        init_tracing();

        let bus = Arc::new(InMemoryBus::new());
        let cpi = Arc::new(MockCloudProvider::new());
        let blobstore = Arc::new(InMemoryBlobstore::new());
        let ip_provider = Arc::new(RecordingIpProvider::new());
        let disk_manager = Arc::new(RecordingDiskManager::new());
        let (cancel_tx, cancelled) = cancel_channel();

        let factory = Arc::new(VmFactory::new(
            Arc::clone(&cpi) as Arc<dyn CloudProvider>,
            Arc::clone(&store),
            config.max_vm_create_tries,
            config.encryption,
        ));
        let deleter = Arc::new(VmDeleter::new(
            Arc::clone(&cpi) as Arc<dyn CloudProvider>,
            Arc::clone(&store),
        ));
        let agents = AgentFactory::new(
            Arc::clone(&bus) as Arc<dyn Bus>,
            Arc::clone(&blobstore) as Arc<dyn armada_director::blobstore::Blobstore>,
            config.director_uuid.clone(),
            cancelled,
        );

        let creator = VmCreator::new(
            factory,
            deleter,
            Arc::clone(&disk_manager) as Arc<dyn DiskManager>,
            Arc::new(NoopMetadataUpdater) as Arc<dyn MetadataUpdater>,
            agents,
            Arc::clone(&store),
            config.max_threads,
            config.trusted_certs.clone(),
        );

        Self {
            bus,
            cpi,
            blobstore,
            ip_provider,
            disk_manager,
            event_log: EventLog::new(),
            cancel_tx,
            creator,
        }
    }
}

/// Agent client wired to the harness bus for direct RPC tests.
pub fn agent_client_parts() -> (
    Arc<InMemoryBus>,
    Arc<InMemoryBlobstore>,
    watch::Sender<bool>,
    CancelSignal,
) {
    init_tracing();

    let bus = Arc::new(InMemoryBus::new());
    let blobstore = Arc::new(InMemoryBlobstore::new());
    let (cancel_tx, cancelled) = cancel_channel();
    (bus, blobstore, cancel_tx, cancelled)
}
