//! RPC client for the bootstrap agent inside a VM.
//!
//! Presents blocking-style calls over the asynchronous bus transport.
//! Behind a call sits: optional payload encryption, per-method retry
//! budgets and timeouts, a correlated reply wait with cooperative
//! cancellation, task polling for long-running operations, and reply
//! normalization (remote exceptions, blob splicing).

use std::time::Duration;

use armada_bus::{BusError, RequestId, RpcClient};
use armada_id::AgentId;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::blobstore::{download_and_delete_blob, Blobstore};
use crate::config::CancelSignal;
use crate::models::AgentCredentials;

use super::envelope::{CredentialEnvelope, CryptoError};
use super::methods::AgentMethod;

/// Agent protocol version spoken by this director.
pub const PROTOCOL_VERSION: u32 = 3;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Sleep between `get_task` polls.
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outer deadline on the `stop` task poll.
const STOP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default wall-clock deadline for [`AgentClient::wait_until_ready`].
pub const READY_DEADLINE: Duration = Duration::from_secs(600);

/// Per-ping timeout while waiting for an agent to come up.
const READY_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// How often the cancellation predicate is applied during a reply wait.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced by agent RPC.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No reply within the per-request deadline (after retries).
    #[error("timed out waiting for agent {agent_id} to respond to '{method}'")]
    Timeout {
        agent_id: AgentId,
        method: AgentMethod,
    },

    /// The agent raised an exception. The message carries the remote
    /// backtrace and any blob-parked details.
    #[error("agent error: {message}")]
    Remote { message: String },

    /// The agent rejected a method this director requires.
    #[error("agent {agent_id} does not support '{method}'")]
    UnsupportedAction {
        agent_id: AgentId,
        method: AgentMethod,
    },

    /// The surrounding job was cancelled while waiting.
    #[error("task was cancelled")]
    TaskCancelled,

    /// Transport failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Envelope failure on the send path.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Client for one VM's agent.
///
/// Constructed per VM; shares the process-wide bus underneath but owns
/// its request correlation. All calls are safe to issue from pool
/// workers concurrently.
pub struct AgentClient {
    rpc: RpcClient,
    blobstore: Arc<dyn Blobstore>,
    agent_id: AgentId,
    subject: String,
    envelope: Option<CredentialEnvelope>,
    timeout: Duration,
    cancelled: CancelSignal,
}

impl AgentClient {
    /// Create a client for `agent_id`, encrypting when the VM carries
    /// credentials.
    pub fn new(
        rpc: RpcClient,
        blobstore: Arc<dyn Blobstore>,
        agent_id: AgentId,
        credentials: Option<&AgentCredentials>,
        cancelled: CancelSignal,
    ) -> Result<Self, CryptoError> {
        let envelope = credentials.map(CredentialEnvelope::new).transpose()?;

        Ok(Self {
            rpc,
            blobstore,
            subject: format!("agent.{agent_id}"),
            agent_id,
            envelope,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            cancelled,
        })
    }

    /// Override the default per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The agent this client addresses.
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    // =========================================================================
    // Public method surface
    // =========================================================================

    pub async fn ping(&self) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::Ping, vec![]).await
    }

    /// Fetch the agent's state. Carries a correlation argument the agent
    /// echoes into its logs.
    pub async fn get_state(&self, mut args: Vec<Value>) -> Result<Value, AgentError> {
        let correlation = self.correlation_argument(AgentMethod::GetState);
        args.push(Value::String(correlation));
        self.send_message(AgentMethod::GetState, args).await
    }

    /// Apply a declarative state spec on the agent.
    pub async fn apply(&self, spec: Value) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::Apply, vec![spec]).await
    }

    pub async fn start(&self) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::Start, vec![]).await
    }

    /// Stop all jobs on the agent. Bounded by a 300 s outer deadline on
    /// the task poll; an agent that reports a slow service shutdown is
    /// tolerated.
    pub async fn stop(&self) -> Result<(), AgentError> {
        match self
            .send_message_with_timeout(AgentMethod::Stop, STOP_TIMEOUT, vec![])
            .await
        {
            Ok(_) => Ok(()),
            Err(AgentError::Remote { message })
                if message.contains("Timed out waiting for service") =>
            {
                warn!(agent_id = %self.agent_id, error = %message, "Agent reported slow service shutdown, ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn prepare(&self, spec: Value) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::Prepare, vec![spec]).await
    }

    /// Drain jobs ahead of a stop/recreate. Open-ended but cancellable:
    /// on job cancellation a best-effort `cancel_task` is sent and
    /// [`AgentError::TaskCancelled`] surfaces.
    pub async fn drain(&self, args: Vec<Value>) -> Result<Value, AgentError> {
        self.send_cancellable_message(AgentMethod::Drain, args).await
    }

    pub async fn compile_package(&self, args: Vec<Value>) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::CompilePackage, args).await
    }

    /// Fetch logs from the agent. Carries a correlation argument like
    /// [`get_state`](Self::get_state).
    pub async fn fetch_logs(&self, mut args: Vec<Value>) -> Result<Value, AgentError> {
        let correlation = self.correlation_argument(AgentMethod::FetchLogs);
        args.push(Value::String(correlation));
        self.send_message(AgentMethod::FetchLogs, args).await
    }

    pub async fn list_disk(&self) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::ListDisk, vec![]).await
    }

    pub async fn mount_disk(&self, disk_cid: &str) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::MountDisk, vec![json!(disk_cid)])
            .await
    }

    pub async fn unmount_disk(&self, disk_cid: &str) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::UnmountDisk, vec![json!(disk_cid)])
            .await
    }

    pub async fn migrate_disk(&self, from_cid: &str, to_cid: &str) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::MigrateDisk, vec![json!(from_cid), json!(to_cid)])
            .await
    }

    pub async fn associate_disks(&self, disk_cids: Vec<Value>) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::AssociateDisks, vec![Value::Array(disk_cids)])
            .await
    }

    /// Run a lifecycle script. Best-effort: agents predating the method
    /// reply with an unknown-message error, which is swallowed.
    pub async fn run_script(&self, name: &str, options: Value) -> Result<(), AgentError> {
        match self
            .send_message(AgentMethod::RunScript, vec![json!(name), options])
            .await
        {
            Ok(_) => Ok(()),
            Err(AgentError::Remote { message }) if message.contains("unknown message") => {
                warn!(agent_id = %self.agent_id, script = %name, "Agent does not support run_script, ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run_errand(&self, args: Vec<Value>) -> Result<Value, AgentError> {
        self.send_message(AgentMethod::RunErrand, args).await
    }

    /// Push updated settings (trusted certs, disk associations).
    /// Best-effort: unknown-message replies are swallowed.
    pub async fn update_settings(&self, settings: Value) -> Result<(), AgentError> {
        match self
            .send_message(AgentMethod::UpdateSettings, vec![settings])
            .await
        {
            Ok(_) => Ok(()),
            Err(AgentError::Remote { message }) if message.contains("unknown message") => {
                warn!(agent_id = %self.agent_id, "Agent does not support update_settings, ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Upload a blob through the agent. Unlike the best-effort methods,
    /// an agent without this capability is a distinct, actionable error.
    pub async fn upload_blob(&self, blob: Value) -> Result<Value, AgentError> {
        match self.send_message(AgentMethod::UploadBlob, vec![blob]).await {
            Err(AgentError::Remote { message }) if message.contains("unknown message") => {
                Err(AgentError::UnsupportedAction {
                    agent_id: self.agent_id,
                    method: AgentMethod::UploadBlob,
                })
            }
            other => other,
        }
    }

    /// Low-level DNS sync: sends the request and hands the completion to
    /// the caller, who owns the wait and cancellation
    /// ([`cancel_sync_dns`](Self::cancel_sync_dns)).
    pub async fn sync_dns(
        &self,
        args: &[Value],
    ) -> Result<(RequestId, oneshot::Receiver<Value>), AgentError> {
        let payload = self.build_payload(AgentMethod::SyncDns, args)?;
        Ok(self.rpc.send_request(&self.subject, payload).await?)
    }

    /// Cancel an in-flight [`sync_dns`](Self::sync_dns) request.
    pub async fn cancel_sync_dns(&self, request_id: RequestId) {
        self.rpc.cancel_request(request_id).await;
    }

    /// Flush stale ARP entries. Fire-and-forget: no reply is awaited and
    /// failures are only logged.
    pub async fn delete_arp_entries(&self, ips: Vec<Value>) -> Result<(), AgentError> {
        self.fire_and_forget(AgentMethod::DeleteArpEntries, &[json!({ "ips": ips })])
            .await;
        Ok(())
    }

    /// Cancel a long-running agent task.
    pub async fn cancel_task(&self, task_id: &Value) -> Result<Value, AgentError> {
        let reply = self
            .call(AgentMethod::CancelTask, std::slice::from_ref(task_id))
            .await?;
        Ok(reply.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Ping the agent until it responds or `deadline` passes.
    ///
    /// Each ping gets a 1 s timeout; timeouts and "restarting agent"
    /// replies retry while the deadline is in the future. Job
    /// cancellation is observed before each attempt, so a cancellation
    /// landing mid-ping is seen once that ping resolves.
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<(), AgentError> {
        let deadline_at = tokio::time::Instant::now() + deadline;

        loop {
            if self.job_cancelled() {
                return Err(AgentError::TaskCancelled);
            }

            match self
                .call_once(AgentMethod::Ping, &[], READY_PING_TIMEOUT, false)
                .await
            {
                Ok(_) => return Ok(()),
                Err(AgentError::Timeout { .. }) if tokio::time::Instant::now() < deadline_at => {
                    continue;
                }
                Err(AgentError::Remote { ref message })
                    if message.starts_with("restarting agent")
                        && tokio::time::Instant::now() < deadline_at =>
                {
                    debug!(agent_id = %self.agent_id, "Agent restarting, retrying ping");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Send variants
    // =========================================================================

    /// Standard blocking call: issues the RPC and, for long-running
    /// replies, polls `get_task` until the task leaves `running`.
    pub async fn send_message(
        &self,
        method: AgentMethod,
        args: Vec<Value>,
    ) -> Result<Value, AgentError> {
        self.send_and_wait(method, &args, None, false).await
    }

    /// Like [`send_message`](Self::send_message) with an outer deadline
    /// on the task poll. On expiry polling stops and the last observed
    /// value is returned.
    pub async fn send_message_with_timeout(
        &self,
        method: AgentMethod,
        outer_timeout: Duration,
        args: Vec<Value>,
    ) -> Result<Value, AgentError> {
        self.send_and_wait(method, &args, Some(outer_timeout), false)
            .await
    }

    /// Like [`send_message`](Self::send_message) but observes job
    /// cancellation throughout; a cancelled task is best-effort
    /// cancelled on the agent before [`AgentError::TaskCancelled`]
    /// surfaces.
    pub async fn send_cancellable_message(
        &self,
        method: AgentMethod,
        args: Vec<Value>,
    ) -> Result<Value, AgentError> {
        self.send_and_wait(method, &args, None, true).await
    }

    /// Issue the RPC and immediately drop the reply subscription.
    /// Errors are logged, never raised.
    pub async fn fire_and_forget(&self, method: AgentMethod, args: &[Value]) {
        let payload = match self.build_payload(method, args) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(agent_id = %self.agent_id, method = %method, error = %e, "Failed to build fire-and-forget payload");
                return;
            }
        };

        match self.rpc.send_request(&self.subject, payload).await {
            Ok((request_id, _reply)) => {
                self.rpc.cancel_request(request_id).await;
                debug!(agent_id = %self.agent_id, method = %method, "Fire-and-forget sent");
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, method = %method, error = %e, "Fire-and-forget send failed");
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn job_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn correlation_argument(&self, method: AgentMethod) -> String {
        let correlation = format!("unique_message_id {}", uuid::Uuid::new_v4());
        info!(agent_id = %self.agent_id, method = %method, correlation_id = %correlation, "Issuing correlated agent request");
        correlation
    }

    fn build_payload(
        &self,
        method: AgentMethod,
        args: &[Value],
    ) -> Result<Map<String, Value>, AgentError> {
        let request = json!({
            "protocol": PROTOCOL_VERSION,
            "method": method.wire_name(),
            "arguments": args,
        });

        let wire = match &self.envelope {
            Some(envelope) => envelope.seal(&request)?,
            None => request,
        };

        let Value::Object(map) = wire else {
            return Err(CryptoError::Malformed("request payload must be an object".to_string()).into());
        };
        Ok(map)
    }

    /// One request with the method's retry budget and default timeout.
    async fn call(&self, method: AgentMethod, args: &[Value]) -> Result<Value, AgentError> {
        let timeout = method.timeout_override().unwrap_or(self.timeout);
        self.call_with_policy(method, args, timeout, false).await
    }

    /// Retry loop: only timeouts consume the budget; every attempt is a
    /// fresh request with a fresh correlation id and deadline.
    async fn call_with_policy(
        &self,
        method: AgentMethod,
        args: &[Value],
        timeout: Duration,
        check_cancel: bool,
    ) -> Result<Value, AgentError> {
        let mut retries_left = method.retries();

        loop {
            match self.call_once(method, args, timeout, check_cancel).await {
                Err(AgentError::Timeout { .. }) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(
                        agent_id = %self.agent_id,
                        method = %method,
                        retries_left,
                        "Agent request timed out, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    /// Single request/reply exchange, normalized.
    async fn call_once(
        &self,
        method: AgentMethod,
        args: &[Value],
        timeout: Duration,
        check_cancel: bool,
    ) -> Result<Value, AgentError> {
        let payload = self.build_payload(method, args)?;
        let (request_id, mut reply_rx) = self.rpc.send_request(&self.subject, payload).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut cancel_poll = tokio::time::interval(CANCEL_POLL_INTERVAL);

        let reply = loop {
            tokio::select! {
                reply = &mut reply_rx => {
                    match reply {
                        Ok(value) => break value,
                        Err(_) => return Err(BusError::Closed.into()),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.rpc.cancel_request(request_id).await;
                    return Err(AgentError::Timeout { agent_id: self.agent_id, method });
                }
                _ = cancel_poll.tick() => {
                    if check_cancel && self.job_cancelled() {
                        self.rpc.cancel_request(request_id).await;
                        return Err(AgentError::TaskCancelled);
                    }
                }
            }
        };

        let reply = match &self.envelope {
            Some(envelope) => envelope.open(reply),
            None => reply,
        };

        if let Some(exception) = reply.get("exception") {
            let message = self.format_exception(exception).await;
            return Err(AgentError::Remote { message });
        }

        Ok(reply)
    }

    /// Issue the call and, if the agent started a long-running task,
    /// poll it to completion.
    async fn send_and_wait(
        &self,
        method: AgentMethod,
        args: &[Value],
        outer_timeout: Option<Duration>,
        cancellable: bool,
    ) -> Result<Value, AgentError> {
        let timeout = method.timeout_override().unwrap_or(self.timeout);
        let reply = self
            .call_with_policy(method, args, timeout, cancellable)
            .await?;
        let mut value = reply.get("value").cloned().unwrap_or(Value::Null);

        if let Some(task_id) = task_id_of(&value) {
            let deadline = outer_timeout.map(|t| tokio::time::Instant::now() + t);
            value = self.get_task_status(&task_id, cancellable).await?;

            while task_state(&value) == Some("running") {
                if let Some(deadline) = deadline {
                    if tokio::time::Instant::now() >= deadline {
                        debug!(
                            agent_id = %self.agent_id,
                            method = %method,
                            "Task poll deadline reached, returning last observed value"
                        );
                        break;
                    }
                }

                if cancellable && self.job_cancelled() {
                    info!(agent_id = %self.agent_id, method = %method, "Job cancelled, cancelling agent task");
                    if let Err(e) = self.cancel_task(&task_id).await {
                        warn!(agent_id = %self.agent_id, error = %e, "Failed to cancel agent task");
                    }
                    return Err(AgentError::TaskCancelled);
                }

                tokio::time::sleep(TASK_POLL_INTERVAL).await;
                value = self.get_task_status(&task_id, cancellable).await?;
            }

            value = match value {
                Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
                other => other,
            };
        }

        self.splice_compile_log(&mut value).await;
        Ok(value)
    }

    async fn get_task_status(
        &self,
        task_id: &Value,
        cancellable: bool,
    ) -> Result<Value, AgentError> {
        let timeout = AgentMethod::GetTask
            .timeout_override()
            .unwrap_or(self.timeout);
        let reply = self
            .call_with_policy(
                AgentMethod::GetTask,
                std::slice::from_ref(task_id),
                timeout,
                cancellable,
            )
            .await?;
        Ok(reply.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Flatten a remote exception into one message: text, joined
    /// backtrace, and any blob-parked details (fetched then deleted).
    async fn format_exception(&self, exception: &Value) -> String {
        let Some(details) = exception.as_object() else {
            return match exception.as_str() {
                Some(s) => s.to_string(),
                None => exception.to_string(),
            };
        };

        let mut message = details
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| exception.to_string());

        match details.get("backtrace") {
            Some(Value::Array(frames)) => {
                let joined = frames
                    .iter()
                    .map(|frame| match frame.as_str() {
                        Some(s) => s.to_string(),
                        None => frame.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                message.push('\n');
                message.push_str(&joined);
            }
            Some(Value::String(backtrace)) => {
                message.push('\n');
                message.push_str(backtrace);
            }
            _ => {}
        }

        if let Some(blob_id) = details.get("blobstore_id").and_then(Value::as_str) {
            match download_and_delete_blob(self.blobstore.as_ref(), blob_id).await {
                Ok(bytes) => {
                    message.push('\n');
                    message.push_str(&String::from_utf8_lossy(&bytes));
                }
                Err(e) => {
                    warn!(agent_id = %self.agent_id, blob_id = %blob_id, error = %e, "Failed to fetch remote exception blob");
                }
            }
        }

        message
    }

    /// Replace `result.compile_log_id` with the blob's contents.
    async fn splice_compile_log(&self, value: &mut Value) {
        let Some(log_id) = value
            .get("result")
            .and_then(|result| result.get("compile_log_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };

        match download_and_delete_blob(self.blobstore.as_ref(), &log_id).await {
            Ok(bytes) => {
                if let Some(result) = value.get_mut("result").and_then(Value::as_object_mut) {
                    result.remove("compile_log_id");
                    result.insert(
                        "compile_log".to_string(),
                        Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                    );
                }
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, blob_id = %log_id, error = %e, "Failed to fetch compile log blob");
            }
        }
    }
}

fn task_id_of(value: &Value) -> Option<Value> {
    value
        .as_object()
        .and_then(|map| map.get("agent_task_id"))
        .cloned()
}

fn task_state(value: &Value) -> Option<&str> {
    value
        .as_object()
        .and_then(|map| map.get("state"))
        .and_then(Value::as_str)
}
