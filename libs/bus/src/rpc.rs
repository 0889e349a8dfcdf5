//! Correlated request/reply on top of the pub/sub bus.
//!
//! Protocol flow:
//! 1. Caller sends a JSON object to the target's subject.
//! 2. The transport injects a `reply_to` subject unique to this request:
//!    `<service>.<client_id>.<request_id>`.
//! 3. The responder publishes a JSON object to that subject.
//! 4. The first well-formed reply completes the request; the
//!    subscription is dropped.
//!
//! The transport is shape-aware (replies must be JSON objects) but never
//! interprets payload semantics. Each request owns its completion: there
//! is no shared reply queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use armada_id::RequestId;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bus::{Bus, SubscriptionId};
use crate::error::BusError;

struct PendingEntry {
    subscription_id: SubscriptionId,
    forwarder: JoinHandle<()>,
}

/// Request/reply client for one logical owner (e.g. one agent client).
///
/// Cheap to clone; clones share the pending-request table.
#[derive(Clone)]
pub struct RpcClient {
    bus: Arc<dyn Bus>,
    reply_prefix: String,
    pending: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
}

impl RpcClient {
    /// Create a client whose replies arrive under `<service>.<client_id>`.
    pub fn new(bus: Arc<dyn Bus>, service: &str, client_id: &str) -> Self {
        Self {
            bus,
            reply_prefix: format!("{service}.{client_id}"),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of requests currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }

    /// Send `payload` to `subject` and return the request id plus a
    /// completion for the reply.
    ///
    /// The payload map gains a `reply_to` key naming the per-request
    /// reply subject. Dropping the returned receiver without calling
    /// [`cancel_request`](Self::cancel_request) leaves the subscription
    /// alive until a reply (or bus shutdown) cleans it up.
    pub async fn send_request(
        &self,
        subject: &str,
        mut payload: Map<String, Value>,
    ) -> Result<(RequestId, oneshot::Receiver<Value>), BusError> {
        let request_id = RequestId::new();
        let reply_subject = format!("{}.{}", self.reply_prefix, request_id);

        let mut subscription = self.bus.subscribe(&reply_subject).await?;
        payload.insert("reply_to".to_string(), Value::String(reply_subject.clone()));

        let bytes = serde_json::to_vec(&Value::Object(payload))
            .map_err(|e| BusError::Encode(e.to_string()))?;

        if let Err(e) = self.bus.publish(subject, bytes).await {
            let _ = self.bus.unsubscribe(subscription.id).await;
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        let bus = Arc::clone(&self.bus);
        let pending = Arc::clone(&self.pending);
        let subscription_id = subscription.id;

        let forwarder = tokio::spawn(async move {
            let mut completion = Some(tx);
            while let Some(bytes) = subscription.receiver.recv().await {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(reply @ Value::Object(_)) => {
                        if let Some(tx) = completion.take() {
                            let _ = tx.send(reply);
                        }
                        break;
                    }
                    Ok(_) => {
                        warn!(subject = %reply_subject, "Discarding non-object reply");
                    }
                    Err(e) => {
                        warn!(subject = %reply_subject, error = %e, "Discarding malformed reply");
                    }
                }
            }
            pending
                .lock()
                .expect("pending table poisoned")
                .remove(&request_id);
            let _ = bus.unsubscribe(subscription_id).await;
        });

        self.pending
            .lock()
            .expect("pending table poisoned")
            .insert(
                request_id,
                PendingEntry {
                    subscription_id,
                    forwarder,
                },
            );

        Ok((request_id, rx))
    }

    /// Detach the completion for an in-flight request and best-effort
    /// unsubscribe from its reply subject.
    ///
    /// A reply arriving after cancellation is dropped by the bus.
    /// Cancelling an unknown or already-completed request is a no-op.
    pub async fn cancel_request(&self, request_id: RequestId) {
        let entry = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&request_id);

        if let Some(entry) = entry {
            entry.forwarder.abort();
            let _ = self.bus.unsubscribe(entry.subscription_id).await;
        }
    }
}
