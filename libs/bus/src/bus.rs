//! Pub/sub bus seam and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

use crate::error::BusError;

/// Handle identifying one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription: messages published to the subscribed subject
/// arrive on `receiver` in publish order.
pub struct Subscription {
    /// Handle for unsubscribing.
    pub id: SubscriptionId,

    /// Stream of raw payloads.
    pub receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Subject-based pub/sub transport.
///
/// Payloads are opaque bytes; subjects are dot-separated strings.
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to every current subscriber of `subject`.
    ///
    /// Publishing to a subject with no subscribers is not an error.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a subject.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Drop a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}

/// In-process bus backed by per-subject channel fan-out.
///
/// Delivery is immediate and in publish order per subscriber. A
/// subscription subject ending in `.>` matches every subject under that
/// prefix (`agent.>` receives `agent.abc`). Closed subscribers are
/// pruned lazily on the next matching publish.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, mpsc::UnboundedSender<Vec<u8>>)>>>,
    subjects: RwLock<HashMap<SubscriptionId, String>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }
}

fn subject_matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix(">") {
        Some(prefix) => subject.starts_with(prefix),
        None => pattern == subject,
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.write().await;
        let mut delivered = false;

        for (pattern, entries) in subscribers.iter_mut() {
            if !subject_matches(pattern, subject) {
                continue;
            }
            entries.retain(|(_, sender)| sender.send(payload.clone()).is_ok());
            delivered = delivered || !entries.is_empty();
        }

        if !delivered {
            trace!(subject = %subject, "No subscribers for subject");
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        self.subjects.write().await.insert(id, subject.to_string());

        trace!(subject = %subject, subscription = id.0, "Subscribed");
        Ok(Subscription { id, receiver: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let Some(subject) = self.subjects.write().await.remove(&id) else {
            return Ok(());
        };

        let mut subscribers = self.subscribers.write().await;
        if let Some(entries) = subscribers.get_mut(&subject) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                subscribers.remove(&subject);
            }
        }
        Ok(())
    }
}
