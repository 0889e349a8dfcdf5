//! Persistent and value records for the provisioning core.

use armada_id::{AgentId, DeploymentId, VmId};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to the deployment an instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub id: DeploymentId,
    pub name: String,
}

/// Base OS image a VM boots from, identified by its cloud-side cid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stemcell {
    pub name: String,
    pub version: String,
    pub cid: String,
}

/// Symmetric key material for the encrypted agent channel.
///
/// Stored on the VM record and injected into `env.agent.credentials` so
/// the agent can open inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredentials {
    /// Base64 of 32 random key bytes.
    pub key: String,
}

impl AgentCredentials {
    /// Generate fresh random credentials.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut key_bytes);
        Self {
            key: base64::engine::general_purpose::STANDARD.encode(key_bytes),
        }
    }
}

/// A provisioned VM, persisted once the cloud resource exists.
///
/// Every persisted record has a non-empty cloud `cid` and a unique
/// `agent_id`; a VM record is owned by at most one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,
    /// Cloud-assigned identifier, immutable once set.
    pub cid: String,
    pub agent_id: AgentId,
    pub deployment_id: DeploymentId,
    /// Opaque env map handed to the CPI (includes injected credentials).
    pub env: Value,
    pub credentials: Option<AgentCredentials>,
    pub created_at: DateTime<Utc>,
}

/// Field set for inserting a new VM record.
#[derive(Debug, Clone)]
pub struct NewVmRecord {
    pub cid: String,
    pub agent_id: AgentId,
    pub deployment_id: DeploymentId,
    pub env: Value,
    pub credentials: Option<AgentCredentials>,
}
