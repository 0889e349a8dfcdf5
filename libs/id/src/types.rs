//! Typed ID definitions for orchestrator resources.
//!
//! Each record ID type has a unique prefix identifying the resource type
//! and is ULID-based for sortability. Agent identities are UUIDv4.

use crate::define_id;

// =============================================================================
// Deployment Model
// =============================================================================

define_id!(DeploymentId, "dep");
define_id!(InstanceId, "inst");
define_id!(VmId, "vm");

// =============================================================================
// Messaging
// =============================================================================

define_id!(RequestId, "req");
define_id!(SessionId, "ses");

// =============================================================================
// Agent Identity
// =============================================================================

/// Identity of the bootstrap agent inside a VM.
///
/// Agent IDs are bare UUIDv4 values: the agent receives its identity via
/// the VM env and echoes it as its bus subject, so the canonical form is
/// the plain hyphenated UUID with no prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId(uuid::Uuid);

impl AgentId {
    /// Creates a new random (v4) agent ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates an agent ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> uuid::Uuid {
        self.0
    }

    /// Parses an agent ID from its hyphenated UUID form.
    pub fn parse(s: &str) -> Result<Self, crate::IdError> {
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }
        let uuid = s
            .parse::<uuid::Uuid>()
            .map_err(|e| crate::IdError::InvalidUuid(e.to_string()))?;
        Ok(Self(uuid))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for AgentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for AgentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_id_roundtrip() {
        let id = VmId::new();
        let s = id.to_string();
        let parsed: VmId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_vm_id_prefix() {
        let id = VmId::new();
        assert!(id.to_string().starts_with("vm_"));
    }

    #[test]
    fn test_vm_id_invalid_prefix() {
        let result: Result<VmId, _> = "inst_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_vm_id_missing_separator() {
        let result: Result<VmId, _> = "vm01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::MissingSeparator));
    }

    #[test]
    fn test_vm_id_empty() {
        let result: Result<VmId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_vm_id_invalid_ulid() {
        let result: Result<VmId, _> = "vm_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_request_id_json_roundtrip() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_request_id_sortable() {
        let id1 = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = RequestId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_agent_id_is_plain_uuid() {
        let id = AgentId::new();
        let s = id.to_string();
        assert!(!s.contains('_'));
        assert_eq!(s.len(), 36);
        let parsed: AgentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_agent_id_rejects_garbage() {
        let result: Result<AgentId, _> = "not-a-uuid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUuid(_)));
    }

    #[test]
    fn test_agent_ids_distinct() {
        let ids: Vec<AgentId> = (0..64).map(|_| AgentId::new()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_agent_id_json_roundtrip() {
        let id = AgentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = vec![
            DeploymentId::PREFIX,
            InstanceId::PREFIX,
            VmId::PREFIX,
            RequestId::PREFIX,
            SessionId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
