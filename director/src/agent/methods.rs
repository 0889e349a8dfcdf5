//! The closed set of agent RPC methods and their call policies.

use std::time::Duration;

/// Every method the director may invoke on an agent.
///
/// The list is fixed at this boundary; new agent capabilities require a
/// new variant and a policy decision here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMethod {
    Ping,
    GetState,
    GetTask,
    CancelTask,
    Apply,
    Start,
    Stop,
    Prepare,
    Drain,
    CompilePackage,
    FetchLogs,
    ListDisk,
    MountDisk,
    UnmountDisk,
    MigrateDisk,
    AssociateDisks,
    RunScript,
    RunErrand,
    UpdateSettings,
    UploadBlob,
    SyncDns,
    CancelSyncDns,
    DeleteArpEntries,
}

impl AgentMethod {
    /// Name on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentMethod::Ping => "ping",
            AgentMethod::GetState => "get_state",
            AgentMethod::GetTask => "get_task",
            AgentMethod::CancelTask => "cancel_task",
            AgentMethod::Apply => "apply",
            AgentMethod::Start => "start",
            AgentMethod::Stop => "stop",
            AgentMethod::Prepare => "prepare",
            AgentMethod::Drain => "drain",
            AgentMethod::CompilePackage => "compile_package",
            AgentMethod::FetchLogs => "fetch_logs",
            AgentMethod::ListDisk => "list_disk",
            AgentMethod::MountDisk => "mount_disk",
            AgentMethod::UnmountDisk => "unmount_disk",
            AgentMethod::MigrateDisk => "migrate_disk",
            AgentMethod::AssociateDisks => "associate_disks",
            AgentMethod::RunScript => "run_script",
            AgentMethod::RunErrand => "run_errand",
            AgentMethod::UpdateSettings => "update_settings",
            AgentMethod::UploadBlob => "upload_blob",
            AgentMethod::SyncDns => "sync_dns",
            AgentMethod::CancelSyncDns => "cancel_sync_dns",
            AgentMethod::DeleteArpEntries => "delete_arp_entries",
        }
    }

    /// How many times a timed-out request is re-issued (fresh
    /// correlation id and deadline each time). Only timeouts retry.
    pub fn retries(&self) -> u32 {
        match self {
            AgentMethod::GetState => 2,
            AgentMethod::GetTask => 2,
            AgentMethod::UploadBlob => 3,
            _ => 0,
        }
    }

    /// Per-request timeout override, where the default does not apply.
    pub fn timeout_override(&self) -> Option<Duration> {
        match self {
            AgentMethod::SyncDns => Some(Duration::from_secs(10)),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_budgets() {
        assert_eq!(AgentMethod::GetState.retries(), 2);
        assert_eq!(AgentMethod::GetTask.retries(), 2);
        assert_eq!(AgentMethod::UploadBlob.retries(), 3);
        assert_eq!(AgentMethod::Apply.retries(), 0);
        assert_eq!(AgentMethod::Ping.retries(), 0);
    }

    #[test]
    fn test_sync_dns_timeout_override() {
        assert_eq!(
            AgentMethod::SyncDns.timeout_override(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(AgentMethod::Apply.timeout_override(), None);
    }
}
