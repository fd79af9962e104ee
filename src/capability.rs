//! Static capability table.
//!
//! Not every transport exposes the whole operation surface. The gaps are
//! declared here so callers can query them up front instead of discovering
//! them by trial.

use crate::config::Protocol;
use std::fmt;

/// Every operation of the client surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Get,
    Delete,
    List,
    Exists,
    GetMetadata,
    UpdateMetadata,
    Health,
    Archive,
    AddPolicy,
    RemovePolicy,
    GetPolicies,
    ApplyPolicies,
    AddReplicationPolicy,
    RemoveReplicationPolicy,
    GetReplicationPolicies,
    GetReplicationPolicy,
    TriggerReplication,
    GetReplicationStatus,
}

impl Operation {
    pub const ALL: [Operation; 19] = [
        Operation::Put,
        Operation::Get,
        Operation::Delete,
        Operation::List,
        Operation::Exists,
        Operation::GetMetadata,
        Operation::UpdateMetadata,
        Operation::Health,
        Operation::Archive,
        Operation::AddPolicy,
        Operation::RemovePolicy,
        Operation::GetPolicies,
        Operation::ApplyPolicies,
        Operation::AddReplicationPolicy,
        Operation::RemoveReplicationPolicy,
        Operation::GetReplicationPolicies,
        Operation::GetReplicationPolicy,
        Operation::TriggerReplication,
        Operation::GetReplicationStatus,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Exists => "exists",
            Operation::GetMetadata => "get metadata",
            Operation::UpdateMetadata => "update metadata",
            Operation::Health => "health",
            Operation::Archive => "archive",
            Operation::AddPolicy => "add policy",
            Operation::RemovePolicy => "remove policy",
            Operation::GetPolicies => "get policies",
            Operation::ApplyPolicies => "apply policies",
            Operation::AddReplicationPolicy => "add replication policy",
            Operation::RemoveReplicationPolicy => "remove replication policy",
            Operation::GetReplicationPolicies => "get replication policies",
            Operation::GetReplicationPolicy => "get replication policy",
            Operation::TriggerReplication => "trigger replication",
            Operation::GetReplicationStatus => "get replication status",
        }
    }

    /// Whether re-sending the request after an ambiguous failure leaves the
    /// server in the same state. Only these operations go through the retry
    /// engine.
    pub const fn is_idempotent(self) -> bool {
        !matches!(
            self,
            Operation::Archive | Operation::ApplyPolicies | Operation::TriggerReplication
        )
    }

    /// Operations whose "not found" means a missing policy rather than a
    /// missing object.
    pub const fn targets_policy(self) -> bool {
        matches!(
            self,
            Operation::AddPolicy
                | Operation::RemovePolicy
                | Operation::GetPolicies
                | Operation::ApplyPolicies
                | Operation::AddReplicationPolicy
                | Operation::RemoveReplicationPolicy
                | Operation::GetReplicationPolicies
                | Operation::GetReplicationPolicy
                | Operation::TriggerReplication
                | Operation::GetReplicationStatus
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Protocol {
    /// Whether this transport exposes `operation`.
    pub const fn supports(self, operation: Operation) -> bool {
        match self {
            // Plain HTTP has no partial metadata update and no policy or
            // archive endpoints.
            Protocol::Rest => !matches!(
                operation,
                Operation::UpdateMetadata
                    | Operation::Archive
                    | Operation::AddPolicy
                    | Operation::RemovePolicy
                    | Operation::GetPolicies
                    | Operation::ApplyPolicies
                    | Operation::AddReplicationPolicy
                    | Operation::RemoveReplicationPolicy
                    | Operation::GetReplicationPolicies
                    | Operation::GetReplicationPolicy
                    | Operation::TriggerReplication
                    | Operation::GetReplicationStatus
            ),
            Protocol::Grpc | Protocol::Quic => true,
        }
    }

    pub fn supported_operations(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }

    pub fn unsupported_operations(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| !self.supports(*op))
            .collect()
    }
}
