//! Local input checks run before any network I/O.

use crate::error::{Error, ErrorKind, Result};
use crate::types::{
    LifecyclePolicy, ListOptions, Metadata, ReplicationPolicy, TriggerReplicationOptions,
};

pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::Sentinel(ErrorKind::InvalidKey));
    }
    Ok(())
}

pub fn validate_policy_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Sentinel(ErrorKind::InvalidPolicyId));
    }
    Ok(())
}

pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.size < 0 {
        return Err(Error::detailed(
            ErrorKind::InvalidMetadata,
            "size cannot be negative",
        ));
    }
    if metadata.custom.keys().any(|k| k.trim().is_empty()) {
        return Err(Error::detailed(
            ErrorKind::InvalidMetadata,
            "custom metadata keys cannot be empty",
        ));
    }
    Ok(())
}

pub fn validate_lifecycle_policy(policy: &LifecyclePolicy) -> Result<()> {
    validate_policy_id(&policy.id)?;
    if policy.retention_seconds < 0 {
        return Err(Error::detailed(
            ErrorKind::InvalidPolicy,
            "retention cannot be negative",
        ));
    }
    if policy.action.trim().is_empty() {
        return Err(Error::detailed(
            ErrorKind::InvalidPolicy,
            "action cannot be empty",
        ));
    }
    Ok(())
}

pub fn validate_replication_policy(policy: &ReplicationPolicy) -> Result<()> {
    validate_policy_id(&policy.id)?;
    if policy.check_interval_seconds < 0 {
        return Err(Error::detailed(
            ErrorKind::InvalidPolicy,
            "check interval cannot be negative",
        ));
    }
    if policy.source_backend.trim().is_empty() || policy.destination_backend.trim().is_empty() {
        return Err(Error::detailed(
            ErrorKind::InvalidPolicy,
            "source and destination backends are required",
        ));
    }
    Ok(())
}

pub fn validate_list_options(options: &ListOptions) -> Result<()> {
    match options.max_results {
        Some(n) if n < 0 => Err(Error::detailed(
            ErrorKind::InvalidConfig,
            "max_results cannot be negative",
        )),
        _ => Ok(()),
    }
}

pub fn validate_trigger_options(options: &TriggerReplicationOptions) -> Result<()> {
    if let Some(id) = &options.policy_id {
        validate_policy_id(id)?;
    }
    if options.worker_count < 0 {
        return Err(Error::detailed(
            ErrorKind::InvalidConfig,
            "worker_count cannot be negative",
        ));
    }
    Ok(())
}
