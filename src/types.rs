use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata for an object in storage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Metadata {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub custom: HashMap<String, String>,
}

/// Information about a stored object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Outcome of a Put operation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PutResult {
    pub success: bool,
    pub message: Option<String>,
    pub etag: Option<String>,
}

/// Pagination and filtering for List
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_results: Option<i32>,
    pub continue_from: Option<String>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }
}

/// One page of a List operation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

impl HealthStatus {
    /// Lenient mapping of the status strings servers report.
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "healthy" | "serving" | "ok" => HealthStatus::Serving,
            "unhealthy" | "not_serving" | "notserving" => HealthStatus::NotServing,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Response from a Health check
#[derive(Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// Lifecycle policy for objects
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecyclePolicy {
    pub id: String,
    pub prefix: String,
    pub retention_seconds: i64,
    /// `delete` or `archive`
    pub action: String,
    pub destination_type: Option<String>,
    pub destination_settings: HashMap<String, String>,
}

/// Outcome of applying every lifecycle policy once
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplyPoliciesResult {
    pub policies_count: i32,
    pub objects_processed: i32,
    pub message: Option<String>,
}

/// Encryption configuration for a layer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub provider: String,
    pub default_key: String,
}

/// Encryption policy for all layers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncryptionPolicy {
    pub backend: Option<EncryptionConfig>,
    pub source: Option<EncryptionConfig>,
    pub destination: Option<EncryptionConfig>,
}

/// Replication mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Decrypt at the source, re-encrypt at the destination
    #[default]
    Transparent,
    /// Copy encrypted bytes verbatim
    Opaque,
}

/// Replication policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicationPolicy {
    pub id: String,
    pub source_backend: String,
    pub source_settings: HashMap<String, String>,
    pub source_prefix: String,
    pub destination_backend: String,
    pub destination_settings: HashMap<String, String>,
    pub check_interval_seconds: i64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub encryption: Option<EncryptionPolicy>,
    pub replication_mode: ReplicationMode,
}

/// Options for an on-demand replication run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerReplicationOptions {
    /// `None` runs every policy.
    pub policy_id: Option<String>,
    pub parallel: bool,
    pub worker_count: i32,
}

impl TriggerReplicationOptions {
    pub fn for_policy(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: Some(policy_id.into()),
            ..Default::default()
        }
    }
}

/// Sync result for replication
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncResult {
    pub policy_id: String,
    pub synced: i32,
    pub deleted: i32,
    pub failed: i32,
    pub bytes_total: i64,
    pub duration_ms: i64,
    pub errors: Vec<String>,
}

/// Replication status and metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicationStatus {
    pub policy_id: String,
    pub source_backend: String,
    pub destination_backend: String,
    pub enabled: bool,
    pub total_objects_synced: i64,
    pub total_objects_deleted: i64,
    pub total_bytes_synced: i64,
    pub total_errors: i64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub average_sync_duration_ms: i64,
    pub sync_count: i64,
}
