use crate::capability::Operation;
use crate::config::{ClientConfig, Protocol, TlsConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::types::*;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};

// Include the generated protobuf code
pub mod pb {
    include!("proto/objstore.v1.rs");
}

use pb::object_store_client::ObjectStoreClient as RpcClient;

/// gRPC client for go-objstore
pub struct GrpcClient {
    endpoint: String,
    client: RwLock<Option<RpcClient<Channel>>>,
}

impl GrpcClient {
    /// Create a new gRPC client.
    ///
    /// The channel connects lazily on the first call, so this must run inside
    /// a tokio runtime but performs no network I/O itself.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.tls.insecure_skip_verify {
            return Err(Error::detailed(
                ErrorKind::InvalidConfig,
                "insecure_skip_verify is not available for grpc; supply ca_file instead",
            ));
        }

        let uri = endpoint_uri(config);
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| Error::detailed(ErrorKind::InvalidConfig, e.to_string()))?;
        if !config.connection_timeout.is_zero() {
            endpoint = endpoint.connect_timeout(config.connection_timeout);
        }
        if !config.request_timeout.is_zero() {
            endpoint = endpoint.timeout(config.request_timeout);
        }
        if config.tls.use_tls {
            endpoint = endpoint
                .tls_config(tls_config(&config.tls)?)
                .map_err(|e| Error::Tls(e.to_string()))?;
        }

        let mut client = RpcClient::new(endpoint.connect_lazy());
        if let Some(limit) = config.max_recv_msg_size {
            client = client.max_decoding_message_size(limit);
        }
        if let Some(limit) = config.max_send_msg_size {
            client = client.max_encoding_message_size(limit);
        }

        Ok(Self {
            endpoint: uri,
            client: RwLock::new(Some(client)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rpc(&self) -> Result<RpcClient<Channel>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::detailed(ErrorKind::ConnectionFailed, "client is closed"))
    }
}

#[async_trait]
impl Transport for GrpcClient {
    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult> {
        debug!(operation = "put", key, size = data.len(), "grpc request");
        let request = pb::PutRequest {
            key: key.to_string(),
            data: data.to_vec(),
            metadata: metadata.map(metadata_to_pb),
        };

        let response = self
            .rpc()?
            .put(request)
            .await
            .map_err(|s| Error::grpc(Operation::Put, s))?
            .into_inner();

        Ok(PutResult {
            success: response.success,
            message: non_empty(response.message),
            etag: non_empty(response.etag),
        })
    }

    async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
        debug!(operation = "get", key, "grpc request");
        let stream = self
            .rpc()?
            .get(pb::GetRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::Get, s))?
            .into_inner();

        collect_object_stream(stream).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!(operation = "delete", key, "grpc request");
        let response = self
            .rpc()?
            .delete(pb::DeleteRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::Delete, s))?
            .into_inner();

        check_success(Operation::Delete, response.success, response.message)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        debug!(operation = "list", prefix = ?options.prefix, "grpc request");
        let request = pb::ListRequest {
            prefix: options.prefix.clone().unwrap_or_default(),
            delimiter: options.delimiter.clone().unwrap_or_default(),
            max_results: options.max_results.unwrap_or_default(),
            continue_from: options.continue_from.clone().unwrap_or_default(),
        };

        let response = self
            .rpc()?
            .list(request)
            .await
            .map_err(|s| Error::grpc(Operation::List, s))?
            .into_inner();

        Ok(ListResult {
            objects: response
                .objects
                .into_iter()
                .map(|obj| ObjectInfo {
                    key: obj.key,
                    metadata: obj.metadata.map(metadata_from_pb).unwrap_or_default(),
                })
                .collect(),
            common_prefixes: response.common_prefixes,
            next_token: non_empty(response.next_token),
            truncated: response.truncated,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        debug!(operation = "exists", key, "grpc request");
        let response = self
            .rpc()?
            .exists(pb::ExistsRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::Exists, s))?
            .into_inner();

        Ok(response.exists)
    }

    async fn get_metadata(&self, key: &str) -> Result<Metadata> {
        debug!(operation = "get_metadata", key, "grpc request");
        let response = self
            .rpc()?
            .get_metadata(pb::GetMetadataRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::GetMetadata, s))?
            .into_inner();

        check_success(Operation::GetMetadata, response.success, response.message)?;
        Ok(response.metadata.map(metadata_from_pb).unwrap_or_default())
    }

    async fn update_metadata(&self, key: &str, metadata: &Metadata) -> Result<()> {
        debug!(operation = "update_metadata", key, "grpc request");
        let response = self
            .rpc()?
            .update_metadata(pb::UpdateMetadataRequest {
                key: key.to_string(),
                metadata: Some(metadata_to_pb(metadata)),
            })
            .await
            .map_err(|s| Error::grpc(Operation::UpdateMetadata, s))?
            .into_inner();

        check_success(Operation::UpdateMetadata, response.success, response.message)
    }

    async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .rpc()?
            .health(pb::HealthRequest::default())
            .await
            .map_err(|s| Error::grpc(Operation::Health, s))?
            .into_inner();

        Ok(HealthResponse {
            status: match pb::health_response::Status::try_from(response.status) {
                Ok(pb::health_response::Status::Serving) => HealthStatus::Serving,
                Ok(pb::health_response::Status::NotServing) => HealthStatus::NotServing,
                _ => HealthStatus::Unknown,
            },
            message: non_empty(response.message),
        })
    }

    async fn archive(
        &self,
        key: &str,
        destination_type: &str,
        destination_settings: &HashMap<String, String>,
    ) -> Result<()> {
        debug!(operation = "archive", key, destination_type, "grpc request");
        let response = self
            .rpc()?
            .archive(pb::ArchiveRequest {
                key: key.to_string(),
                destination_type: destination_type.to_string(),
                destination_settings: destination_settings.clone(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::Archive, s))?
            .into_inner();

        check_success(Operation::Archive, response.success, response.message)
    }

    async fn add_policy(&self, policy: &LifecyclePolicy) -> Result<()> {
        debug!(operation = "add_policy", policy_id = %policy.id, "grpc request");
        let response = self
            .rpc()?
            .add_policy(pb::AddPolicyRequest {
                policy: Some(lifecycle_policy_to_pb(policy)),
            })
            .await
            .map_err(|s| Error::grpc(Operation::AddPolicy, s))?
            .into_inner();

        check_success(Operation::AddPolicy, response.success, response.message)
    }

    async fn remove_policy(&self, id: &str) -> Result<()> {
        let response = self
            .rpc()?
            .remove_policy(pb::RemovePolicyRequest { id: id.to_string() })
            .await
            .map_err(|s| Error::grpc(Operation::RemovePolicy, s))?
            .into_inner();

        check_success(Operation::RemovePolicy, response.success, response.message)
    }

    async fn get_policies(&self, prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
        let response = self
            .rpc()?
            .get_policies(pb::GetPoliciesRequest {
                prefix: prefix.unwrap_or_default().to_string(),
            })
            .await
            .map_err(|s| Error::grpc(Operation::GetPolicies, s))?
            .into_inner();

        check_success(Operation::GetPolicies, response.success, response.message)?;
        Ok(response
            .policies
            .into_iter()
            .map(lifecycle_policy_from_pb)
            .collect())
    }

    async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
        let response = self
            .rpc()?
            .apply_policies(pb::ApplyPoliciesRequest {})
            .await
            .map_err(|s| Error::grpc(Operation::ApplyPolicies, s))?
            .into_inner();

        if !response.success {
            return Err(Error::operation_failed(
                Operation::ApplyPolicies,
                response.message,
            ));
        }

        Ok(ApplyPoliciesResult {
            policies_count: response.policies_count,
            objects_processed: response.objects_processed,
            message: non_empty(response.message),
        })
    }

    async fn add_replication_policy(&self, policy: &ReplicationPolicy) -> Result<()> {
        debug!(operation = "add_replication_policy", policy_id = %policy.id, "grpc request");
        let response = self
            .rpc()?
            .add_replication_policy(pb::AddReplicationPolicyRequest {
                policy: Some(replication_policy_to_pb(policy)),
            })
            .await
            .map_err(|s| Error::grpc(Operation::AddReplicationPolicy, s))?
            .into_inner();

        check_success(
            Operation::AddReplicationPolicy,
            response.success,
            response.message,
        )
    }

    async fn remove_replication_policy(&self, id: &str) -> Result<()> {
        let response = self
            .rpc()?
            .remove_replication_policy(pb::RemoveReplicationPolicyRequest { id: id.to_string() })
            .await
            .map_err(|s| Error::grpc(Operation::RemoveReplicationPolicy, s))?
            .into_inner();

        check_success(
            Operation::RemoveReplicationPolicy,
            response.success,
            response.message,
        )
    }

    async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
        let response = self
            .rpc()?
            .get_replication_policies(pb::GetReplicationPoliciesRequest {})
            .await
            .map_err(|s| Error::grpc(Operation::GetReplicationPolicies, s))?
            .into_inner();

        Ok(response
            .policies
            .into_iter()
            .map(replication_policy_from_pb)
            .collect())
    }

    async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy> {
        let response = self
            .rpc()?
            .get_replication_policy(pb::GetReplicationPolicyRequest { id: id.to_string() })
            .await
            .map_err(|s| Error::grpc(Operation::GetReplicationPolicy, s))?
            .into_inner();

        response
            .policy
            .map(replication_policy_from_pb)
            .ok_or_else(|| Error::detailed(ErrorKind::PolicyNotFound, id))
    }

    async fn trigger_replication(
        &self,
        options: &TriggerReplicationOptions,
    ) -> Result<SyncResult> {
        debug!(operation = "trigger_replication", policy_id = ?options.policy_id, "grpc request");
        let response = self
            .rpc()?
            .trigger_replication(pb::TriggerReplicationRequest {
                policy_id: options.policy_id.clone().unwrap_or_default(),
                parallel: options.parallel,
                worker_count: options.worker_count,
            })
            .await
            .map_err(|s| Error::grpc(Operation::TriggerReplication, s))?
            .into_inner();

        check_success(
            Operation::TriggerReplication,
            response.success,
            response.message,
        )?;
        response
            .result
            .map(sync_result_from_pb)
            .ok_or_else(|| Error::detailed(ErrorKind::InvalidData, "reply carried no sync result"))
    }

    async fn get_replication_status(&self, id: &str) -> Result<ReplicationStatus> {
        let response = self
            .rpc()?
            .get_replication_status(pb::GetReplicationStatusRequest { id: id.to_string() })
            .await
            .map_err(|s| Error::grpc(Operation::GetReplicationStatus, s))?
            .into_inner();

        check_success(
            Operation::GetReplicationStatus,
            response.success,
            response.message,
        )?;
        response
            .status
            .map(replication_status_from_pb)
            .ok_or_else(|| {
                Error::detailed(ErrorKind::InvalidData, "reply carried no replication status")
            })
    }

    async fn close(&self) -> Result<()> {
        if self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!(endpoint = %self.endpoint, "grpc transport closed");
        }
        Ok(())
    }
}

/// Drains a server-streamed Get into one payload.
///
/// Metadata is taken from the first chunk that carries it. Any receive error
/// aborts the read and discards what was accumulated.
pub async fn collect_object_stream<S>(mut stream: S) -> Result<(Bytes, Metadata)>
where
    S: Stream<Item = std::result::Result<pb::GetResponse, tonic::Status>> + Unpin,
{
    let mut data = BytesMut::new();
    let mut metadata: Option<Metadata> = None;
    let mut chunks = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|s| Error::grpc(Operation::Get, s))?;
        chunks += 1;

        if metadata.is_none() {
            metadata = chunk.metadata.map(metadata_from_pb);
        }
        data.extend_from_slice(&chunk.data);
    }

    if chunks == 0 {
        return Err(Error::operation_failed(
            Operation::Get,
            "get stream closed before first chunk",
        ));
    }

    Ok((data.freeze(), metadata.unwrap_or_default()))
}

fn endpoint_uri(config: &ClientConfig) -> String {
    let address = config.address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        let scheme = if config.tls.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, address)
    }
}

fn tls_config(tls: &TlsConfig) -> Result<ClientTlsConfig> {
    let mut config = ClientTlsConfig::new();
    if let Some(ca_file) = &tls.ca_file {
        config = config.ca_certificate(Certificate::from_pem(TlsConfig::read_pem(
            ca_file, "CA file",
        )?));
    }
    if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
        config = config.identity(Identity::from_pem(
            TlsConfig::read_pem(cert_file, "client certificate")?,
            TlsConfig::read_pem(key_file, "client key")?,
        ));
    }
    Ok(config)
}

fn check_success(operation: Operation, success: bool, message: String) -> Result<()> {
    if success {
        Ok(())
    } else {
        Err(Error::operation_failed(operation, message))
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// Helper functions for converting between protobuf and SDK types

fn timestamp_to_pb(dt: &DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn timestamp_from_pb(ts: prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
}

pub(crate) fn metadata_to_pb(m: &Metadata) -> pb::Metadata {
    pb::Metadata {
        content_type: m.content_type.clone().unwrap_or_default(),
        content_encoding: m.content_encoding.clone().unwrap_or_default(),
        size: m.size,
        last_modified: m.last_modified.as_ref().map(timestamp_to_pb),
        etag: m.etag.clone().unwrap_or_default(),
        custom: m.custom.clone(),
    }
}

pub(crate) fn metadata_from_pb(m: pb::Metadata) -> Metadata {
    Metadata {
        content_type: non_empty(m.content_type),
        content_encoding: non_empty(m.content_encoding),
        size: m.size,
        last_modified: m.last_modified.and_then(timestamp_from_pb),
        etag: non_empty(m.etag),
        custom: m.custom,
    }
}

fn lifecycle_policy_to_pb(p: &LifecyclePolicy) -> pb::LifecyclePolicy {
    pb::LifecyclePolicy {
        id: p.id.clone(),
        prefix: p.prefix.clone(),
        retention_seconds: p.retention_seconds,
        action: p.action.clone(),
        destination_type: p.destination_type.clone().unwrap_or_default(),
        destination_settings: p.destination_settings.clone(),
    }
}

fn lifecycle_policy_from_pb(p: pb::LifecyclePolicy) -> LifecyclePolicy {
    LifecyclePolicy {
        id: p.id,
        prefix: p.prefix,
        retention_seconds: p.retention_seconds,
        action: p.action,
        destination_type: non_empty(p.destination_type),
        destination_settings: p.destination_settings,
    }
}

fn encryption_config_to_pb(c: &EncryptionConfig) -> pb::EncryptionConfig {
    pb::EncryptionConfig {
        enabled: c.enabled,
        provider: c.provider.clone(),
        default_key: c.default_key.clone(),
    }
}

fn encryption_config_from_pb(c: pb::EncryptionConfig) -> EncryptionConfig {
    EncryptionConfig {
        enabled: c.enabled,
        provider: c.provider,
        default_key: c.default_key,
    }
}

fn replication_policy_to_pb(p: &ReplicationPolicy) -> pb::ReplicationPolicy {
    pb::ReplicationPolicy {
        id: p.id.clone(),
        source_backend: p.source_backend.clone(),
        source_settings: p.source_settings.clone(),
        source_prefix: p.source_prefix.clone(),
        destination_backend: p.destination_backend.clone(),
        destination_settings: p.destination_settings.clone(),
        check_interval_seconds: p.check_interval_seconds,
        last_sync_time: p.last_sync_time.as_ref().map(timestamp_to_pb),
        enabled: p.enabled,
        encryption: p.encryption.as_ref().map(|e| pb::EncryptionPolicy {
            backend: e.backend.as_ref().map(encryption_config_to_pb),
            source: e.source.as_ref().map(encryption_config_to_pb),
            destination: e.destination.as_ref().map(encryption_config_to_pb),
        }),
        replication_mode: match p.replication_mode {
            ReplicationMode::Transparent => pb::ReplicationMode::Transparent as i32,
            ReplicationMode::Opaque => pb::ReplicationMode::Opaque as i32,
        },
    }
}

fn replication_policy_from_pb(p: pb::ReplicationPolicy) -> ReplicationPolicy {
    ReplicationPolicy {
        id: p.id,
        source_backend: p.source_backend,
        source_settings: p.source_settings,
        source_prefix: p.source_prefix,
        destination_backend: p.destination_backend,
        destination_settings: p.destination_settings,
        check_interval_seconds: p.check_interval_seconds,
        last_sync_time: p.last_sync_time.and_then(timestamp_from_pb),
        enabled: p.enabled,
        encryption: p.encryption.map(|e| EncryptionPolicy {
            backend: e.backend.map(encryption_config_from_pb),
            source: e.source.map(encryption_config_from_pb),
            destination: e.destination.map(encryption_config_from_pb),
        }),
        replication_mode: if p.replication_mode == pb::ReplicationMode::Opaque as i32 {
            ReplicationMode::Opaque
        } else {
            ReplicationMode::Transparent
        },
    }
}

fn sync_result_from_pb(r: pb::SyncResult) -> SyncResult {
    SyncResult {
        policy_id: r.policy_id,
        synced: r.synced,
        deleted: r.deleted,
        failed: r.failed,
        bytes_total: r.bytes_total,
        duration_ms: r.duration_ms,
        errors: r.errors,
    }
}

fn replication_status_from_pb(s: pb::ReplicationStatus) -> ReplicationStatus {
    ReplicationStatus {
        policy_id: s.policy_id,
        source_backend: s.source_backend,
        destination_backend: s.destination_backend,
        enabled: s.enabled,
        total_objects_synced: s.total_objects_synced,
        total_objects_deleted: s.total_objects_deleted,
        total_bytes_synced: s.total_bytes_synced,
        total_errors: s.total_errors,
        last_sync_time: s.last_sync_time.and_then(timestamp_from_pb),
        average_sync_duration_ms: s.average_sync_duration_ms,
        sync_count: s.sync_count,
    }
}
