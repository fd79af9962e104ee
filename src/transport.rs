//! The seam between the client facade and the three wire adapters.

use crate::config::{ClientConfig, Protocol};
use crate::error::Result;
use crate::grpc::GrpcClient;
use crate::quic::QuicClient;
use crate::rest::RestClient;
use crate::types::*;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Operation surface every wire adapter exposes.
///
/// Adapters perform no input validation and no retries; both belong to the
/// facade. An operation outside the adapter's capability set must fail with
/// `NotSupported` before any network I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult>;

    async fn get(&self, key: &str) -> Result<(Bytes, Metadata)>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, options: &ListOptions) -> Result<ListResult>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get_metadata(&self, key: &str) -> Result<Metadata>;

    async fn update_metadata(&self, key: &str, metadata: &Metadata) -> Result<()>;

    async fn health(&self) -> Result<HealthResponse>;

    async fn archive(
        &self,
        key: &str,
        destination_type: &str,
        destination_settings: &HashMap<String, String>,
    ) -> Result<()>;

    async fn add_policy(&self, policy: &LifecyclePolicy) -> Result<()>;

    async fn remove_policy(&self, id: &str) -> Result<()>;

    async fn get_policies(&self, prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>>;

    async fn apply_policies(&self) -> Result<ApplyPoliciesResult>;

    async fn add_replication_policy(&self, policy: &ReplicationPolicy) -> Result<()>;

    async fn remove_replication_policy(&self, id: &str) -> Result<()>;

    async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>>;

    async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy>;

    async fn trigger_replication(&self, options: &TriggerReplicationOptions)
        -> Result<SyncResult>;

    async fn get_replication_status(&self, id: &str) -> Result<ReplicationStatus>;

    /// Releases connections. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// The closed set of wire adapters a client can be bound to.
pub enum Adapter {
    Rest(RestClient),
    Grpc(GrpcClient),
    Quic(QuicClient),
}

impl Adapter {
    /// Builds the adapter selected by `config.protocol`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        match config.protocol {
            Protocol::Rest => Ok(Adapter::Rest(RestClient::new(config)?)),
            Protocol::Grpc => Ok(Adapter::Grpc(GrpcClient::new(config)?)),
            Protocol::Quic => Ok(Adapter::Quic(QuicClient::new(config).await?)),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $client:ident => $call:expr) => {
        match $self {
            Adapter::Rest($client) => $call,
            Adapter::Grpc($client) => $call,
            Adapter::Quic($client) => $call,
        }
    };
}

#[async_trait]
impl Transport for Adapter {
    fn protocol(&self) -> Protocol {
        match self {
            Adapter::Rest(_) => Protocol::Rest,
            Adapter::Grpc(_) => Protocol::Grpc,
            Adapter::Quic(_) => Protocol::Quic,
        }
    }

    async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult> {
        dispatch!(self, c => c.put(key, data, metadata).await)
    }

    async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
        dispatch!(self, c => c.get(key).await)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        dispatch!(self, c => c.delete(key).await)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        dispatch!(self, c => c.list(options).await)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        dispatch!(self, c => c.exists(key).await)
    }

    async fn get_metadata(&self, key: &str) -> Result<Metadata> {
        dispatch!(self, c => c.get_metadata(key).await)
    }

    async fn update_metadata(&self, key: &str, metadata: &Metadata) -> Result<()> {
        dispatch!(self, c => c.update_metadata(key, metadata).await)
    }

    async fn health(&self) -> Result<HealthResponse> {
        dispatch!(self, c => c.health().await)
    }

    async fn archive(
        &self,
        key: &str,
        destination_type: &str,
        destination_settings: &HashMap<String, String>,
    ) -> Result<()> {
        dispatch!(self, c => c.archive(key, destination_type, destination_settings).await)
    }

    async fn add_policy(&self, policy: &LifecyclePolicy) -> Result<()> {
        dispatch!(self, c => c.add_policy(policy).await)
    }

    async fn remove_policy(&self, id: &str) -> Result<()> {
        dispatch!(self, c => c.remove_policy(id).await)
    }

    async fn get_policies(&self, prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
        dispatch!(self, c => c.get_policies(prefix).await)
    }

    async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
        dispatch!(self, c => c.apply_policies().await)
    }

    async fn add_replication_policy(&self, policy: &ReplicationPolicy) -> Result<()> {
        dispatch!(self, c => c.add_replication_policy(policy).await)
    }

    async fn remove_replication_policy(&self, id: &str) -> Result<()> {
        dispatch!(self, c => c.remove_replication_policy(id).await)
    }

    async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
        dispatch!(self, c => c.get_replication_policies().await)
    }

    async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy> {
        dispatch!(self, c => c.get_replication_policy(id).await)
    }

    async fn trigger_replication(
        &self,
        options: &TriggerReplicationOptions,
    ) -> Result<SyncResult> {
        dispatch!(self, c => c.trigger_replication(options).await)
    }

    async fn get_replication_status(&self, id: &str) -> Result<ReplicationStatus> {
        dispatch!(self, c => c.get_replication_status(id).await)
    }

    async fn close(&self) -> Result<()> {
        dispatch!(self, c => c.close().await)
    }
}
