//! Protocol-agnostic client facade.

use crate::capability::Operation;
use crate::config::{ClientConfig, Protocol, RetryConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::retry::with_retry;
use crate::transport::{Adapter, Transport};
use crate::types::*;
use crate::validation::*;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Shared<T> {
    transport: T,
    retry: Option<RetryConfig>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

/// Unified client bound to exactly one transport.
///
/// Cloning is cheap; clones share the transport and the closed state.
pub struct ObjectStoreClient<T: Transport = Adapter> {
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
}

impl<T: Transport> Clone for ObjectStoreClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.clone(),
        }
    }
}

impl ObjectStoreClient<Adapter> {
    /// Validates `config` and connects the transport it selects.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = Adapter::connect(&config).await?;
        info!(
            protocol = %config.protocol,
            address = %config.address,
            retry = config.retry.as_ref().map_or(false, |r| r.enabled),
            "objstore client connected"
        );
        Ok(Self::from_transport(transport, config.retry))
    }

    /// Create a new REST client
    pub async fn rest(address: impl Into<String>) -> Result<Self> {
        Self::connect(ClientConfig::rest(address)).await
    }

    /// Create a new gRPC client
    pub async fn grpc(address: impl Into<String>) -> Result<Self> {
        Self::connect(ClientConfig::grpc(address)).await
    }

    /// Create a new QUIC/HTTP3 client, verifying the server against the
    /// platform roots.
    pub async fn quic(address: impl Into<String>) -> Result<Self> {
        Self::connect(ClientConfig::quic(address)).await
    }
}

impl<T: Transport> ObjectStoreClient<T> {
    /// Wraps an existing transport. `retry` follows the same rules as
    /// [`ClientConfig::retry`].
    pub fn from_transport(transport: T, retry: Option<RetryConfig>) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            cancel: shutdown.clone(),
            shared: Arc::new(Shared {
                transport,
                retry,
                shutdown,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A handle whose calls stop retrying once `token` is cancelled.
    ///
    /// Derive `token` from [`cancellation_token`](Self::cancellation_token)
    /// if closing the client should cancel it as well.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cancel: token,
        }
    }

    /// The token cancelled by [`close`](Self::close).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub fn protocol(&self) -> Protocol {
        self.shared.transport.protocol()
    }

    /// Operations the bound transport exposes.
    pub fn capabilities(&self) -> Vec<Operation> {
        self.protocol().supported_operations()
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.protocol().supports(operation)
    }

    /// The transport this client dispatches to.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::detailed(
                ErrorKind::ConnectionFailed,
                "client is closed",
            ));
        }
        Ok(())
    }

    async fn run<R, F, Fut>(&self, operation: Operation, call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let retry = if operation.is_idempotent() {
            self.shared.retry.as_ref()
        } else {
            None
        };
        debug!(operation = %operation, protocol = %self.protocol(), "dispatching");
        with_retry(retry, &self.cancel, call).await
    }

    /// Put an object into storage
    pub async fn put(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        metadata: Option<Metadata>,
    ) -> Result<PutResult> {
        self.ensure_open()?;
        validate_key(key)?;
        if let Some(metadata) = &metadata {
            validate_metadata(metadata)?;
        }

        let data = data.into();
        let transport = &self.shared.transport;
        self.run(Operation::Put, || {
            transport.put(key, data.clone(), metadata.as_ref())
        })
        .await
    }

    /// Get an object and its metadata
    pub async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
        self.ensure_open()?;
        validate_key(key)?;
        let transport = &self.shared.transport;
        self.run(Operation::Get, || transport.get(key)).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let transport = &self.shared.transport;
        self.run(Operation::Delete, || transport.delete(key)).await
    }

    /// List one page of objects
    pub async fn list(&self, options: ListOptions) -> Result<ListResult> {
        self.ensure_open()?;
        validate_list_options(&options)?;
        let transport = &self.shared.transport;
        self.run(Operation::List, || transport.list(&options)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        let transport = &self.shared.transport;
        self.run(Operation::Exists, || transport.exists(key)).await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Metadata> {
        self.ensure_open()?;
        validate_key(key)?;
        let transport = &self.shared.transport;
        self.run(Operation::GetMetadata, || transport.get_metadata(key))
            .await
    }

    pub async fn update_metadata(&self, key: &str, metadata: Metadata) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        validate_metadata(&metadata)?;
        let transport = &self.shared.transport;
        self.run(Operation::UpdateMetadata, || {
            transport.update_metadata(key, &metadata)
        })
        .await
    }

    /// Health check
    pub async fn health(&self) -> Result<HealthResponse> {
        self.ensure_open()?;
        let transport = &self.shared.transport;
        self.run(Operation::Health, || transport.health()).await
    }

    /// Move an object to another backend. Never retried.
    pub async fn archive(
        &self,
        key: &str,
        destination_type: &str,
        destination_settings: HashMap<String, String>,
    ) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        if destination_type.trim().is_empty() {
            return Err(Error::detailed(
                ErrorKind::InvalidConfig,
                "destination type cannot be empty",
            ));
        }
        let transport = &self.shared.transport;
        self.run(Operation::Archive, || {
            transport.archive(key, destination_type, &destination_settings)
        })
        .await
    }

    pub async fn add_policy(&self, policy: LifecyclePolicy) -> Result<()> {
        self.ensure_open()?;
        validate_lifecycle_policy(&policy)?;
        let transport = &self.shared.transport;
        self.run(Operation::AddPolicy, || transport.add_policy(&policy))
            .await
    }

    pub async fn remove_policy(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        validate_policy_id(id)?;
        let transport = &self.shared.transport;
        self.run(Operation::RemovePolicy, || transport.remove_policy(id))
            .await
    }

    /// Lifecycle policies, optionally filtered by key prefix
    pub async fn get_policies(&self, prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
        self.ensure_open()?;
        let transport = &self.shared.transport;
        self.run(Operation::GetPolicies, || transport.get_policies(prefix))
            .await
    }

    /// Run every lifecycle policy once. Never retried.
    pub async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
        self.ensure_open()?;
        let transport = &self.shared.transport;
        self.run(Operation::ApplyPolicies, || transport.apply_policies())
            .await
    }

    pub async fn add_replication_policy(&self, policy: ReplicationPolicy) -> Result<()> {
        self.ensure_open()?;
        validate_replication_policy(&policy)?;
        let transport = &self.shared.transport;
        self.run(Operation::AddReplicationPolicy, || {
            transport.add_replication_policy(&policy)
        })
        .await
    }

    pub async fn remove_replication_policy(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        validate_policy_id(id)?;
        let transport = &self.shared.transport;
        self.run(Operation::RemoveReplicationPolicy, || {
            transport.remove_replication_policy(id)
        })
        .await
    }

    pub async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
        self.ensure_open()?;
        let transport = &self.shared.transport;
        self.run(Operation::GetReplicationPolicies, || {
            transport.get_replication_policies()
        })
        .await
    }

    pub async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy> {
        self.ensure_open()?;
        validate_policy_id(id)?;
        let transport = &self.shared.transport;
        self.run(Operation::GetReplicationPolicy, || {
            transport.get_replication_policy(id)
        })
        .await
    }

    /// Start a replication run. Never retried.
    pub async fn trigger_replication(
        &self,
        options: TriggerReplicationOptions,
    ) -> Result<SyncResult> {
        self.ensure_open()?;
        validate_trigger_options(&options)?;
        let transport = &self.shared.transport;
        self.run(Operation::TriggerReplication, || {
            transport.trigger_replication(&options)
        })
        .await
    }

    pub async fn get_replication_status(&self, id: &str) -> Result<ReplicationStatus> {
        self.ensure_open()?;
        validate_policy_id(id)?;
        let transport = &self.shared.transport;
        self.run(Operation::GetReplicationStatus, || {
            transport.get_replication_status(id)
        })
        .await
    }

    /// Cancels pending retry waits and releases the transport.
    ///
    /// Later calls on this client or any clone fail with `ConnectionFailed`.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.cancel();
        info!(protocol = %self.protocol(), "closing objstore client");
        self.shared.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory transport that fails the first `failures` calls of every
    /// operation with a retryable error.
    #[derive(Default)]
    struct FlakyTransport {
        objects: Mutex<HashMap<String, (Bytes, Metadata)>>,
        failures: usize,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FlakyTransport {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }

        fn trip(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::detailed(
                    ErrorKind::ConnectionFailed,
                    format!("attempt {}", n),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn protocol(&self) -> Protocol {
            Protocol::Grpc
        }

        async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult> {
            self.trip()?;
            let metadata = metadata.cloned().unwrap_or_default();
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (data, metadata));
            Ok(PutResult {
                success: true,
                ..Default::default()
            })
        }

        async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
            self.trip()?;
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| Error::object_not_found(key))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.trip()?;
            self.objects
                .lock()
                .unwrap()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| Error::object_not_found(key))
        }

        async fn list(&self, _options: &ListOptions) -> Result<ListResult> {
            self.trip()?;
            Ok(ListResult::default())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.trip()?;
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        async fn get_metadata(&self, key: &str) -> Result<Metadata> {
            self.get(key).await.map(|(_, m)| m)
        }

        async fn update_metadata(&self, _key: &str, _metadata: &Metadata) -> Result<()> {
            self.trip()
        }

        async fn health(&self) -> Result<HealthResponse> {
            self.trip()?;
            Ok(HealthResponse {
                status: HealthStatus::Serving,
                message: None,
            })
        }

        async fn archive(&self, _: &str, _: &str, _: &HashMap<String, String>) -> Result<()> {
            self.trip()
        }

        async fn add_policy(&self, _policy: &LifecyclePolicy) -> Result<()> {
            self.trip()
        }

        async fn remove_policy(&self, _id: &str) -> Result<()> {
            self.trip()
        }

        async fn get_policies(&self, _prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
            self.trip()?;
            Ok(Vec::new())
        }

        async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
            self.trip()?;
            Ok(ApplyPoliciesResult::default())
        }

        async fn add_replication_policy(&self, _policy: &ReplicationPolicy) -> Result<()> {
            self.trip()
        }

        async fn remove_replication_policy(&self, _id: &str) -> Result<()> {
            self.trip()
        }

        async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
            self.trip()?;
            Ok(Vec::new())
        }

        async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy> {
            self.trip()?;
            Err(Error::detailed(ErrorKind::PolicyNotFound, id))
        }

        async fn trigger_replication(
            &self,
            _options: &TriggerReplicationOptions,
        ) -> Result<SyncResult> {
            self.trip()?;
            Ok(SyncResult::default())
        }

        async fn get_replication_status(&self, _id: &str) -> Result<ReplicationStatus> {
            self.trip()?;
            Ok(ReplicationStatus::default())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::enabled()
            .with_max_retries(max_retries)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    fn calls(client: &ObjectStoreClient<FlakyTransport>) -> usize {
        client.transport().calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_validation_precedes_transport() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::default(), None);

        assert!(client.get("").await.unwrap_err().is(ErrorKind::InvalidKey));
        assert!(client.put("  ", "x", None).await.unwrap_err().is(ErrorKind::InvalidKey));
        assert!(client
            .remove_policy("")
            .await
            .unwrap_err()
            .is(ErrorKind::InvalidPolicyId));
        assert!(client
            .update_metadata(
                "k",
                Metadata {
                    size: -1,
                    ..Default::default()
                }
            )
            .await
            .unwrap_err()
            .is(ErrorKind::InvalidMetadata));
        assert!(client
            .archive("k", "", HashMap::new())
            .await
            .unwrap_err()
            .is(ErrorKind::InvalidConfig));
        assert_eq!(calls(&client), 0);
    }

    #[tokio::test]
    async fn test_idempotent_operation_retries() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::failing(2), Some(fast_retry(3)));

        client.put("a.txt", "hello", None).await.unwrap();
        assert_eq!(calls(&client), 3);

        let (data, _) = client.get("a.txt").await.unwrap();
        assert_eq!(data, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_non_idempotent_operation_runs_once() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::failing(1), Some(fast_retry(3)));

        let err = client
            .trigger_replication(TriggerReplicationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::ConnectionFailed));
        assert_eq!(calls(&client), 1);
    }

    #[tokio::test]
    async fn test_without_retry_config_runs_once() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::failing(1), None);

        assert!(client.health().await.is_err());
        assert_eq!(calls(&client), 1);
    }

    #[tokio::test]
    async fn test_sentinel_errors_pass_through() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::default(), Some(fast_retry(3)));

        assert!(client.get("missing").await.unwrap_err().is(ErrorKind::ObjectNotFound));
        assert_eq!(calls(&client), 1);
        assert!(client
            .get_replication_policy("p")
            .await
            .unwrap_err()
            .is(ErrorKind::PolicyNotFound));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::default(), None);
        let clone = client.clone();
        let token = client.cancellation_token();

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.transport().closes.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());

        let err = clone.exists("a").await.unwrap_err();
        assert!(err.is(ErrorKind::ConnectionFailed));
        assert!(err.to_string().contains("client is closed"));
        assert_eq!(calls(&client), 0);
    }

    #[tokio::test]
    async fn test_caller_cancellation_stops_retries() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::failing(10), Some(fast_retry(5)));
        let token = client.cancellation_token().child_token();
        token.cancel();

        let err = client
            .with_cancellation(token)
            .get("a")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls(&client), 0);

        // The parent client is unaffected.
        assert!(client.get("a").await.is_err());
        assert_eq!(calls(&client), 6);
    }

    #[test]
    fn test_capabilities_follow_protocol() {
        let client = ObjectStoreClient::from_transport(FlakyTransport::default(), None);
        assert_eq!(client.protocol(), Protocol::Grpc);
        assert_eq!(client.capabilities().len(), Operation::ALL.len());
        assert!(client.supports(Operation::Archive));
    }
}
