//! QUIC/HTTP3 transport.
//!
//! Requests are JSON envelopes under `/api/v1/` carried over HTTP/3. Object
//! payloads travel base64-encoded inside the envelope. The HTTP/3 plumbing
//! sits behind [`Exchange`] so the envelope layer can be exercised without a
//! live QUIC peer.

use crate::capability::Operation;
use crate::config::{ClientConfig, Protocol, TlsConfig, DEFAULT_QUIC_IDLE_TIMEOUT};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::types::*;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use h3::client::SendRequest;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Status and body of one HTTP/3 request.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// One request/response round trip to the server.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// `path` is relative to the server root and may carry a query string.
    async fn round_trip(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ExchangeResponse>;

    async fn close(&self);
}

/// [`Exchange`] over a single multiplexed quinn connection.
///
/// The connection is opened on first use and re-established after a
/// transport failure.
pub struct H3Exchange {
    endpoint: quinn::Endpoint,
    server_addr: SocketAddr,
    server_name: String,
    authority: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    sender: Mutex<Option<SendRequest<h3_quinn::OpenStreams, Bytes>>>,
    closed: AtomicBool,
}

impl H3Exchange {
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        let authority = config.address.trim().to_string();
        let server_name = host_of(&authority).to_string();

        let server_addr = tokio::net::lookup_host(authority.as_str())
            .await
            .map_err(|e| Error::detailed(ErrorKind::ConnectionFailed, format!("{}: {}", authority, e)))?
            .next()
            .ok_or_else(|| {
                Error::detailed(
                    ErrorKind::ConnectionFailed,
                    format!("{} did not resolve to any address", authority),
                )
            })?;

        let mut crypto = rustls_config(&config.tls)?;
        crypto.alpn_protocols = vec![b"h3".to_vec()];

        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(
            quinn::IdleTimeout::try_from(DEFAULT_QUIC_IDLE_TIMEOUT)
                .map_err(|e| Error::detailed(ErrorKind::InvalidConfig, e.to_string()))?,
        ));
        transport.keep_alive_interval(Some(DEFAULT_QUIC_IDLE_TIMEOUT / 2));
        if let Some(streams) = config.max_streams {
            transport.max_concurrent_bidi_streams(quinn::VarInt::from_u32(streams));
            transport.max_concurrent_uni_streams(quinn::VarInt::from_u32(streams));
        }

        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(transport));

        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let mut endpoint = quinn::Endpoint::client(bind_addr)
            .map_err(|e| Error::detailed(ErrorKind::ConnectionFailed, e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            server_addr,
            server_name,
            authority,
            connect_timeout: non_zero_or(config.connection_timeout, crate::config::DEFAULT_CONNECTION_TIMEOUT),
            request_timeout: non_zero_or(config.request_timeout, crate::config::DEFAULT_REQUEST_TIMEOUT),
            sender: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    async fn sender(&self) -> Result<SendRequest<h3_quinn::OpenStreams, Bytes>> {
        let mut guard = self.sender.lock().await;
        if let Some(sender) = guard.as_ref() {
            return Ok(sender.clone());
        }

        let connecting = self.endpoint.connect(self.server_addr, &self.server_name)?;
        let connection = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| Error::detailed(ErrorKind::Timeout, "QUIC handshake timed out"))??;
        info!(server = %self.authority, "quic connection established");

        let (mut driver, sender) = h3::client::new(h3_quinn::Connection::new(connection)).await?;
        tokio::spawn(async move {
            if let Err(e) = futures::future::poll_fn(|cx| driver.poll_close(cx)).await {
                debug!(error = %e, "h3 connection closed");
            }
        });

        *guard = Some(sender.clone());
        Ok(sender)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Bytes>) -> Result<ExchangeResponse> {
        let mut sender = self.sender().await?;

        let mut builder = http::Request::builder()
            .method(method)
            .uri(format!("https://{}{}", self.authority, path));
        if body.is_some() {
            builder = builder.header(http::header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(())
            .map_err(|e| Error::detailed(ErrorKind::InvalidConfig, e.to_string()))?;

        let mut stream = sender.send_request(request).await?;
        if let Some(body) = body {
            stream.send_data(body).await?;
        }
        stream.finish().await?;

        let response = stream.recv_response().await?;
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.recv_data().await? {
            data.put(chunk);
        }

        Ok(ExchangeResponse {
            status: response.status(),
            body: data.freeze(),
        })
    }
}

#[async_trait]
impl Exchange for H3Exchange {
    async fn round_trip(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ExchangeResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::detailed(ErrorKind::ConnectionFailed, "client is closed"));
        }

        evict_on_failure(
            &self.sender,
            self.request_timeout,
            self.send(method, path, body),
        )
        .await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().await.take();
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"client closed");
        info!(server = %self.authority, "quic transport closed");
    }
}

/// Runs `request` under `limit`. A failed or overdue request empties
/// `cache`, so the next call opens a fresh connection.
async fn evict_on_failure<C, T, F>(
    cache: &Mutex<Option<C>>,
    limit: Duration,
    request: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let outcome = match tokio::time::timeout(limit, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::detailed(
            ErrorKind::Timeout,
            format!("no response within {:?}", limit),
        )),
    };
    if outcome.is_err() && cache.lock().await.take().is_some() {
        debug!("dropped cached quic connection");
    }
    outcome
}

/// QUIC/HTTP3 client for go-objstore
pub struct QuicClient<E: Exchange = H3Exchange> {
    exchange: E,
}

impl QuicClient<H3Exchange> {
    /// Create a new QUIC/HTTP3 client.
    ///
    /// TLS is always on. Server certificates are checked against `ca_file`
    /// when given, otherwise against the platform roots.
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            exchange: H3Exchange::new(config).await?,
        })
    }
}

#[derive(Serialize)]
struct PutEnvelope<'a> {
    key: &'a str,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

#[derive(Deserialize)]
struct ObjectEnvelope {
    #[serde(default)]
    data: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Deserialize)]
struct ExistsEnvelope {
    exists: bool,
}

#[derive(Serialize)]
struct UpdateMetadataEnvelope<'a> {
    key: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct HealthEnvelope {
    #[serde(default)]
    status: String,
    message: Option<String>,
}

#[derive(Serialize)]
struct ArchiveEnvelope<'a> {
    key: &'a str,
    destination_type: &'a str,
    destination_settings: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct PoliciesEnvelope<T> {
    #[serde(default = "Vec::new")]
    policies: Vec<T>,
}

#[derive(Deserialize)]
struct ApplyEnvelope {
    success: Option<bool>,
    #[serde(flatten)]
    result: ApplyPoliciesResult,
}

impl<E: Exchange> QuicClient<E> {
    /// Wraps an already configured exchange.
    pub fn with_exchange(exchange: E) -> Self {
        Self { exchange }
    }

    /// Runs one request and returns the body of a 2xx reply.
    ///
    /// `subject` is the key or policy ID a 404 refers to; empty when the
    /// request has none.
    async fn request<B: Serialize + ?Sized>(
        &self,
        operation: Operation,
        method: Method,
        path: &str,
        body: Option<&B>,
        subject: &str,
    ) -> Result<Bytes> {
        debug!(operation = %operation, path, "quic request");
        let body = body.map(|b| serde_json::to_vec(b)).transpose()?.map(Bytes::from);
        let response = self
            .exchange
            .round_trip(method, &format!("/api/v1/{}", path), body)
            .await?;

        if response.status.is_success() {
            return Ok(response.body);
        }
        if response.status == StatusCode::NOT_FOUND && !subject.is_empty() {
            return Err(if operation.targets_policy() {
                Error::detailed(ErrorKind::PolicyNotFound, subject)
            } else {
                Error::object_not_found(subject)
            });
        }
        Err(Error::detailed(
            ErrorKind::OperationFailed,
            format!("{} failed with status {}", operation, response.status),
        ))
    }

    async fn request_json<B, T>(
        &self,
        operation: Operation,
        method: Method,
        path: &str,
        body: Option<&B>,
        subject: &str,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.request(operation, method, path, body, subject).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

const NO_BODY: Option<&()> = None;

#[async_trait]
impl<E: Exchange> Transport for QuicClient<E> {
    fn protocol(&self) -> Protocol {
        Protocol::Quic
    }

    async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult> {
        let envelope = PutEnvelope {
            key,
            data: BASE64.encode(&data),
            metadata,
        };
        let body = self
            .request(Operation::Put, Method::POST, "put", Some(&envelope), key)
            .await?;

        if body.is_empty() {
            return Ok(PutResult {
                success: true,
                ..Default::default()
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
        let path = format!("get?key={}", urlencoding::encode(key));
        let envelope: ObjectEnvelope = self
            .request_json(Operation::Get, Method::GET, &path, NO_BODY, key)
            .await?;

        let data = BASE64.decode(envelope.data.as_bytes()).map_err(|e| {
            Error::detailed(ErrorKind::InvalidData, format!("object payload: {}", e))
        })?;
        Ok((Bytes::from(data), envelope.metadata))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = format!("delete?key={}", urlencoding::encode(key));
        self.request(Operation::Delete, Method::DELETE, &path, NO_BODY, key)
            .await?;
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        self.request_json(Operation::List, Method::POST, "list", Some(options), "")
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = format!("exists?key={}", urlencoding::encode(key));
        let envelope: ExistsEnvelope = self
            .request_json(Operation::Exists, Method::GET, &path, NO_BODY, "")
            .await?;
        Ok(envelope.exists)
    }

    async fn get_metadata(&self, key: &str) -> Result<Metadata> {
        let path = format!("metadata?key={}", urlencoding::encode(key));
        self.request_json(Operation::GetMetadata, Method::GET, &path, NO_BODY, key)
            .await
    }

    async fn update_metadata(&self, key: &str, metadata: &Metadata) -> Result<()> {
        let envelope = UpdateMetadataEnvelope { key, metadata };
        self.request(
            Operation::UpdateMetadata,
            Method::PUT,
            "metadata",
            Some(&envelope),
            key,
        )
        .await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthResponse> {
        let envelope: HealthEnvelope = self
            .request_json(Operation::Health, Method::GET, "health", NO_BODY, "")
            .await?;
        Ok(HealthResponse {
            status: HealthStatus::parse(&envelope.status),
            message: envelope.message.filter(|m| !m.is_empty()),
        })
    }

    async fn archive(
        &self,
        key: &str,
        destination_type: &str,
        destination_settings: &HashMap<String, String>,
    ) -> Result<()> {
        let envelope = ArchiveEnvelope {
            key,
            destination_type,
            destination_settings,
        };
        self.request(Operation::Archive, Method::POST, "archive", Some(&envelope), key)
            .await?;
        Ok(())
    }

    async fn add_policy(&self, policy: &LifecyclePolicy) -> Result<()> {
        self.request(Operation::AddPolicy, Method::POST, "policies", Some(policy), "")
            .await?;
        Ok(())
    }

    async fn remove_policy(&self, id: &str) -> Result<()> {
        let path = format!("policies/{}", urlencoding::encode(id));
        self.request(Operation::RemovePolicy, Method::DELETE, &path, NO_BODY, id)
            .await?;
        Ok(())
    }

    async fn get_policies(&self, prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
        let path = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => format!("policies?prefix={}", urlencoding::encode(prefix)),
            None => "policies".to_string(),
        };
        let envelope: PoliciesEnvelope<LifecyclePolicy> = self
            .request_json(Operation::GetPolicies, Method::GET, &path, NO_BODY, "")
            .await?;
        Ok(envelope.policies)
    }

    async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
        let envelope: ApplyEnvelope = self
            .request_json(
                Operation::ApplyPolicies,
                Method::POST,
                "policies/apply",
                NO_BODY,
                "",
            )
            .await?;

        if envelope.success == Some(false) {
            return Err(Error::operation_failed(
                Operation::ApplyPolicies,
                envelope.result.message.unwrap_or_default(),
            ));
        }
        Ok(envelope.result)
    }

    async fn add_replication_policy(&self, policy: &ReplicationPolicy) -> Result<()> {
        self.request(
            Operation::AddReplicationPolicy,
            Method::POST,
            "replication/policies",
            Some(policy),
            "",
        )
        .await?;
        Ok(())
    }

    async fn remove_replication_policy(&self, id: &str) -> Result<()> {
        let path = format!("replication/policies/{}", urlencoding::encode(id));
        self.request(
            Operation::RemoveReplicationPolicy,
            Method::DELETE,
            &path,
            NO_BODY,
            id,
        )
        .await?;
        Ok(())
    }

    async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
        let envelope: PoliciesEnvelope<ReplicationPolicy> = self
            .request_json(
                Operation::GetReplicationPolicies,
                Method::GET,
                "replication/policies",
                NO_BODY,
                "",
            )
            .await?;
        Ok(envelope.policies)
    }

    async fn get_replication_policy(&self, id: &str) -> Result<ReplicationPolicy> {
        let path = format!("replication/policies/{}", urlencoding::encode(id));
        self.request_json(
            Operation::GetReplicationPolicy,
            Method::GET,
            &path,
            NO_BODY,
            id,
        )
        .await
    }

    async fn trigger_replication(
        &self,
        options: &TriggerReplicationOptions,
    ) -> Result<SyncResult> {
        self.request_json(
            Operation::TriggerReplication,
            Method::POST,
            "replication/trigger",
            Some(options),
            options.policy_id.as_deref().unwrap_or_default(),
        )
        .await
    }

    async fn get_replication_status(&self, id: &str) -> Result<ReplicationStatus> {
        let path = format!("replication/status/{}", urlencoding::encode(id));
        self.request_json(
            Operation::GetReplicationStatus,
            Method::GET,
            &path,
            NO_BODY,
            id,
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.exchange.close().await;
        Ok(())
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(authority: &str) -> &str {
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => host,
        _ => authority,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

fn rustls_config(tls: &TlsConfig) -> Result<rustls::ClientConfig> {
    let verifier: Arc<dyn rustls::client::ServerCertVerifier> = if tls.insecure_skip_verify {
        warn!("TLS certificate verification is disabled for the QUIC transport");
        Arc::new(SkipServerVerification)
    } else {
        Arc::new(rustls::client::WebPkiVerifier::new(root_store(tls)?, None))
    };

    let builder = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(verifier);

    match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => builder
            .with_client_auth_cert(load_certs(cert_file)?, load_key(key_file)?)
            .map_err(|e| Error::Tls(format!("invalid client identity: {}", e))),
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn root_store(tls: &TlsConfig) -> Result<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();

    match &tls.ca_file {
        Some(ca_file) => {
            for cert in load_certs(ca_file)? {
                roots
                    .add(&cert)
                    .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs()
                .map_err(|e| Error::Tls(format!("failed to load platform roots: {}", e)))?;
            let der: Vec<Vec<u8>> = native.into_iter().map(|cert| cert.0).collect();
            roots.add_parsable_certificates(&der);
        }
    }

    if roots.is_empty() {
        return Err(Error::Tls("no trusted root certificates available".to_string()));
    }
    Ok(roots)
}

fn load_certs(path: &std::path::Path) -> Result<Vec<rustls::Certificate>> {
    let pem = TlsConfig::read_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

fn load_key(path: &std::path::Path) -> Result<rustls::PrivateKey> {
    let pem = TlsConfig::read_pem(path, "private key")?;
    let items = rustls_pemfile::read_all(&mut pem.as_slice())
        .map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;

    items
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::ECKey(key) => Some(rustls::PrivateKey(key)),
            _ => None,
        })
        .ok_or_else(|| Error::Tls(format!("{}: no private key found", path.display())))
}

// Accepts any server certificate. Only reachable through
// `insecure_skip_verify`.
struct SkipServerVerification;

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;

    type Recorded = (Method, String, Option<Bytes>);

    #[derive(Default)]
    struct ScriptedExchange {
        replies: std::sync::Mutex<VecDeque<(StatusCode, String)>>,
        requests: std::sync::Mutex<Vec<Recorded>>,
    }

    impl ScriptedExchange {
        fn replying(replies: &[(u16, &str)]) -> Self {
            let exchange = Self::default();
            exchange.replies.lock().unwrap().extend(
                replies
                    .iter()
                    .map(|(s, b)| (StatusCode::from_u16(*s).unwrap(), b.to_string())),
            );
            exchange
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn round_trip(
            &self,
            method: Method,
            path: &str,
            body: Option<Bytes>,
        ) -> Result<ExchangeResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((method, path.to_string(), body));
            let (status, body) = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            Ok(ExchangeResponse {
                status,
                body: Bytes::from(body),
            })
        }

        async fn close(&self) {}
    }

    fn recorded(client: &QuicClient<ScriptedExchange>) -> Vec<Recorded> {
        client.exchange.requests.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_put_encodes_payload() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(
            200,
            r#"{"success":true,"etag":"e1"}"#,
        )]));

        let result = client
            .put("docs/a.txt", Bytes::from("hello"), None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.etag.as_deref(), Some("e1"));

        let requests = recorded(&client);
        assert_eq!(requests[0].0, Method::POST);
        assert_eq!(requests[0].1, "/api/v1/put");
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].2.as_ref().unwrap()).unwrap();
        assert_eq!(body["key"], "docs/a.txt");
        assert_eq!(body["data"], "aGVsbG8=");
        assert!(body.get("metadata").is_none());
    }

    #[tokio::test]
    async fn test_get_decodes_payload() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(
            200,
            r#"{"data":"aGVsbG8gd29ybGQ=","metadata":{"content_type":"text/plain","size":11}}"#,
        )]));

        let (data, metadata) = client.get("a b").await.unwrap();
        assert_eq!(data, Bytes::from("hello world"));
        assert_eq!(metadata.size, 11);
        assert_eq!(recorded(&client)[0].1, "/api/v1/get?key=a%20b");
    }

    #[tokio::test]
    async fn test_get_undecodable_payload() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(
            200,
            r#"{"data":"***not base64***"}"#,
        )]));

        let err = client.get("a").await.unwrap_err();
        assert!(err.is(ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn test_get_malformed_envelope() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(200, "<html>")]));

        let err = client.get("a").await.unwrap_err();
        assert!(err.is(ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn test_not_found_mapping() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[
            (404, ""),
            (404, ""),
            (404, ""),
        ]));

        assert!(client.get("missing").await.unwrap_err().is(ErrorKind::ObjectNotFound));
        assert!(client.delete("missing").await.unwrap_err().is(ErrorKind::ObjectNotFound));
        assert!(client
            .get_replication_policy("nope")
            .await
            .unwrap_err()
            .is(ErrorKind::PolicyNotFound));
    }

    #[tokio::test]
    async fn test_server_error_embeds_status() {
        let client =
            QuicClient::with_exchange(ScriptedExchange::replying(&[(503, "overloaded")]));

        let err = client.list(&ListOptions::default()).await.unwrap_err();
        assert!(err.is(ErrorKind::OperationFailed));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_exists_and_health() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[
            (200, r#"{"exists":false}"#),
            (200, r#"{"status":"SERVING","message":"ok"}"#),
        ]));

        assert!(!client.exists("k").await.unwrap());
        let health = client.health().await.unwrap();
        assert_eq!(health.status, HealthStatus::Serving);
        assert_eq!(health.message.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_policy_paths() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[
            (201, ""),
            (200, r#"{"policies":[{"id":"p1","prefix":"logs/","retention_seconds":60,"action":"delete"}]}"#),
            (200, r#"{"success":true,"policies_count":1,"objects_processed":4}"#),
            (200, ""),
        ]));

        let policy = LifecyclePolicy {
            id: "p1".to_string(),
            prefix: "logs/".to_string(),
            retention_seconds: 60,
            action: "delete".to_string(),
            ..Default::default()
        };
        client.add_policy(&policy).await.unwrap();
        assert_eq!(client.get_policies(Some("logs/")).await.unwrap(), vec![policy]);
        assert_eq!(client.apply_policies().await.unwrap().objects_processed, 4);
        client.remove_policy("p1").await.unwrap();

        let paths: Vec<String> = recorded(&client).into_iter().map(|r| r.1).collect();
        assert_eq!(
            paths,
            vec![
                "/api/v1/policies",
                "/api/v1/policies?prefix=logs%2F",
                "/api/v1/policies/apply",
                "/api/v1/policies/p1",
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_policies_failure_flag() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(
            200,
            r#"{"success":false,"message":"engine busy"}"#,
        )]));

        let err = client.apply_policies().await.unwrap_err();
        assert!(err.is(ErrorKind::OperationFailed));
        assert!(err.to_string().contains("engine busy"));
    }

    #[tokio::test]
    async fn test_trigger_replication() {
        let client = QuicClient::with_exchange(ScriptedExchange::replying(&[(
            200,
            r#"{"policy_id":"sync","synced":3,"bytes_total":42}"#,
        )]));

        let result = client
            .trigger_replication(&TriggerReplicationOptions::for_policy("sync"))
            .await
            .unwrap();
        assert_eq!(result.synced, 3);
        assert_eq!(result.bytes_total, 42);
        assert_eq!(recorded(&client)[0].1, "/api/v1/replication/trigger");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_request_drops_cached_connection() {
        let cache = Mutex::new(Some("conn-1"));

        let err = evict_on_failure(
            &cache,
            Duration::from_secs(5),
            std::future::pending::<Result<()>>(),
        )
        .await
        .unwrap_err();

        assert!(err.is(ErrorKind::Timeout));
        assert!(err.to_string().contains("no response within 5s"));
        assert!(cache.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_request_drops_cached_connection() {
        let cache = Mutex::new(Some("conn-1"));

        let err = evict_on_failure(&cache, Duration::from_secs(5), async {
            Err::<(), _>(Error::H3("stream reset".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.is(ErrorKind::ConnectionFailed));
        assert!(cache.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_answered_request_keeps_cached_connection() {
        let cache = Mutex::new(Some("conn-1"));

        let value = evict_on_failure(&cache, Duration::from_secs(5), async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(*cache.lock().await, Some("conn-1"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("localhost:4433"), "localhost");
        assert_eq!(host_of("10.0.0.1:4433"), "10.0.0.1");
        assert_eq!(host_of("[::1]:4433"), "::1");
        assert_eq!(host_of("objects.example.com"), "objects.example.com");
    }

    #[test]
    fn test_ca_file_without_certificates_is_rejected() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        writeln!(ca, "not a certificate").unwrap();

        let tls = TlsConfig {
            ca_file: Some(ca.path().to_path_buf()),
            ..Default::default()
        };
        let err = rustls_config(&tls).unwrap_err();
        assert!(err.is(ErrorKind::InvalidConfig));
    }

    #[test]
    fn test_insecure_verifier_needs_no_roots() {
        let tls = TlsConfig {
            insecure_skip_verify: true,
            ..Default::default()
        };
        assert!(rustls_config(&tls).is_ok());
    }
}
