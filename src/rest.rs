use crate::capability::Operation;
use crate::config::{ClientConfig, Protocol, TlsConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::types::*;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the JSON-encoded custom metadata map.
pub const METADATA_HEADER: &str = "X-Object-Metadata";

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// REST client for go-objstore
pub struct RestClient {
    base_url: String,
    client: RwLock<Option<Client>>,
}

#[derive(Debug, Default, Deserialize)]
struct PutReply {
    message: Option<String>,
    data: Option<PutReplyData>,
}

#[derive(Debug, Default, Deserialize)]
struct PutReplyData {
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestObject {
    key: String,
    #[serde(default)]
    size: i64,
    modified: Option<String>,
    etag: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RestListReply {
    #[serde(default)]
    objects: Vec<RestObject>,
    #[serde(default)]
    common_prefixes: Vec<String>,
    next_token: Option<String>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct RestHealthReply {
    status: String,
    version: Option<String>,
}

impl RestClient {
    /// Create a new REST client from `config`.
    ///
    /// No connection is opened until the first request.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = base_url(config)?;

        let mut builder = Client::builder()
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);
        if !config.request_timeout.is_zero() {
            builder = builder.timeout(config.request_timeout);
        }
        if !config.connection_timeout.is_zero() {
            builder = builder.connect_timeout(config.connection_timeout);
        }

        let tls = &config.tls;
        if let Some(ca_file) = &tls.ca_file {
            let pem = TlsConfig::read_pem(ca_file, "CA file")?;
            let ca = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }
        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let cert = TlsConfig::read_pem(cert_file, "client certificate")?;
            let key = TlsConfig::read_pem(key_file, "client key")?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| Error::Tls(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }
        if tls.insecure_skip_verify {
            warn!("TLS certificate verification is disabled for the REST transport");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::detailed(ErrorKind::InvalidConfig, e.to_string()))?;

        Ok(Self {
            base_url,
            client: RwLock::new(Some(client)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> Result<Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::detailed(ErrorKind::ConnectionFailed, "client is closed"))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/objects/{}", self.base_url, urlencoding::encode(key))
    }

    fn unsupported<T>(operation: Operation) -> Result<T> {
        Err(Error::not_supported(Protocol::Rest, operation))
    }
}

#[async_trait]
impl Transport for RestClient {
    fn protocol(&self) -> Protocol {
        Protocol::Rest
    }

    async fn put(&self, key: &str, data: Bytes, metadata: Option<&Metadata>) -> Result<PutResult> {
        debug!(operation = "put", key, size = data.len(), "rest request");
        let op = Operation::Put;

        let content_type = metadata
            .and_then(|m| m.content_type.as_deref())
            .unwrap_or("application/octet-stream");
        let mut request = self
            .http()?
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type);

        if let Some(meta) = metadata {
            if let Some(encoding) = &meta.content_encoding {
                request = request.header(CONTENT_ENCODING, encoding);
            }
            if !meta.custom.is_empty() {
                request = request.header(METADATA_HEADER, serde_json::to_string(&meta.custom)?);
            }
        }

        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, key, status));
        }

        let header_etag = header_string(response.headers(), ETAG.as_str());
        let body = response.bytes().await.map_err(|e| Error::http(op, e))?;
        // Older servers reply with an empty body.
        let reply: PutReply = serde_json::from_slice(&body).unwrap_or_default();

        Ok(PutResult {
            success: true,
            message: reply.message.filter(|m| !m.is_empty()),
            etag: header_etag.or_else(|| reply.data.and_then(|d| d.etag)),
        })
    }

    async fn get(&self, key: &str) -> Result<(Bytes, Metadata)> {
        debug!(operation = "get", key, "rest request");
        let op = Operation::Get;

        let response = self
            .http()?
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, key, status));
        }

        let mut metadata = metadata_from_headers(response.headers());
        let data = response.bytes().await.map_err(|e| Error::http(op, e))?;
        if metadata.size == 0 {
            metadata.size = data.len() as i64;
        }

        Ok((data, metadata))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!(operation = "delete", key, "rest request");
        let op = Operation::Delete;

        let response = self
            .http()?
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, key, status));
        }
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        debug!(operation = "list", prefix = ?options.prefix, "rest request");
        let op = Operation::List;

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(prefix) = options.prefix.as_ref().filter(|p| !p.is_empty()) {
            query.push(("prefix", prefix.clone()));
        }
        if let Some(delimiter) = options.delimiter.as_ref().filter(|d| !d.is_empty()) {
            query.push(("delimiter", delimiter.clone()));
        }
        if let Some(limit) = options.max_results.filter(|n| *n > 0) {
            query.push(("limit", limit.to_string()));
        }
        if let Some(token) = options.continue_from.as_ref().filter(|t| !t.is_empty()) {
            query.push(("token", token.clone()));
        }

        let response = self
            .http()?
            .get(format!("{}/objects", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, "", status));
        }

        let reply: RestListReply = response.json().await.map_err(|e| Error::http(op, e))?;

        Ok(ListResult {
            objects: reply
                .objects
                .into_iter()
                .map(|obj| ObjectInfo {
                    key: obj.key,
                    metadata: Metadata {
                        size: obj.size,
                        last_modified: obj.modified.as_deref().and_then(parse_rfc3339),
                        etag: obj.etag,
                        custom: obj.metadata,
                        ..Default::default()
                    },
                })
                .collect(),
            common_prefixes: reply.common_prefixes,
            next_token: reply.next_token.filter(|t| !t.is_empty()),
            truncated: reply.truncated,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        debug!(operation = "exists", key, "rest request");
        let op = Operation::Exists;

        let response = self
            .http()?
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(status_error(op, key, status))
        }
    }

    async fn get_metadata(&self, key: &str) -> Result<Metadata> {
        debug!(operation = "get_metadata", key, "rest request");
        let op = Operation::GetMetadata;

        let response = self
            .http()?
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, key, status));
        }

        Ok(metadata_from_headers(response.headers()))
    }

    async fn update_metadata(&self, _key: &str, _metadata: &Metadata) -> Result<()> {
        Self::unsupported(Operation::UpdateMetadata)
    }

    async fn health(&self) -> Result<HealthResponse> {
        let op = Operation::Health;

        let response = self
            .http()?
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| Error::http(op, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(op, "", status));
        }

        let reply: RestHealthReply = response.json().await.map_err(|e| Error::http(op, e))?;

        Ok(HealthResponse {
            status: HealthStatus::parse(&reply.status),
            message: reply.version,
        })
    }

    async fn archive(
        &self,
        _key: &str,
        _destination_type: &str,
        _destination_settings: &HashMap<String, String>,
    ) -> Result<()> {
        Self::unsupported(Operation::Archive)
    }

    async fn add_policy(&self, _policy: &LifecyclePolicy) -> Result<()> {
        Self::unsupported(Operation::AddPolicy)
    }

    async fn remove_policy(&self, _id: &str) -> Result<()> {
        Self::unsupported(Operation::RemovePolicy)
    }

    async fn get_policies(&self, _prefix: Option<&str>) -> Result<Vec<LifecyclePolicy>> {
        Self::unsupported(Operation::GetPolicies)
    }

    async fn apply_policies(&self) -> Result<ApplyPoliciesResult> {
        Self::unsupported(Operation::ApplyPolicies)
    }

    async fn add_replication_policy(&self, _policy: &ReplicationPolicy) -> Result<()> {
        Self::unsupported(Operation::AddReplicationPolicy)
    }

    async fn remove_replication_policy(&self, _id: &str) -> Result<()> {
        Self::unsupported(Operation::RemoveReplicationPolicy)
    }

    async fn get_replication_policies(&self) -> Result<Vec<ReplicationPolicy>> {
        Self::unsupported(Operation::GetReplicationPolicies)
    }

    async fn get_replication_policy(&self, _id: &str) -> Result<ReplicationPolicy> {
        Self::unsupported(Operation::GetReplicationPolicy)
    }

    async fn trigger_replication(
        &self,
        _options: &TriggerReplicationOptions,
    ) -> Result<SyncResult> {
        Self::unsupported(Operation::TriggerReplication)
    }

    async fn get_replication_status(&self, _id: &str) -> Result<ReplicationStatus> {
        Self::unsupported(Operation::GetReplicationStatus)
    }

    async fn close(&self) -> Result<()> {
        if self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!(base_url = %self.base_url, "rest transport closed");
        }
        Ok(())
    }
}

fn base_url(config: &ClientConfig) -> Result<String> {
    let address = config.address.trim().trim_end_matches('/');
    let base = if address.contains("://") {
        address.to_string()
    } else {
        let scheme = if config.tls.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, address)
    };
    url::Url::parse(&base)?;
    Ok(base)
}

fn status_error(operation: Operation, key: &str, status: StatusCode) -> Error {
    if status == StatusCode::NOT_FOUND && !key.is_empty() {
        return Error::object_not_found(key);
    }
    Error::detailed(
        ErrorKind::OperationFailed,
        format!("{} failed with status {}", operation, status),
    )
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let custom = header_string(headers, METADATA_HEADER)
        .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
        .unwrap_or_default();

    Metadata {
        content_type: header_string(headers, CONTENT_TYPE.as_str()),
        content_encoding: header_string(headers, CONTENT_ENCODING.as_str()),
        size: header_string(headers, CONTENT_LENGTH.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0),
        last_modified: header_string(headers, LAST_MODIFIED.as_str())
            .and_then(|s| DateTime::parse_from_rfc2822(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        etag: header_string(headers, ETAG.as_str()),
        custom,
    }
}
