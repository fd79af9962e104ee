use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Retries after the first attempt when none are configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Backoff ceiling for the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound for any single backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUIC_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire protocol a client is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rest,
    Grpc,
    Quic,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Rest => "rest",
            Protocol::Grpc => "grpc",
            Protocol::Quic => "quic",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" => Ok(Protocol::Rest),
            "grpc" => Ok(Protocol::Grpc),
            "quic" | "http3" => Ok(Protocol::Quic),
            other => Err(Error::detailed(ErrorKind::InvalidProtocol, other)),
        }
    }
}

/// TLS material shared by all transports.
///
/// QUIC always runs over TLS; for REST and gRPC, `use_tls` switches it on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub use_tls: bool,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Skip server certificate verification (testing only - INSECURE)
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Reads PEM material named by one of the path fields.
    pub(crate) fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
        std::fs::read(path)
            .map_err(|e| Error::Tls(format!("failed to read {} {}: {}", what, path.display(), e)))
    }
}

/// Retry policy for transient failures.
///
/// Disabled by default so a client without an explicit policy behaves
/// exactly as one that never retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    /// Zero falls back to [`DEFAULT_INITIAL_BACKOFF`].
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Zero falls back to [`DEFAULT_MAX_BACKOFF`].
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Sentinels treated as transient. Empty means the default set
    /// (connection failed, timeout, temporary failure).
    #[serde(skip)]
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Default policy with retries switched on.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_retryable_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    pub(crate) fn effective_initial_backoff(&self) -> Duration {
        if self.initial_backoff.is_zero() {
            DEFAULT_INITIAL_BACKOFF
        } else {
            self.initial_backoff
        }
    }

    pub(crate) fn effective_max_backoff(&self) -> Duration {
        if self.max_backoff.is_zero() {
            DEFAULT_MAX_BACKOFF
        } else {
            self.max_backoff
        }
    }

    pub(crate) fn effective_retryable_errors(&self) -> &[ErrorKind] {
        const DEFAULT_RETRYABLE: [ErrorKind; 3] = [
            ErrorKind::ConnectionFailed,
            ErrorKind::Timeout,
            ErrorKind::TemporaryFailure,
        ];
        if self.retryable_errors.is_empty() {
            &DEFAULT_RETRYABLE
        } else {
            &self.retryable_errors
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.effective_initial_backoff() > self.effective_max_backoff() {
            return Err(Error::detailed(
                ErrorKind::InvalidConfig,
                "retry initial_backoff must not exceed max_backoff",
            ));
        }
        Ok(())
    }
}

/// Connection and transport configuration for a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub protocol: Protocol,
    /// `host:port`; REST and gRPC also accept a full URL.
    pub address: String,
    pub tls: TlsConfig,
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// gRPC only; `None` keeps tonic's limit.
    pub max_recv_msg_size: Option<usize>,
    /// gRPC only; `None` keeps tonic's limit.
    pub max_send_msg_size: Option<usize>,
    /// QUIC only; concurrent streams per connection.
    pub max_streams: Option<u32>,
    pub retry: Option<RetryConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Rest,
            address: String::new(),
            tls: TlsConfig::default(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_recv_msg_size: None,
            max_send_msg_size: None,
            max_streams: None,
            retry: None,
        }
    }
}

impl ClientConfig {
    pub fn new(protocol: Protocol, address: impl Into<String>) -> Self {
        Self {
            protocol,
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn rest(address: impl Into<String>) -> Self {
        Self::new(Protocol::Rest, address)
    }

    pub fn grpc(address: impl Into<String>) -> Self {
        Self::new(Protocol::Grpc, address)
    }

    pub fn quic(address: impl Into<String>) -> Self {
        Self::new(Protocol::Quic, address)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Checks the invariants every transport relies on.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::detailed(
                ErrorKind::InvalidConfig,
                "address cannot be empty",
            ));
        }
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(Error::detailed(
                ErrorKind::InvalidConfig,
                "cert_file and key_file must be provided together",
            ));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Durations as integer milliseconds on the wire.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("rest".parse::<Protocol>().unwrap(), Protocol::Rest);
        assert_eq!("GRPC".parse::<Protocol>().unwrap(), Protocol::Grpc);
        assert_eq!(" quic ".parse::<Protocol>().unwrap(), Protocol::Quic);

        let err = "ftp".parse::<Protocol>().unwrap_err();
        assert!(err.is(ErrorKind::InvalidProtocol));
    }

    #[test]
    fn test_retry_disabled_by_default() {
        let retry = RetryConfig::default();
        assert!(!retry.enabled);
        assert_eq!(retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(retry.initial_backoff, DEFAULT_INITIAL_BACKOFF);
        assert_eq!(retry.max_backoff, DEFAULT_MAX_BACKOFF);
        assert!(ClientConfig::rest("localhost:8080").retry.is_none());
    }

    #[test]
    fn test_zero_backoff_falls_back_to_defaults() {
        let retry = RetryConfig::enabled().with_backoff(Duration::ZERO, Duration::ZERO);
        assert_eq!(retry.effective_initial_backoff(), DEFAULT_INITIAL_BACKOFF);
        assert_eq!(retry.effective_max_backoff(), DEFAULT_MAX_BACKOFF);
        assert_eq!(retry.effective_retryable_errors().len(), 3);
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let err = ClientConfig::grpc("  ").validate().unwrap_err();
        assert!(err.is(ErrorKind::InvalidConfig));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = ClientConfig::rest("localhost:8080").with_retry(
            RetryConfig::enabled()
                .with_backoff(Duration::from_secs(10), Duration::from_secs(1)),
        );
        assert!(config.validate().unwrap_err().is(ErrorKind::InvalidConfig));
    }

    #[test]
    fn test_validate_rejects_half_client_identity() {
        let config = ClientConfig::quic("localhost:4433").with_tls(TlsConfig {
            cert_file: Some("client.pem".into()),
            ..Default::default()
        });
        assert!(config.validate().unwrap_err().is(ErrorKind::InvalidConfig));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"protocol":"grpc","address":"localhost:50051","request_timeout":1500,
                "retry":{"enabled":true,"max_retries":5}}"#,
        )
        .unwrap();

        assert_eq!(config.protocol, Protocol::Grpc);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.connection_timeout, DEFAULT_CONNECTION_TIMEOUT);
        let retry = config.retry.unwrap();
        assert!(retry.enabled);
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_backoff, DEFAULT_INITIAL_BACKOFF);
    }
}
