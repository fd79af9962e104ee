use crate::capability::Operation;
use crate::config::Protocol;
use std::fmt;
use thiserror::Error;

/// Result type alias for the objstore client
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of sentinel errors.
///
/// Every [`Error`] that can be attributed to one of these kinds reports it
/// through [`Error::kind`], so callers can branch on failures without
/// parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidProtocol,
    ConnectionFailed,
    ObjectNotFound,
    InvalidConfig,
    NotSupported,
    PolicyNotFound,
    OperationFailed,
    InvalidKey,
    InvalidData,
    InvalidPolicyId,
    InvalidPolicy,
    InvalidMetadata,
    Timeout,
    TemporaryFailure,
}

impl ErrorKind {
    /// The stable message for this sentinel.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidProtocol => "invalid protocol",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::ObjectNotFound => "object not found",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::PolicyNotFound => "policy not found",
            ErrorKind::OperationFailed => "operation failed",
            ErrorKind::InvalidKey => "invalid key: key cannot be empty",
            ErrorKind::InvalidData => "invalid data: data cannot be decoded",
            ErrorKind::InvalidPolicyId => "invalid policy ID: policy ID cannot be empty",
            ErrorKind::InvalidPolicy => "invalid policy",
            ErrorKind::InvalidMetadata => "invalid metadata",
            ErrorKind::Timeout => "operation timeout",
            ErrorKind::TemporaryFailure => "temporary failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Error types for the objstore client
#[derive(Error, Debug)]
pub enum Error {
    /// Bare sentinel
    #[error("{0}")]
    Sentinel(ErrorKind),

    /// Sentinel with context (key, status code, server message)
    #[error("{kind}: {detail}")]
    Detailed { kind: ErrorKind, detail: String },

    /// gRPC status returned by the server
    #[error("{operation} operation failed: {source}")]
    GrpcStatus {
        operation: Operation,
        #[source]
        source: tonic::Status,
    },

    /// gRPC transport error
    #[error("gRPC transport error: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    /// HTTP request error
    #[error("{operation} operation failed: {source}")]
    Http {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },

    /// QUIC/HTTP3 connection error
    #[error("QUIC connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    /// QUIC endpoint refused to start a connection
    #[error("QUIC connect error: {0}")]
    QuicConnect(#[from] quinn::ConnectError),

    /// H3 error
    #[error("H3 error: {0}")]
    H3(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The caller's cancellation token fired before the first attempt
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn detailed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error::Detailed {
            kind,
            detail: detail.into(),
        }
    }

    /// Capability gap of the bound transport.
    pub fn not_supported(protocol: Protocol, operation: Operation) -> Self {
        Error::detailed(
            ErrorKind::NotSupported,
            format!("{} is not supported by the {} transport", operation, protocol),
        )
    }

    pub fn object_not_found(key: &str) -> Self {
        Error::detailed(ErrorKind::ObjectNotFound, key)
    }

    /// Application-level failure reported by the server; falls back to a
    /// generic message when the server sent none.
    pub fn operation_failed(operation: Operation, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            Error::detailed(ErrorKind::OperationFailed, format!("{} failed", operation))
        } else {
            Error::detailed(ErrorKind::OperationFailed, message)
        }
    }

    pub fn grpc(operation: Operation, source: tonic::Status) -> Self {
        Error::GrpcStatus { operation, source }
    }

    pub fn http(operation: Operation, source: reqwest::Error) -> Self {
        Error::Http { operation, source }
    }

    /// The sentinel this error normalizes to, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Sentinel(kind) => Some(*kind),
            Error::Detailed { kind, .. } => Some(*kind),
            Error::GrpcStatus { operation, source } => Some(match source.code() {
                tonic::Code::NotFound if operation.targets_policy() => ErrorKind::PolicyNotFound,
                tonic::Code::NotFound => ErrorKind::ObjectNotFound,
                tonic::Code::Unavailable => ErrorKind::ConnectionFailed,
                tonic::Code::DeadlineExceeded => ErrorKind::Timeout,
                tonic::Code::ResourceExhausted | tonic::Code::Aborted => {
                    ErrorKind::TemporaryFailure
                }
                tonic::Code::Unimplemented => ErrorKind::NotSupported,
                _ => ErrorKind::OperationFailed,
            }),
            Error::GrpcTransport(_) => Some(ErrorKind::ConnectionFailed),
            Error::Http { source, .. } => {
                if source.is_timeout() {
                    Some(ErrorKind::Timeout)
                } else if source.is_connect() {
                    Some(ErrorKind::ConnectionFailed)
                } else if source.is_decode() {
                    Some(ErrorKind::InvalidData)
                } else {
                    None
                }
            }
            Error::QuicConnection(quinn::ConnectionError::TimedOut) => Some(ErrorKind::Timeout),
            Error::QuicConnection(_) | Error::QuicConnect(_) | Error::H3(_) => {
                Some(ErrorKind::ConnectionFailed)
            }
            Error::Serialization(_) => Some(ErrorKind::InvalidData),
            Error::InvalidUrl(_) | Error::Tls(_) => Some(ErrorKind::InvalidConfig),
            Error::Io(_) | Error::Cancelled => None,
        }
    }

    /// Identity comparison against a sentinel.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// Structured gRPC status code, when the error came from the RPC transport.
    pub fn grpc_code(&self) -> Option<tonic::Code> {
        match self {
            Error::GrpcStatus { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::Sentinel(kind)
    }
}

impl From<h3::Error> for Error {
    fn from(err: h3::Error) -> Self {
        Error::H3(err.to_string())
    }
}
