//! # objstore-client
//!
//! One client for a go-objstore server, whichever wire protocol it speaks:
//! REST, gRPC or QUIC/HTTP3.
//!
//! ## Features
//!
//! - **One factory**: [`ClientConfig`] selects the transport; the rest of the
//!   program only sees [`ObjectStoreClient`]
//! - **Retries**: opt-in exponential backoff with full jitter for transient
//!   failures, cancellable through a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - **Sentinel errors**: every failure normalizes to an [`ErrorKind`]
//! - **Capability table**: ask up front which operations a transport exposes
//!
//! ## Quick Start
//!
//! ```no_run
//! use objstore_client::{ClientConfig, ObjectStoreClient, RetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::grpc("localhost:50051").with_retry(RetryConfig::enabled());
//!     let client = ObjectStoreClient::connect(config).await?;
//!
//!     client.put("greeting.txt", "Hello, World!", None).await?;
//!     let (data, metadata) = client.get("greeting.txt").await?;
//!     println!("{} bytes, etag {:?}", data.len(), metadata.etag);
//!
//!     client.delete("greeting.txt").await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Capability gaps
//!
//! ```no_run
//! use objstore_client::{ErrorKind, ObjectStoreClient, Operation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ObjectStoreClient::rest("localhost:8080").await?;
//! assert!(!client.supports(Operation::Archive));
//!
//! let err = client.apply_policies().await.unwrap_err();
//! assert!(err.is(ErrorKind::NotSupported));
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod grpc;
pub mod quic;
pub mod rest;
pub mod retry;
pub mod transport;
pub mod types;
pub mod validation;

pub use capability::Operation;
pub use client::ObjectStoreClient;
pub use config::{ClientConfig, Protocol, RetryConfig, TlsConfig};
pub use error::{Error, ErrorKind, Result};
pub use transport::{Adapter, Transport};
pub use types::*;

pub use grpc::GrpcClient;
pub use quic::{Exchange, ExchangeResponse, H3Exchange, QuicClient};
pub use rest::RestClient;
