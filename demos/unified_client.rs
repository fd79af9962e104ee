use bytes::Bytes;
use objstore_client::{
    ClientConfig, ErrorKind, ObjectStoreClient, Operation, Protocol, RetryConfig, TlsConfig,
};
use std::env;
use tracing_subscriber::EnvFilter;

/// Runs the same object round trip through whichever transport `config`
/// selects.
async fn exercise(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let protocol = config.protocol;
    println!("\n==> {} client at {}", protocol, config.address);

    let client = ObjectStoreClient::connect(config).await?;

    let health = client.health().await?;
    println!("  ✓ Health: {:?}", health.status);

    let key = format!("demos/unified-{}.txt", protocol);
    let data = Bytes::from(format!("Hello from {}!", protocol));

    let put = client.put(&key, data.clone(), None).await?;
    println!("  ✓ Put object (etag {:?})", put.etag);

    println!("  ✓ Exists: {}", client.exists(&key).await?);

    let (retrieved, metadata) = client.get(&key).await?;
    assert_eq!(retrieved, data);
    println!("  ✓ Got object: {} bytes", metadata.size);

    match client.archive(&key, "glacier", Default::default()).await {
        Ok(()) => println!("  ✓ Archived object"),
        Err(e) if e.is(ErrorKind::NotSupported) => {
            println!("  - Archive skipped: {}", e)
        }
        Err(e) => println!("  ! Archive failed: {}", e),
    }

    client.delete(&key).await?;
    println!("  ✓ Deleted object");

    let missing = client.get(&key).await.unwrap_err();
    println!("  ✓ Get after delete: {}", missing);

    let gaps: Vec<&str> = protocol
        .unsupported_operations()
        .into_iter()
        .map(Operation::as_str)
        .collect();
    if !gaps.is_empty() {
        println!("  - Not available over {}: {}", protocol, gaps.join(", "));
    }

    client.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("==> Unified Client Example");

    let targets = [
        (Protocol::Rest, "OBJSTORE_REST_ADDR", "localhost:8080"),
        (Protocol::Grpc, "OBJSTORE_GRPC_ADDR", "localhost:50051"),
        (Protocol::Quic, "OBJSTORE_QUIC_ADDR", "localhost:4433"),
    ];

    for (protocol, var, default) in targets {
        let address = env::var(var).unwrap_or_else(|_| default.to_string());
        let mut config = ClientConfig::new(protocol, address).with_retry(RetryConfig::enabled());
        if protocol == Protocol::Quic {
            // Local QUIC servers usually run with a self-signed certificate.
            config = config.with_tls(TlsConfig {
                insecure_skip_verify: true,
                ..Default::default()
            });
        }

        if let Err(e) = exercise(config).await {
            eprintln!("  ✗ {} failed: {}", protocol, e);
        }
    }

    println!("\n==> Unified client example completed");
    Ok(())
}
