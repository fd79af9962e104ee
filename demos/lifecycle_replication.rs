use objstore_client::{
    ClientConfig, ErrorKind, LifecyclePolicy, ObjectStoreClient, ReplicationMode,
    ReplicationPolicy, RetryConfig, TriggerReplicationOptions,
};
use std::collections::HashMap;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let address = env::var("OBJSTORE_GRPC_ADDR").unwrap_or_else(|_| "localhost:50051".to_string());
    let config = ClientConfig::grpc(address).with_retry(RetryConfig::enabled());
    let client = ObjectStoreClient::connect(config).await?;

    println!("==> Lifecycle policies");

    let expire_logs = LifecyclePolicy {
        id: "expire-logs".to_string(),
        prefix: "logs/".to_string(),
        retention_seconds: 7 * 24 * 3600,
        action: "delete".to_string(),
        ..Default::default()
    };
    client.add_policy(expire_logs).await?;
    println!("  ✓ Added policy expire-logs");

    for policy in client.get_policies(None).await? {
        println!(
            "  - {} ({}): {} after {}s",
            policy.id, policy.prefix, policy.action, policy.retention_seconds
        );
    }

    let applied = client.apply_policies().await?;
    println!(
        "  ✓ Applied {} policies to {} objects",
        applied.policies_count, applied.objects_processed
    );

    client.remove_policy("expire-logs").await?;
    println!("  ✓ Removed policy expire-logs");

    println!("\n==> Replication");

    let mut source_settings = HashMap::new();
    source_settings.insert("path".to_string(), "/tmp/objstore-source".to_string());
    let mut destination_settings = HashMap::new();
    destination_settings.insert("path".to_string(), "/tmp/objstore-backup".to_string());

    let backup = ReplicationPolicy {
        id: "nightly-backup".to_string(),
        source_backend: "local".to_string(),
        source_settings,
        destination_backend: "local".to_string(),
        destination_settings,
        check_interval_seconds: 3600,
        enabled: true,
        replication_mode: ReplicationMode::Opaque,
        ..Default::default()
    };

    match client.add_replication_policy(backup).await {
        Ok(()) => println!("  ✓ Added replication policy nightly-backup"),
        Err(e) if e.is(ErrorKind::NotSupported) => {
            println!("  - Replication not supported by this server: {}", e);
            client.close().await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let result = client
        .trigger_replication(TriggerReplicationOptions::for_policy("nightly-backup"))
        .await?;
    println!(
        "  ✓ Synced {} objects ({} bytes, {} failed) in {}ms",
        result.synced, result.bytes_total, result.failed, result.duration_ms
    );

    let status = client.get_replication_status("nightly-backup").await?;
    println!(
        "  ✓ Status: {} runs, {} objects total",
        status.sync_count, status.total_objects_synced
    );

    client.remove_replication_policy("nightly-backup").await?;
    println!("  ✓ Removed replication policy nightly-backup");

    client.close().await?;
    Ok(())
}
