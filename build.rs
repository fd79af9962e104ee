use std::path::Path;

// The generated bindings are checked in under src/proto so a normal build
// does not need protoc. Set OBJSTORE_REGENERATE_PROTO=1 after editing the
// schema to rewrite them.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/objstore.proto";

    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-env-changed=OBJSTORE_REGENERATE_PROTO");

    if std::env::var_os("OBJSTORE_REGENERATE_PROTO").is_none() {
        return Ok(());
    }

    let proto_out_dir = Path::new("src/proto");
    if !proto_out_dir.exists() {
        std::fs::create_dir_all(proto_out_dir)?;
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir(proto_out_dir)
        .compile(&[proto_file], &["proto"])?;

    Ok(())
}
