use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    // grpc -> control-plane -> system -> modules -> root
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .ok_or("Could not find workspace root")?;

    let proto_dir = workspace_root.join("proto");
    let proto_files = [
        proto_dir.join("control_plane/v1/config.proto"),
        proto_dir.join("control_plane/v1/admin.proto"),
    ];

    for proto_file in &proto_files {
        if !proto_file.exists() {
            return Err(format!(
                "Proto file not found: {} (workspace root: {})",
                proto_file.display(),
                workspace_root.display()
            )
            .into());
        }
        println!("cargo:rerun-if-changed={}", proto_file.display());
    }
    println!("cargo:rerun-if-changed={}", proto_dir.display());

    // An explicit PROTOC wins; otherwise fall back to the vendored binary so
    // builds don't depend on a system install.
    println!("cargo:rerun-if-env-changed=PROTOC");
    let protoc = match env::var_os("PROTOC") {
        Some(path) => PathBuf::from(path),
        None => protoc_bin_vendored::protoc_bin_path()?,
    };
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc);

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_with_config(config, &proto_files, &[proto_dir])?;

    Ok(())
}
