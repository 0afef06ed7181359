/// Builds the gRPC client and server code for the `francine.proto` definition
/// using `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The artifact payloads (`GetResponse.content` and `RenderResponse.image`)
/// are marked with `.bytes(...)` so they deserialize as `Bytes` instead of
/// `Vec<u8>`. The dispatcher hands the fetched artifact straight back to the
/// client, so this keeps the relay copy-free.
///
/// # Output
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("francine");
/// }
/// ```
///
/// A file descriptor set is also written to `OUT_DIR` for gRPC reflection.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("francine_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    // Artifact blobs are relayed as-is
    config
        .bytes([
            ".francine.GetResponse.content",
            ".francine.RenderResponse.image",
        ])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/francine.proto"], &["proto"])
        .unwrap();
}
