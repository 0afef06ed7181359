//! Shared protocol, error and domain types used by the dispatcher.
//!
//! ## Submodules
//!
//! - [`error`] - Dispatcher error type and its mapping onto gRPC statuses.
//! - [`types`] - Job handle, artifact and renderer defaults.
//! - [`proto`] - Generated protobuf messages, clients and server traits.

pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from
/// `proto/francine.proto`.
///
/// ## Services
///
/// - `Francine` - client-facing `Render` call served by the master.
/// - `FrancineWorker` - `Run` (bidirectional) and `Get` (server streaming)
///   calls exposed by every worker.
///
/// `GetResponse.content` and `RenderResponse.image` are decoded as
/// [`bytes::Bytes`].
pub mod proto {
    tonic::include_proto!("francine");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("francine_descriptor");
}
