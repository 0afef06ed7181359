//! Error types for the render dispatcher.
//!
//! This module defines the central `Error` enum for everything that can go
//! wrong between accepting a `Render` call and answering it. It implements
//! `From<Error>` for `tonic::Status` so handlers can return errors with `?`.
//!
//! ## Error Cases
//! - `Configuration`: The worker list or an address is unusable. Fatal at
//!   startup.
//! - `ResourceExhausted`: There is no worker to hand the request to.
//! - `InvalidRequest`: The client asked for a renderer that does not exist.
//! - `Submit`: The job submission phase failed on the worker.
//! - `Fetch`: The artifact fetch phase failed on the worker.
//! - `ServiceShutdown`: A request arrived while the service was shutting
//!   down.
//!
//! `Submit` and `Fetch` carry the status reported by the transport or the
//! worker. It is handed back to the caller untouched.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the render dispatcher.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The configured worker list is empty or contains an invalid address.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// No worker is available to take the request.
    #[error("No worker available")]
    ResourceExhausted,

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Submitting the job to the worker failed.
    #[error("Submit failed: {0}")]
    Submit(Status),

    /// Fetching the artifact from the worker failed.
    #[error("Fetch failed: {0}")]
    Fetch(Status),

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Configuration { reason } => Status::internal(reason),
            Error::ResourceExhausted => Status::resource_exhausted("no worker available"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Submit(status) | Error::Fetch(status) => status,
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
