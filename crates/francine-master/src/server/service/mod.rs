//! gRPC service implementation.
//!
//! This module contains the client-facing `Francine` service. It selects a
//! worker for each request, delegates the render to the configured strategy
//! and coordinates shutdown.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`DispatchService`).

pub mod handler;
