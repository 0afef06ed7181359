//! Dispatcher internals.
//!
//! - [`config`] - CLI/environment configuration and worker list parsing.
//! - [`pool`] - Worker registry and per-worker gRPC clients.
//! - [`dispatch`] - Two-phase render orchestration.
//! - [`service`] - The `Francine` gRPC service.
//! - [`telemetry`] - Logging, tracing and metrics.

pub mod config;
pub mod dispatch;
pub mod pool;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;
