//! Worker registry and per-worker RPC clients.
//!
//! - [`manager`] - [`manager::WorkerPool`], the fixed round-robin registry.
//! - [`worker`] - [`worker::WorkerClient`], the two-phase protocol against a
//!   single worker, and the connector that hands clients out.

pub mod manager;
pub mod worker;
