//! Fixed pool of render workers with round-robin selection.
//!
//! This module defines [`WorkerPool`], which owns the ordered list of
//! [`WorkerEndpoint`]s read from configuration and a cursor pointing at the
//! next worker to use. Selection is a single atomic read-and-advance, so
//! concurrent callers never share a cursor value and never skip one.
//!
//! The pool does not track worker health or load. It always hands out the
//! next endpoint and leaves failures to the caller.

use core::fmt;
use francine_core::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Network address of one worker. Immutable for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerEndpoint {
    address: Arc<str>,
}

impl WorkerEndpoint {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Ordered set of workers and the round-robin cursor.
///
/// The cursor always lies in `[0, len)` and moves forward by one for every
/// successful [`WorkerPool::next`], regardless of what happens to the request
/// afterwards.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<WorkerEndpoint>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Builds the pool from configured addresses, in order.
    ///
    /// Repeated addresses are kept and receive a proportionally larger share
    /// of requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `addresses` is empty.
    pub fn initialize<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let workers: Vec<WorkerEndpoint> = addresses.into_iter().map(WorkerEndpoint::new).collect();

        if workers.is_empty() {
            return Err(Error::Configuration {
                reason: "worker pool requires at least one worker".to_string(),
            });
        }

        for _worker in &workers {
            #[cfg(feature = "tracing")]
            tracing::info!("worker added: {_worker}");
        }

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the endpoint under the cursor and advances the cursor by one,
    /// wrapping at the end of the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] if the pool has no workers.
    pub fn next(&self) -> Result<WorkerEndpoint> {
        let len = self.workers.len();
        if len == 0 {
            return Err(Error::ResourceExhausted);
        }

        // The closure never returns `None`, so the update cannot fail.
        let idx = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some((cur + 1) % len)
            }) {
            Ok(prev) | Err(prev) => prev,
        };

        #[cfg(feature = "tracing")]
        tracing::trace!("selected worker {idx} of {len}");

        Ok(self.workers[idx].clone())
    }

    /// Index of the worker the next call to [`WorkerPool::next`] returns.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn endpoints(&self) -> &[WorkerEndpoint] {
        &self.workers
    }
}
