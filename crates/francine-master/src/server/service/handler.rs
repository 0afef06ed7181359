//! gRPC service implementation for render dispatch.
//!
//! This module defines [`DispatchService`], the implementation of the
//! [`Francine`] gRPC service. Every `Render` call runs the same single pass:
//!
//! ```text
//! Idle -> Selecting -> Submitting -> Fetching -> Done
//!                          |            |
//!                          +--> Failed <+
//! ```
//!
//! One worker is taken from the [`WorkerPool`], the render strategy submits
//! the job and fetches the artifact on that worker, and the artifact is
//! returned together with the type tag reported at submission. Failures are
//! returned to the client with the worker's status. Nothing is retried.
//!
//! ## Responsibilities
//!
//! - Resolve the renderer selector of the request.
//! - Pick the next worker and obtain a client for it.
//! - Track in-flight renders and drain them on shutdown.
//!
//! If the client cancels, tonic drops the handler future, which drops the
//! outbound streams and cancels the worker calls with it.

use crate::server::{
    config::ServerConfig,
    dispatch::two_phase::{RenderStrategy, TwoPhase},
    pool::{
        manager::WorkerPool,
        worker::{CallContext, ChannelConnector, WorkerConnector},
    },
    telemetry::{
        decrement_renders_inflight, increment_render_errors, increment_renders,
        increment_renders_inflight, record_artifact_bytes, record_render_duration,
    },
};
use core::time::Duration;
use francine_core::{
    Error, Result,
    proto::{RenderRequest, RenderResponse, Renderer, francine_server::Francine},
    types::{Artifact, resolve_renderer},
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// Shutdown bookkeeping shared by every clone of the service.
#[derive(Debug, Default)]
struct ServiceState {
    shutting_down: AtomicBool,
    accepted: AtomicUsize,
    inflight: AtomicUsize,
}

/// Counts a render as in flight until dropped, including when the handler
/// future is dropped on client cancellation.
struct InflightGuard(Arc<ServiceState>);

impl InflightGuard {
    fn enter(state: &Arc<ServiceState>) -> Self {
        state.accepted.fetch_add(1, Ordering::AcqRel);
        state.inflight.fetch_add(1, Ordering::AcqRel);
        increment_renders_inflight();
        Self(Arc::clone(state))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_renders_inflight();
    }
}

/// Front-end render service.
///
/// Generic over how worker clients are obtained and how a render is run on
/// the chosen worker. Production uses [`ChannelConnector`] and [`TwoPhase`].
pub struct DispatchService<C = ChannelConnector, S = TwoPhase> {
    pool: Arc<WorkerPool>,
    connector: Arc<C>,
    strategy: Arc<S>,
    state: Arc<ServiceState>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl<C, S> Clone for DispatchService<C, S> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            connector: Arc::clone(&self.connector),
            strategy: Arc::clone(&self.strategy),
            state: Arc::clone(&self.state),
            shutdown_token: self.shutdown_token.clone(),
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

impl DispatchService {
    /// Builds the pool from the configured worker list and prepares one lazy
    /// channel per worker address.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the worker list is empty or an address is
    /// not a valid URI.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let pool = WorkerPool::initialize(config.workers.iter().map(String::as_str))?;
        let connector = ChannelConnector::for_pool(&pool)?;
        Ok(Self::with_parts(
            pool,
            connector,
            TwoPhase,
            Duration::from_secs(config.shutdown_timeout),
        ))
    }
}

impl<C, S> DispatchService<C, S>
where
    C: WorkerConnector,
    S: RenderStrategy,
{
    pub fn with_parts(
        pool: WorkerPool,
        connector: C,
        strategy: S,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            connector: Arc::new(connector),
            strategy: Arc::new(strategy),
            state: Arc::new(ServiceState::default()),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Number of renders currently being processed.
    pub fn renders_inflight(&self) -> usize {
        self.state.inflight.load(Ordering::Acquire)
    }

    /// Number of renders admitted since startup. Requests refused during
    /// shutdown or for an unknown renderer are not counted.
    pub fn renders_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::Acquire)
    }

    /// Decides whether a request may start at all.
    fn admit(&self, selector: Option<i32>) -> Result<Renderer> {
        if self.state.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        resolve_renderer(selector)
    }

    /// Runs one render: select a worker, then hand it to the strategy.
    async fn dispatch(&self, renderer: Renderer, ctx: CallContext) -> Result<Artifact> {
        let endpoint = match self.pool.next() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("no worker available!");
                return Err(e);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!("work assigned to worker {endpoint}");

        let worker = self.connector.connect(&endpoint)?;
        self.strategy.render(&worker, renderer, &ctx).await
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new renders.
    /// - Waits up to the configured timeout for in-flight renders to finish.
    /// - Cancels whatever is still running; those callers receive
    ///   `Unavailable`.
    pub async fn shutdown(&self) -> Result<()> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Refusing new requests ({} renders accepted)",
            self.renders_accepted()
        );
        self.state.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight renders to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight renders ({} active)",
            self.renders_inflight()
        );
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.renders_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight renders drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} renders still active)",
                    self.renders_inflight()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining renders via shutdown token");
        self.shutdown_token.cancel();

        Ok(())
    }
}

#[tonic::async_trait]
impl<C, S> Francine for DispatchService<C, S>
where
    C: WorkerConnector,
    S: RenderStrategy,
{
    /// Handles a render request.
    ///
    /// If `tracing` is enabled, a span is recorded per request. If `metrics`
    /// is enabled, emits request count, in-flight renders, errors, duration
    /// and artifact size.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(renderer = ?req.get_ref().renderer)))]
    async fn render(
        &self,
        req: Request<RenderRequest>,
    ) -> core::result::Result<Response<RenderResponse>, Status> {
        let start = std::time::Instant::now();

        let ctx = CallContext::from_metadata(req.metadata());
        let renderer = match self.admit(req.into_inner().renderer) {
            Ok(renderer) => renderer,
            Err(e) => {
                increment_render_errors();
                return Err(e.into());
            }
        };

        increment_renders();
        let _inflight = InflightGuard::enter(&self.state);

        let result = tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Err(Error::ServiceShutdown),
            res = self.dispatch(renderer, ctx) => res,
        };

        match result {
            Ok(artifact) => {
                record_artifact_bytes(artifact.content.len() as u64);
                record_render_duration(start.elapsed().as_millis() as f64);
                Ok(Response::new(artifact.into()))
            }
            Err(e) => {
                increment_render_errors();
                Err(e.into())
            }
        }
    }
}
