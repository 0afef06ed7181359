//! Client side of the two-phase worker protocol.
//!
//! A [`WorkerClient`] is bound to one [`WorkerEndpoint`] and runs the two
//! calls every render needs:
//!
//! 1. [`RenderWorker::submit`] - opens the bidirectional `Run` stream, sends a
//!    single `RunRequest`, half-closes, and reads the single `RunResponse`
//!    carrying the job id and image type.
//! 2. [`RenderWorker::fetch`] - opens the server-streaming `Get` call for that
//!    job id and reads the artifact from its first message.
//!
//! Each call returns as soon as its first message arrives. The stream is then
//! dropped, which resets the underlying HTTP/2 stream, so a worker that keeps
//! the stream open or sends further messages cannot stall the render. A
//! status the worker reports after that first message is not observed.
//!
//! Channels are created lazily once per distinct address by
//! [`ChannelConnector`] and shared by every client for that address.

use super::manager::{WorkerEndpoint, WorkerPool};
use bytes::Bytes;
use core::time::Duration;
use francine_core::{
    Error, Result,
    proto::{GetRequest, Renderer, RunRequest, francine_worker_client::FrancineWorkerClient},
    types::JobHandle,
};
use std::collections::HashMap;
use tokio::time::Instant;
use tonic::{
    Request, Status,
    codec::CompressionEncoding,
    metadata::MetadataMap,
    transport::{Channel, Endpoint},
};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline inherited from the inbound call.
///
/// Both outbound calls of a render are bounded by whatever is left of the
/// client's own deadline, so work on the worker is abandoned once the client
/// has given up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Reads the `grpc-timeout` header of an inbound request, if any.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(Self::with_timeout)
            .unwrap_or_default()
    }

    /// Time left before the inbound deadline. `None` means no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Wraps an outbound message, carrying over the remaining deadline.
    fn request<T>(&self, message: T) -> core::result::Result<Request<T>, Status> {
        let mut request = Request::new(message);
        if let Some(remaining) = self.remaining() {
            if remaining.is_zero() {
                return Err(Status::deadline_exceeded("client deadline expired"));
            }
            request.set_timeout(remaining);
        }
        Ok(request)
    }
}

/// Parses a gRPC `TimeoutValue TimeoutUnit` pair such as `250m` or `5S`.
fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if raw.len() < 2 || raw.len() > 9 {
        return None;
    }
    let (value, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = value.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(value.checked_mul(3600)?),
        "M" => Duration::from_secs(value.checked_mul(60)?),
        "S" => Duration::from_secs(value),
        "m" => Duration::from_millis(value),
        "u" => Duration::from_micros(value),
        "n" => Duration::from_nanos(value),
        _ => return None,
    };
    Some(timeout)
}

/// The two remote operations the dispatcher needs from a worker.
#[tonic::async_trait]
pub trait RenderWorker: Send + Sync {
    /// Endpoint this client talks to.
    fn endpoint(&self) -> &WorkerEndpoint;

    /// Submits a job for `renderer` and returns its handle.
    ///
    /// # Errors
    ///
    /// [`Error::Submit`] with the transport or worker status.
    async fn submit(&self, renderer: Renderer, ctx: &CallContext) -> Result<JobHandle>;

    /// Fetches the finished artifact of `job`.
    ///
    /// # Errors
    ///
    /// [`Error::Fetch`] with the transport or worker status.
    async fn fetch(&self, job: &JobHandle, ctx: &CallContext) -> Result<Bytes>;
}

/// Hands out a [`RenderWorker`] for a selected endpoint.
pub trait WorkerConnector: Send + Sync + 'static {
    type Worker: RenderWorker;

    fn connect(&self, endpoint: &WorkerEndpoint) -> Result<Self::Worker>;
}

/// gRPC client for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    endpoint: WorkerEndpoint,
    client: FrancineWorkerClient<Channel>,
}

impl WorkerClient {
    pub fn new(endpoint: WorkerEndpoint, channel: Channel) -> Self {
        let client = FrancineWorkerClient::new(channel)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate);
        Self { endpoint, client }
    }
}

#[tonic::async_trait]
impl RenderWorker for WorkerClient {
    fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    async fn submit(&self, renderer: Renderer, ctx: &CallContext) -> Result<JobHandle> {
        let mut client = self.client.clone();
        // A one-element stream: the outbound half closes after the request.
        let outbound = tokio_stream::once(RunRequest {
            renderer: renderer as i32,
        });
        let request = ctx.request(outbound).map_err(Error::Submit)?;

        let mut inbound = client.run(request).await.map_err(Error::Submit)?.into_inner();

        let job = inbound
            .message()
            .await
            .map_err(Error::Submit)?
            .map(JobHandle::from)
            .ok_or_else(|| {
                Error::Submit(Status::internal("worker closed the job stream without a job id"))
            })?;

        drop(inbound);
        Ok(job)
    }

    async fn fetch(&self, job: &JobHandle, ctx: &CallContext) -> Result<Bytes> {
        let mut client = self.client.clone();
        let request = ctx
            .request(GetRequest { id: job.id.clone() })
            .map_err(Error::Fetch)?;

        let mut inbound = client.get(request).await.map_err(Error::Fetch)?.into_inner();

        let content = inbound
            .message()
            .await
            .map_err(Error::Fetch)?
            .map(|resp| resp.content)
            .ok_or_else(|| {
                Error::Fetch(Status::internal(format!(
                    "worker returned no artifact for job {}",
                    job.id
                )))
            })?;

        // Only the first message is the artifact.
        drop(inbound);
        Ok(content)
    }
}

/// Connector backed by one lazily connected [`Channel`] per distinct worker
/// address.
#[derive(Debug, Clone, Default)]
pub struct ChannelConnector {
    channels: HashMap<WorkerEndpoint, Channel>,
}

impl ChannelConnector {
    /// Prepares a channel for every endpoint in `pool`. No connection is made
    /// until the first call.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if an address is not a valid URI.
    pub fn for_pool(pool: &WorkerPool) -> Result<Self> {
        let mut channels = HashMap::with_capacity(pool.len());
        for endpoint in pool.endpoints() {
            if !channels.contains_key(endpoint) {
                channels.insert(endpoint.clone(), lazy_channel(endpoint)?);
            }
        }
        Ok(Self { channels })
    }
}

impl WorkerConnector for ChannelConnector {
    type Worker = WorkerClient;

    fn connect(&self, endpoint: &WorkerEndpoint) -> Result<WorkerClient> {
        let channel = match self.channels.get(endpoint) {
            Some(channel) => channel.clone(),
            None => lazy_channel(endpoint)?,
        };
        Ok(WorkerClient::new(endpoint.clone(), channel))
    }
}

fn lazy_channel(endpoint: &WorkerEndpoint) -> Result<Channel> {
    let address = endpoint.address();
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };

    let channel = Endpoint::from_shared(uri)
        .map_err(|e| Error::Configuration {
            reason: format!("invalid worker address {address}: {e}"),
        })?
        .connect_lazy();

    Ok(channel)
}
