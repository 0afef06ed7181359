//! In-process workers used by the unit tests.
//!
//! - [`ScriptedWorker`] / [`MockConnector`] replace the gRPC client entirely
//!   and record every call made against them.
//! - [`FakeWorker`] is a real `FrancineWorker` gRPC server bound to an
//!   ephemeral port, for end-to-end tests over the network.

use crate::server::{
    dispatch::two_phase::RenderStrategy,
    pool::{
        manager::WorkerEndpoint,
        worker::{CallContext, RenderWorker, WorkerConnector},
    },
    service::handler::DispatchService,
};
use bytes::Bytes;
use core::pin::Pin;
use francine_core::{
    Error, Result,
    proto::{
        GetRequest, GetResponse, ImageType, Renderer, RunRequest, RunResponse,
        francine_server::FrancineServer,
        francine_worker_server::{FrancineWorker, FrancineWorkerServer},
    },
    types::JobHandle,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_stream::{Stream, StreamExt, wrappers::TcpListenerStream};
use tonic::{Request, Response, Status, Streaming, transport::Server};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(Renderer),
    Fetch(String),
}

pub type CallLog = Arc<Mutex<Vec<(String, Call)>>>;

/// Worker whose answers are fixed up front.
pub struct ScriptedWorker {
    endpoint: WorkerEndpoint,
    submit: Result<JobHandle>,
    fetch: Result<Bytes>,
    stall: bool,
    released: Arc<AtomicBool>,
    log: CallLog,
}

/// Sets the flag when the stalled submit future is dropped.
struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ScriptedWorker {
    pub fn ok(address: &str, job_id: &str, image_type: i32, content: &'static [u8]) -> Self {
        Self {
            endpoint: WorkerEndpoint::new(address),
            submit: Ok(JobHandle {
                id: job_id.to_string(),
                image_type,
            }),
            fetch: Ok(Bytes::from_static(content)),
            stall: false,
            released: Arc::default(),
            log: CallLog::default(),
        }
    }

    pub fn failing_submit(address: &str, status: Status) -> Self {
        Self {
            submit: Err(Error::Submit(status)),
            ..Self::ok(address, "unused", 0, b"")
        }
    }

    pub fn failing_fetch(address: &str, job_id: &str, status: Status) -> Self {
        Self {
            fetch: Err(Error::Fetch(status)),
            ..Self::ok(address, job_id, 0, b"")
        }
    }

    /// Never answers the submit call.
    pub fn stalled(address: &str) -> Self {
        Self {
            stall: true,
            ..Self::ok(address, "stalled", 0, b"")
        }
    }

    /// Flag raised once a stalled submit has been abandoned by its caller.
    pub fn on_release(mut self, released: Arc<AtomicBool>) -> Self {
        self.released = released;
        self
    }

    fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    fn record(&self, call: Call) {
        self.log
            .lock()
            .unwrap()
            .push((self.endpoint.address().to_string(), call));
    }

    /// Calls made against this worker's endpoint, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(addr, _)| addr == self.endpoint.address())
            .map(|(_, call)| call.clone())
            .collect()
    }
}

#[tonic::async_trait]
impl RenderWorker for ScriptedWorker {
    fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    async fn submit(&self, renderer: Renderer, _ctx: &CallContext) -> Result<JobHandle> {
        self.record(Call::Submit(renderer));
        if self.stall {
            let _release = SetOnDrop(Arc::clone(&self.released));
            futures::future::pending::<()>().await;
        }
        self.submit.clone()
    }

    async fn fetch(&self, job: &JobHandle, _ctx: &CallContext) -> Result<Bytes> {
        self.record(Call::Fetch(job.id.clone()));
        self.fetch.clone()
    }
}

type Script = Box<dyn Fn(&WorkerEndpoint) -> ScriptedWorker + Send + Sync>;

/// Connector that builds a [`ScriptedWorker`] per selected endpoint and
/// shares one call log between all of them.
pub struct MockConnector {
    script: Script,
    log: CallLog,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(script: impl Fn(&WorkerEndpoint) -> ScriptedWorker + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            log: CallLog::default(),
            connects: Arc::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

impl WorkerConnector for MockConnector {
    type Worker = ScriptedWorker;

    fn connect(&self, endpoint: &WorkerEndpoint) -> Result<ScriptedWorker> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        Ok((self.script)(endpoint).with_log(Arc::clone(&self.log)))
    }
}

/// How a [`FakeWorker`] answers `Run`.
#[derive(Debug, Clone)]
pub enum RunBehavior {
    /// One `RunResponse`, then OK.
    Reply,
    /// Fails the call with this status before any message.
    Reject(Status),
    /// Ends the stream with OK without sending a `RunResponse`.
    Empty,
    /// One `RunResponse`, then this status.
    FailAfterReply(Status),
    /// One `RunResponse`, then keeps the stream open forever.
    ReplyAndHold,
    /// Never answers.
    Stall,
}

/// How a [`FakeWorker`] answers `Get`.
#[derive(Debug, Clone)]
pub enum GetBehavior {
    /// One `GetResponse` with the artifact, then OK.
    Reply,
    /// Fails every fetch with `DATA_LOSS`.
    LoseArtifact,
    /// The artifact, then keeps the stream open forever.
    ReplyAndHold,
    /// The artifact followed by this many extra messages.
    Chunked(usize),
}

/// Minimal gRPC worker: job ids are `<name>-job-<n>` and the artifact of a
/// job is `<name>:<job id>`.
pub struct FakeWorker {
    name: String,
    image_type: ImageType,
    next_job: AtomicUsize,
    jobs: Mutex<HashSet<String>>,
    run: RunBehavior,
    get: GetBehavior,
    get_calls: Arc<AtomicUsize>,
}

impl FakeWorker {
    pub fn new(name: &str, image_type: ImageType) -> Self {
        Self {
            name: name.to_string(),
            image_type,
            next_job: AtomicUsize::new(0),
            jobs: Mutex::default(),
            run: RunBehavior::Reply,
            get: GetBehavior::Reply,
            get_calls: Arc::default(),
        }
    }

    /// Accepts jobs but fails every artifact fetch with `DATA_LOSS`.
    pub fn failing_get(self) -> Self {
        self.with_get(GetBehavior::LoseArtifact)
    }

    /// Rejects every job submission with `status`.
    pub fn failing_run(self, status: Status) -> Self {
        self.with_run(RunBehavior::Reject(status))
    }

    pub fn with_run(mut self, run: RunBehavior) -> Self {
        self.run = run;
        self
    }

    pub fn with_get(mut self, get: GetBehavior) -> Self {
        self.get = get;
        self
    }

    /// Number of `Get` calls that reached this worker.
    pub fn get_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.get_calls)
    }
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = core::result::Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl FrancineWorker for FakeWorker {
    type RunStream = ResponseStream<RunResponse>;
    type GetStream = ResponseStream<GetResponse>;

    async fn run(
        &self,
        req: Request<Streaming<RunRequest>>,
    ) -> core::result::Result<Response<Self::RunStream>, Status> {
        let mut inbound = req.into_inner();
        let run = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("missing run request"))?;
        if run.renderer() != Renderer::Aobench {
            return Err(Status::unimplemented("renderer not supported"));
        }

        if let RunBehavior::Reject(status) = &self.run {
            return Err(status.clone());
        }
        match self.run {
            RunBehavior::Empty => return Ok(Response::new(Box::pin(tokio_stream::empty()))),
            RunBehavior::Stall => futures::future::pending::<()>().await,
            _ => {}
        }

        let id = format!(
            "{}-job-{}",
            self.name,
            self.next_job.fetch_add(1, Ordering::AcqRel)
        );
        self.jobs.lock().unwrap().insert(id.clone());

        let reply = tokio_stream::once(Ok::<_, Status>(RunResponse {
            id,
            image_type: self.image_type as i32,
        }));
        let stream: Self::RunStream = match &self.run {
            RunBehavior::FailAfterReply(status) => {
                Box::pin(reply.chain(tokio_stream::once(Err(status.clone()))))
            }
            RunBehavior::ReplyAndHold => Box::pin(reply.chain(tokio_stream::pending())),
            _ => Box::pin(reply),
        };
        Ok(Response::new(stream))
    }

    async fn get(
        &self,
        req: Request<GetRequest>,
    ) -> core::result::Result<Response<Self::GetStream>, Status> {
        self.get_calls.fetch_add(1, Ordering::AcqRel);

        let id = req.into_inner().id;
        if !self.jobs.lock().unwrap().contains(&id) {
            return Err(Status::not_found(format!("unknown job {id}")));
        }

        let artifact = GetResponse {
            content: Bytes::from(format!("{}:{}", self.name, id)),
        };
        let reply = tokio_stream::once(Ok::<_, Status>(artifact));
        let stream: Self::GetStream = match self.get {
            GetBehavior::Reply => Box::pin(reply),
            GetBehavior::LoseArtifact => {
                return Err(Status::data_loss(format!("artifact lost for {id}")));
            }
            GetBehavior::ReplyAndHold => Box::pin(reply.chain(tokio_stream::pending())),
            GetBehavior::Chunked(extra) => {
                let chunks = (0..extra).map(|i| {
                    Ok(GetResponse {
                        content: Bytes::from(format!("chunk-{i}")),
                    })
                });
                Box::pin(reply.chain(tokio_stream::iter(chunks)))
            }
        };
        Ok(Response::new(stream))
    }
}

async fn ephemeral_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serves `worker` on an ephemeral port until the test runtime stops.
pub async fn spawn_worker(worker: FakeWorker) -> SocketAddr {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(
        Server::builder()
            .add_service(FrancineWorkerServer::new(worker))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    addr
}

/// Serves the dispatcher on an ephemeral port until the test runtime stops.
pub async fn spawn_dispatcher<C, S>(service: DispatchService<C, S>) -> SocketAddr
where
    C: WorkerConnector,
    S: RenderStrategy,
{
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(
        Server::builder()
            .add_service(FrancineServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    addr
}
