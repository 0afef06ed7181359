use crate::server::pool::worker::{CallContext, RenderWorker};
use francine_core::{
    Result,
    proto::Renderer,
    types::{Artifact, JobHandle},
};

/// How a render is carried out once a worker has been chosen.
///
/// The dispatcher selects exactly one worker per request and hands it to the
/// strategy. Strategies that want to retry or fail over can be layered on top
/// without changing how workers are selected.
#[tonic::async_trait]
pub trait RenderStrategy: Send + Sync + 'static {
    async fn render<W: RenderWorker>(
        &self,
        worker: &W,
        renderer: Renderer,
        ctx: &CallContext,
    ) -> Result<Artifact>;
}

/// Submit the job, then fetch its artifact, on the same worker.
///
/// A failure in either phase ends the render and is returned as is. The job
/// id from a successful submit is used for exactly one fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoPhase;

#[tonic::async_trait]
impl RenderStrategy for TwoPhase {
    async fn render<W: RenderWorker>(
        &self,
        worker: &W,
        renderer: Renderer,
        ctx: &CallContext,
    ) -> Result<Artifact> {
        let job: JobHandle = match worker.submit(renderer, ctx).await {
            Ok(job) => job,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("render failed on worker {}: {}", worker.endpoint(), e);
                return Err(e);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("job {} submitted to worker {}", job.id, worker.endpoint());

        match worker.fetch(&job, ctx).await {
            Ok(content) => Ok(Artifact::new(&job, content)),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    "get failed for job {} on worker {}: {}",
                    job.id,
                    worker.endpoint(),
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{Call, ScriptedWorker};
    use bytes::Bytes;
    use francine_core::Error;
    use tonic::{Code, Status};

    #[tokio::test]
    async fn submits_then_fetches_by_job_id() {
        let worker = ScriptedWorker::ok("w1", "job-7", 1, b"exr-bytes");

        let artifact = TwoPhase
            .render(&worker, Renderer::Aobench, &CallContext::default())
            .await
            .unwrap();

        assert_eq!(artifact.content, Bytes::from_static(b"exr-bytes"));
        assert_eq!(artifact.image_type, 1);
        assert_eq!(
            worker.calls(),
            vec![
                Call::Submit(Renderer::Aobench),
                Call::Fetch("job-7".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn submit_failure_skips_fetch() {
        let worker = ScriptedWorker::failing_submit("w1", Status::unavailable("connection refused"));

        let err = TwoPhase
            .render(&worker, Renderer::Aobench, &CallContext::default())
            .await
            .unwrap_err();

        let Error::Submit(status) = err else {
            panic!("expected submit error, got {err:?}");
        };
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "connection refused");
        assert_eq!(worker.calls(), vec![Call::Submit(Renderer::Aobench)]);
    }

    #[tokio::test]
    async fn fetch_failure_is_returned_once() {
        let worker =
            ScriptedWorker::failing_fetch("w1", "job-3", Status::not_found("job-3 expired"));

        let err = TwoPhase
            .render(&worker, Renderer::Aobench, &CallContext::default())
            .await
            .unwrap_err();

        let Error::Fetch(status) = err else {
            panic!("expected fetch error, got {err:?}");
        };
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(
            worker.calls(),
            vec![
                Call::Submit(Renderer::Aobench),
                Call::Fetch("job-3".to_string())
            ]
        );
    }
}
