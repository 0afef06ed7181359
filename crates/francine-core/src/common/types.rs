//! # Render Job Types
//!
//! Values that travel between the two phases of a render: the [`JobHandle`]
//! returned by a worker when a job is submitted, and the [`Artifact`] fetched
//! once the job is done.
//!
//! The dispatcher never interprets the artifact. It keeps the worker's image
//! type tag as the raw wire value so that tags this build does not know about
//! still reach the client unchanged.

use crate::proto::{RenderResponse, Renderer, RunResponse};
use crate::{Error, Result};
use bytes::Bytes;

/// Renderer requested when a `RenderRequest` does not name one.
pub const DEFAULT_RENDERER: Renderer = Renderer::Aobench;

/// Resolves the optional renderer selector of a `RenderRequest`.
///
/// `None` falls back to [`DEFAULT_RENDERER`]. Values outside the `Renderer`
/// enum are rejected.
pub fn resolve_renderer(selector: Option<i32>) -> Result<Renderer> {
    match selector {
        None => Ok(DEFAULT_RENDERER),
        Some(raw) => Renderer::try_from(raw).map_err(|_| Error::InvalidRequest {
            reason: format!("unknown renderer {raw}"),
        }),
    }
}

/// Opaque job identifier plus the artifact type reported at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub image_type: i32,
}

impl From<RunResponse> for JobHandle {
    fn from(resp: RunResponse) -> Self {
        Self {
            id: resp.id,
            image_type: resp.image_type,
        }
    }
}

/// Rendered output of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content: Bytes,
    pub image_type: i32,
}

impl Artifact {
    /// Pairs fetched bytes with the type tag of the job they belong to.
    pub fn new(job: &JobHandle, content: Bytes) -> Self {
        Self {
            content,
            image_type: job.image_type,
        }
    }
}

impl From<Artifact> for RenderResponse {
    fn from(artifact: Artifact) -> Self {
        Self {
            image: artifact.content,
            image_type: artifact.image_type,
        }
    }
}
