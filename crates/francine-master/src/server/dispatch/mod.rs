//! Render orchestration against a selected worker.
//!
//! - [`two_phase`] - [`two_phase::RenderStrategy`] and its default
//!   single-pass implementation, [`two_phase::TwoPhase`].

pub mod two_phase;
