//! Stage runtime for framepipe pipelines.
//!
//! A [`Stage`] owns a [`StageBody`], connects the body's input channels,
//! binds its output channel and then loops: read every input, transform,
//! publish, pace. The loop ends when the sample limit is reached, an
//! upstream sink goes away, or the stage's [`Interrupt`] fires.
//!
//! [`Interrupt`]: framepipe_node::Interrupt

pub mod body;
pub mod config;
mod error;
pub mod logging;
pub mod pacer;
pub mod runtime;
pub mod signal;

pub use body::{Monitor, Relay, StageBody, TestFrame};
pub use config::StageConfig;
pub use error::StageError;
pub use pacer::Pacer;
pub use runtime::{EndReason, RunSummary, Stage, StageState, Status};
