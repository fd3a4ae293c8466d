//! Frame capture to encoder pipeline.
//!
//! ```text
//!  FrameSource ──capture()──► FramePacer ──write()──► EncoderProcess ──stdin──► encoder ──► network
//!       ▲                         ▲                          ▲
//!       └──────────── StreamSession (launch / restart / stop) ┘
//! ```
//!
//! The pacer runs a single capture+delivery cycle per tick on absolute deadlines,
//! drops frames instead of queueing them, and hands encoder loss back to the
//! session, which restarts the encoder process under a bounded retry policy.

pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod pacer;
pub mod renderer;
pub mod session;
pub mod source;
pub mod stats;

#[cfg(test)]
mod testing;

pub use config::{PipelineConfig, RendererConfig, RendererKind, RetryPolicy};
pub use error::{CaptureError, LaunchError, RendererError, WriteError};
pub use frame::Frame;
pub use session::{SessionState, SessionTransition, StreamSession, TerminationReason};
