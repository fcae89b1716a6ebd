//! # previewly-av
//!
//! External transcoder management for preview sessions.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to ffmpeg.
//! - **Command building** ([`ToolCommand`], [`Transcoder`], [`FfmpegHls`]) --
//!   the HLS invocation handed to the supervisor.
//! - **Process supervision** ([`ProcessSupervisor`]) -- spawn, poll, and
//!   gracefully terminate the transcoder while keeping a bounded tail of its
//!   output for diagnostics.
//! - **Readiness polling** ([`ReadinessPoller`]) -- decide when enough
//!   segments exist to serve a preview, fully or partially.
//! - **Output directories** ([`PreviewDir`]) -- per-session directory that is
//!   removed exactly once, on every exit path.

pub mod command;
pub mod readiness;
pub mod supervisor;
pub mod tools;
pub mod transcode;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::ToolCommand;
pub use readiness::{FailureReason, Readiness, ReadinessConfig, ReadinessPoller};
pub use supervisor::{ProcessStatus, ProcessSupervisor, Supervised};
pub use tools::{ToolInfo, ToolPaths, ToolRegistry};
pub use transcode::{FfmpegHls, SegmentLayout, TranscodeSettings, Transcoder};
pub use workspace::PreviewDir;
