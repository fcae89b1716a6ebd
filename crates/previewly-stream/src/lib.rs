//! # previewly-stream
//!
//! The consumption side of a preview session.
//!
//! - [`NetworkMetrics`]: the four network features a client reports.
//! - [`ForwardPredictor`], [`DecisionTreeModel`], [`RuleTable`],
//!   [`PredictorHandle`]: estimate how many segments to keep ahead.
//! - [`WindowSizingPolicy`]: turn metrics into a bounded forward limit.
//! - [`SegmentBuffer`]: the sliding window of admissible segment ids.
//! - [`ChunkSource`]: fetch chunk bytes from a local file or remote origin.
//! - [`PlaybackLoop`]: walk the window, fetch chunks, and slide forward.

pub mod metrics;
pub mod playback;
pub mod predictor;
pub mod sizing;
pub mod source;
pub mod window;

pub use metrics::NetworkMetrics;
pub use playback::{BufferCursor, PlaybackEnd, PlaybackLoop, WindowCursor};
pub use predictor::{DecisionTreeModel, ForwardPredictor, PredictorHandle, RuleTable};
pub use sizing::{WindowSizingPolicy, MAX_FORWARD_CAP};
pub use source::{ChunkFetch, ChunkSource, LocalFileSource, RemoteSource, SourceSettings};
pub use window::{SegmentBuffer, WindowSnapshot};
