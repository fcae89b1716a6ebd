use previewly_av::{ReadinessConfig, ToolPaths, TranscodeSettings};
use previewly_stream::{SourceSettings, MAX_FORWARD_CAP};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub readiness: ReadinessSettings,

    #[serde(default)]
    pub transcoder: TranscodeSettings,

    #[serde(default)]
    pub tools: ToolPaths,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub source: SourceSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root under which every session gets its `preview_*` directory.
    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,

    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_hls_dir() -> PathBuf {
    PathBuf::from("./data/hls")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hls_dir: default_hls_dir(),
            static_dir: None,
        }
    }
}

/// How the forward window is sized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// `forward_secs` worth of segments, always.
    #[default]
    Static,
    /// Predicted from network metrics.
    Adaptive,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Target HLS segment length handed to the transcoder.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    /// Playback history kept behind the current segment.
    #[serde(default = "default_window_secs")]
    pub backward_secs: u64,

    /// Look-ahead used by the static sizing mode.
    #[serde(default = "default_window_secs")]
    pub forward_secs: u64,

    /// Upper bound on the forward window, in segments.
    #[serde(default = "default_forward_cap")]
    pub forward_cap: usize,

    #[serde(default)]
    pub sizing: SizingMode,
}

fn default_segment_duration() -> u32 {
    30
}
fn default_window_secs() -> u64 {
    120
}
fn default_forward_cap() -> usize {
    MAX_FORWARD_CAP
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: default_segment_duration(),
            backward_secs: default_window_secs(),
            forward_secs: default_window_secs(),
            forward_cap: default_forward_cap(),
            sizing: SizingMode::default(),
        }
    }
}

impl BufferConfig {
    /// Whole segments covering `backward_secs`.
    pub fn backward_segments(&self) -> usize {
        segments_for(self.backward_secs, self.segment_duration_secs)
    }

    /// Whole segments covering `forward_secs`.
    pub fn forward_segments(&self) -> usize {
        segments_for(self.forward_secs, self.segment_duration_secs)
    }
}

fn segments_for(secs: u64, segment_duration: u32) -> usize {
    let segment_duration = u64::from(segment_duration.max(1));
    usize::try_from(secs.div_ceil(segment_duration)).unwrap_or(usize::MAX)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions older than this are swept.
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub sweep_interval_secs: u64,
    /// Wait between SIGTERM and kill when stopping a transcoder.
    pub terminate_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 7200,
            max_concurrent: 100,
            sweep_interval_secs: 60,
            terminate_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub min_segments: usize,
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            min_segments: 1,
            max_wait_secs: 600,
            poll_interval_ms: 500,
        }
    }
}

impl From<&ReadinessSettings> for ReadinessConfig {
    fn from(s: &ReadinessSettings) -> Self {
        ReadinessConfig {
            min_segments: s.min_segments,
            poll_interval: Duration::from_millis(s.poll_interval_ms),
            max_wait: Duration::from_secs(s.max_wait_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PredictorConfig {
    /// JSON export of the trained regression tree. The built-in rule table
    /// is used when unset or unreadable.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}
