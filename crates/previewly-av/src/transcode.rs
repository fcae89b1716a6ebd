//! HLS transcoder invocation.
//!
//! A [`Transcoder`] turns a source locator and a [`PreviewDir`] into the
//! [`ToolCommand`] that materializes `playlist.m3u8` plus numbered segments.
//! [`FfmpegHls`] is the production implementation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;
use crate::workspace::PreviewDir;

/// File naming inside a session's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Manifest file name.
    pub manifest_name: String,
    /// Leading part of every segment file name.
    pub segment_prefix: String,
    /// Segment file extension without the dot.
    pub segment_extension: String,
}

impl Default for SegmentLayout {
    fn default() -> Self {
        Self {
            manifest_name: "playlist.m3u8".into(),
            segment_prefix: "segment".into(),
            segment_extension: "ts".into(),
        }
    }
}

impl SegmentLayout {
    /// The printf-style pattern handed to ffmpeg, e.g. `segment%03d.ts`.
    pub fn segment_pattern(&self) -> String {
        format!("{}%03d.{}", self.segment_prefix, self.segment_extension)
    }

    /// Name of the segment with the given zero-based index.
    pub fn segment_name(&self, index: usize) -> String {
        format!(
            "{}{index:03}.{}",
            self.segment_prefix, self.segment_extension
        )
    }

    /// Whether a file name is a segment artifact.
    pub fn is_segment(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(self.segment_prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.segment_extension.as_str()))
            .is_some_and(|stem| stem.ends_with('.'))
    }
}

/// Encoder settings (the `[transcoder]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    /// ffmpeg video encoder.
    pub video_codec: String,
    /// ffmpeg audio encoder.
    pub audio_codec: String,
    /// Encoder speed preset.
    pub preset: String,
    /// Extra arguments inserted before the HLS muxer options.
    pub extra_args: Vec<String>,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            preset: "fast".into(),
            extra_args: Vec::new(),
        }
    }
}

/// Something that can produce an HLS rendition of a source into a directory.
pub trait Transcoder: Send + Sync {
    /// Short name used in logs and launch errors.
    fn name(&self) -> &str;

    /// Build the command that writes the manifest and segments into `dir`.
    fn command(&self, source: &Url, dir: &PreviewDir) -> ToolCommand;
}

/// ffmpeg-backed HLS transcoder.
#[derive(Debug, Clone)]
pub struct FfmpegHls {
    ffmpeg: PathBuf,
    settings: TranscodeSettings,
    segment_duration_secs: u32,
}

impl FfmpegHls {
    /// Create a transcoder using an explicit ffmpeg path.
    pub fn new(ffmpeg: PathBuf, settings: TranscodeSettings, segment_duration_secs: u32) -> Self {
        Self {
            ffmpeg,
            settings,
            segment_duration_secs,
        }
    }

    /// Create a transcoder from a discovered tool registry.
    ///
    /// # Errors
    ///
    /// Returns [`previewly_common::Error::LaunchFailure`] if ffmpeg is not
    /// available.
    pub fn from_registry(
        tools: &ToolRegistry,
        settings: TranscodeSettings,
        segment_duration_secs: u32,
    ) -> previewly_common::Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?;
        Ok(Self::new(
            ffmpeg.to_path_buf(),
            settings,
            segment_duration_secs,
        ))
    }
}

/// ffmpeg reads local files by path; everything else is passed through.
fn input_arg(source: &Url) -> String {
    if source.scheme() == "file" {
        if let Ok(path) = source.to_file_path() {
            return path.to_string_lossy().to_string();
        }
    }
    source.to_string()
}

impl Transcoder for FfmpegHls {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn command(&self, source: &Url, dir: &PreviewDir) -> ToolCommand {
        let s = &self.settings;
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(["-y", "-i"]);
        cmd.arg(input_arg(source));
        cmd.args(["-codec:v", &s.video_codec, "-preset", &s.preset]);
        cmd.args(["-codec:a", &s.audio_codec]);
        cmd.args(s.extra_args.iter().cloned());
        cmd.args(["-hls_time", &self.segment_duration_secs.to_string()]);
        cmd.args(["-hls_list_size", "0"]);
        cmd.arg("-hls_segment_filename");
        cmd.arg(dir.segment_pattern().to_string_lossy());
        cmd.args(["-f", "hls"]);
        cmd.arg(dir.manifest_path().to_string_lossy());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_names() {
        let layout = SegmentLayout::default();
        assert_eq!(layout.segment_pattern(), "segment%03d.ts");
        assert_eq!(layout.segment_name(0), "segment000.ts");
        assert_eq!(layout.segment_name(12), "segment012.ts");
    }

    #[test]
    fn layout_matches_segments_only() {
        let layout = SegmentLayout::default();
        assert!(layout.is_segment("segment000.ts"));
        assert!(layout.is_segment("segment1234.ts"));
        assert!(!layout.is_segment("playlist.m3u8"));
        assert!(!layout.is_segment("segment000.ts.tmp"));
        assert!(!layout.is_segment("other000.ts"));
        assert!(!layout.is_segment("segment000ts"));
    }

    #[test]
    fn ffmpeg_command_shape() {
        let root = tempfile::tempdir().unwrap();
        let dir = PreviewDir::create(root.path(), "preview_test", SegmentLayout::default()).unwrap();
        let hls = FfmpegHls::new(PathBuf::from("/usr/bin/ffmpeg"), TranscodeSettings::default(), 30);

        let source = Url::parse("https://cdn.example.com/video.mp4").unwrap();
        let cmd = hls.command(&source, &dir);
        let args = cmd.get_args();

        assert_eq!(cmd.program_name(), "ffmpeg");
        assert_eq!(&args[..3], ["-y", "-i", "https://cdn.example.com/video.mp4"]);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-codec:v") + 1], "libx264");
        assert_eq!(args[pos("-codec:a") + 1], "aac");
        assert_eq!(args[pos("-preset") + 1], "fast");
        assert_eq!(args[pos("-hls_time") + 1], "30");
        assert_eq!(args[pos("-hls_list_size") + 1], "0");
        assert_eq!(args[pos("-f") + 1], "hls");
        assert!(args[pos("-hls_segment_filename") + 1].ends_with("segment%03d.ts"));
        assert!(args.last().unwrap().ends_with("playlist.m3u8"));
    }

    #[test]
    fn file_urls_become_paths_and_extra_args_are_inserted() {
        let root = tempfile::tempdir().unwrap();
        let dir = PreviewDir::create(root.path(), "preview_test", SegmentLayout::default()).unwrap();
        let settings = TranscodeSettings {
            extra_args: vec!["-threads".into(), "2".into()],
            ..Default::default()
        };
        let hls = FfmpegHls::new(PathBuf::from("ffmpeg"), settings, 6);

        let source = Url::parse("file:///media/clip.mkv").unwrap();
        let cmd = hls.command(&source, &dir);
        let args = cmd.get_args();

        assert_eq!(args[2], "/media/clip.mkv");
        let threads = args.iter().position(|a| a == "-threads").unwrap();
        let hls_time = args.iter().position(|a| a == "-hls_time").unwrap();
        assert!(threads < hls_time);
        assert_eq!(args[hls_time + 1], "6");
    }

    #[test]
    fn from_registry_requires_ffmpeg() {
        let err = FfmpegHls::from_registry(&ToolRegistry::default(), TranscodeSettings::default(), 30)
            .unwrap_err();
        assert!(matches!(err, previewly_common::Error::LaunchFailure { .. }));
    }
}
