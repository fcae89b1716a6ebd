//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a [`SessionRegistry`] backed by a
//! scripted `sh` transcoder and a temporary HLS root, plus the matching
//! [`AppContext`]. [`TestHarness::with_server`] starts Axum on a random port
//! for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use previewly::config::Config;
use previewly::server::{create_router, AppContext};
use previewly::session::{sizing_policy, RegistrySettings, SessionRegistry};
use previewly_av::{PreviewDir, ReadinessConfig, ToolCommand, Transcoder};
use tempfile::TempDir;
use url::Url;

/// Source locator used when the transcoder ignores its input.
pub const REMOTE_SOURCE: &str = "https://cdn.example.com/videos/sample.mp4";

/// What the fake transcoder does once spawned.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Write `segments` segments and the manifest, then keep running.
    Steady { segments: usize },
    /// Write `segments` segments and the manifest, then exit 0.
    ExitAfter { segments: usize },
    /// Print an error to stderr and exit 1 without output.
    Fail,
    /// Keep running without producing anything.
    Hang,
}

impl Script {
    fn body(self) -> String {
        let write = |n: usize| {
            format!(
                "i=0; while [ $i -lt {n} ]; do printf 'ts' > \"$(printf 'segment%03d.ts' $i)\"; i=$((i+1)); done; \
                 printf '#EXTM3U\\n' > playlist.m3u8; "
            )
        };
        match self {
            Script::Steady { segments } => format!("cd \"$1\" && {}exec sleep 30", write(segments)),
            Script::ExitAfter { segments } => format!("cd \"$1\" && {}exit 0", write(segments)),
            Script::Fail => "echo 'fake: cannot open input' >&2; exit 1".to_string(),
            Script::Hang => "exec sleep 30".to_string(),
        }
    }
}

/// Transcoder that runs a shell script in the session directory.
#[derive(Debug, Clone)]
pub struct ShellTranscoder {
    script: Script,
}

impl ShellTranscoder {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl Transcoder for ShellTranscoder {
    fn name(&self) -> &str {
        "sh"
    }

    fn command(&self, _source: &Url, dir: &PreviewDir) -> ToolCommand {
        let mut cmd = ToolCommand::new(PathBuf::from("/bin/sh"));
        cmd.arg("-c")
            .arg(self.script.body())
            .arg("sh")
            .arg(dir.path().to_string_lossy().to_string());
        cmd
    }
}

/// Readiness settings fast enough for tests.
pub fn fast_readiness(min_segments: usize) -> ReadinessConfig {
    ReadinessConfig {
        min_segments,
        poll_interval: Duration::from_millis(20),
        max_wait: Duration::from_secs(3),
    }
}

/// Test harness wrapping a registry, its [`AppContext`] and the temporary
/// HLS root it writes to.
pub struct TestHarness {
    pub ctx: AppContext,
    pub registry: SessionRegistry,
    pub hls_root: TempDir,
}

impl TestHarness {
    /// Harness whose transcoder produces two segments and keeps running.
    pub fn new() -> Self {
        Self::with_script(Script::Steady { segments: 2 })
    }

    pub fn with_script(script: Script) -> Self {
        Self::build(script, |_| {})
    }

    /// Build a harness, letting the caller adjust registry settings.
    pub fn build(script: Script, configure: impl FnOnce(&mut RegistrySettings)) -> Self {
        let hls_root = tempfile::tempdir().expect("failed to create HLS root");

        let mut config = Config::default();
        config.server.hls_dir = hls_root.path().to_path_buf();

        let mut settings = RegistrySettings::from_config(&config);
        settings.readiness = fast_readiness(1);
        settings.terminate_grace = Duration::from_secs(2);
        configure(&mut settings);

        let registry = SessionRegistry::new(
            settings,
            Arc::new(ShellTranscoder::new(script)),
            sizing_policy(&config),
        );
        let ctx = AppContext {
            registry: registry.clone(),
            config: Arc::new(config),
        };

        Self {
            ctx,
            registry,
            hls_root,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::serve(Self::new()).await
    }

    pub async fn serve(harness: Self) -> (Self, SocketAddr) {
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn hls_path(&self) -> &Path {
        self.hls_root.path()
    }

    /// Names of the entries currently under the HLS root.
    pub fn preview_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.hls_path())
            .expect("failed to read HLS root")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

/// Write `content` to a file and return its `file://` locator.
pub fn local_source(dir: &Path, content: &[u8]) -> String {
    let path = dir.join("source.bin");
    std::fs::write(&path, content).expect("failed to write source file");
    Url::from_file_path(&path)
        .expect("absolute path")
        .to_string()
}
