mod types;

pub use types::*;

use anyhow::{Context, Result};
use previewly_stream::source::MAX_CHUNK_SIZE_BYTES;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./previewly.toml",
        "~/.config/previewly/config.toml",
        "/etc/previewly/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Expand `~` in every configured path.
fn expand_paths(config: &mut Config) {
    config.server.hls_dir = expand(&config.server.hls_dir);
    if let Some(dir) = &config.server.static_dir {
        config.server.static_dir = Some(expand(dir));
    }
    if let Some(path) = &config.tools.ffmpeg_path {
        config.tools.ffmpeg_path = Some(expand(path));
    }
    if let Some(path) = &config.predictor.model_path {
        config.predictor.model_path = Some(expand(path));
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.buffer.segment_duration_secs == 0 {
        anyhow::bail!("buffer.segment_duration_secs must be positive");
    }
    if config.buffer.forward_cap == 0 {
        anyhow::bail!("buffer.forward_cap must be at least 1");
    }

    if config.readiness.min_segments == 0 {
        anyhow::bail!("readiness.min_segments must be at least 1");
    }
    if config.readiness.poll_interval_ms == 0 {
        anyhow::bail!("readiness.poll_interval_ms must be positive");
    }

    if config.session.max_concurrent == 0 {
        anyhow::bail!("session.max_concurrent must be at least 1");
    }
    if config.session.sweep_interval_secs == 0 {
        anyhow::bail!("session.sweep_interval_secs must be positive");
    }

    if config.source.chunk_size_bytes == 0 {
        anyhow::bail!("source.chunk_size_bytes must be positive");
    }
    if config.source.chunk_size_bytes > MAX_CHUNK_SIZE_BYTES {
        anyhow::bail!(
            "source.chunk_size_bytes must be at most {} (got {})",
            MAX_CHUNK_SIZE_BYTES,
            config.source.chunk_size_bytes
        );
    }
    if config.source.fetch_timeout_secs == 0 {
        anyhow::bail!("source.fetch_timeout_secs must be positive");
    }

    if config.buffer.sizing == SizingMode::Adaptive {
        if let Some(path) = &config.predictor.model_path {
            if !path.exists() {
                tracing::warn!(
                    "Predictor model {:?} does not exist; the built-in rule table will be used",
                    path
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.hls_dir, PathBuf::from("./data/hls"));
        assert_eq!(config.buffer.segment_duration_secs, 30);
        assert_eq!(config.buffer.backward_segments(), 4);
        assert_eq!(config.buffer.forward_segments(), 4);
        assert_eq!(config.session.timeout_secs, 7200);
        assert_eq!(config.session.max_concurrent, 100);
        assert_eq!(config.readiness.min_segments, 1);
        assert_eq!(config.readiness.max_wait_secs, 600);
        assert_eq!(config.readiness.poll_interval_ms, 500);
        assert_eq!(config.transcoder.video_codec, "libx264");
        assert_eq!(config.transcoder.audio_codec, "aac");
        assert_eq!(config.buffer.sizing, SizingMode::Static);
        validate_config(&config).unwrap();
    }

    #[test]
    fn partial_file_fills_defaults() {
        let file = write_config(
            r#"
            [server]
            port = 9000

            [buffer]
            segment_duration_secs = 6
            sizing = "adaptive"

            [readiness]
            min_segments = 3
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.buffer.sizing, SizingMode::Adaptive);
        assert_eq!(config.buffer.forward_segments(), 20);
        assert_eq!(config.readiness.min_segments, 3);
        assert_eq!(config.readiness.max_wait_secs, 600);
        assert_eq!(config.session.max_concurrent, 100);
    }

    #[test]
    fn partial_window_rounds_up() {
        let buffer = BufferConfig {
            segment_duration_secs: 45,
            backward_secs: 100,
            ..Default::default()
        };
        assert_eq!(buffer.backward_segments(), 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            "[server]\nport = 0",
            "[buffer]\nsegment_duration_secs = 0",
            "[buffer]\nforward_cap = 0",
            "[readiness]\nmin_segments = 0",
            "[session]\nmax_concurrent = 0",
            "[source]\nchunk_size_bytes = 0",
            "[source]\nchunk_size_bytes = 67108865",
            "[source]\nfetch_timeout_secs = 0",
        ] {
            let file = write_config(bad);
            assert!(load_config(file.path()).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn chunk_size_limit_is_inclusive() {
        let file = write_config(&format!("[source]\nchunk_size_bytes = {MAX_CHUNK_SIZE_BYTES}"));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.source.chunk_size_bytes, MAX_CHUNK_SIZE_BYTES);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let file = write_config("[server\nport = ");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn missing_model_is_only_a_warning() {
        let file = write_config(
            r#"
            [buffer]
            sizing = "adaptive"

            [predictor]
            model_path = "/does/not/exist.json"
            "#,
        );
        assert!(load_config(file.path()).is_ok());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(load_config_or_default(Some(Path::new("/no/such/previewly.toml"))).is_err());
    }
}
