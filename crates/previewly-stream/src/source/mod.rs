//! Chunk sources.
//!
//! A [`ChunkSource`] returns the bytes of chunk `id` (1-based, fixed size)
//! from the original media. [`LocalFileSource`] reads a file on disk,
//! [`RemoteSource`] issues HTTP range requests.

mod local;
mod remote;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

pub use local::LocalFileSource;
pub use remote::RemoteSource;

/// Result of fetching one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFetch {
    Data(Bytes),
    /// The requested chunk starts past the end of the media.
    EndOfStream,
}

/// Largest accepted chunk size. Each fetch buffers one chunk in memory.
pub const MAX_CHUNK_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// Chunk source settings (the `[source]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Bytes per chunk.
    pub chunk_size_bytes: u64,
    /// Upper bound on one remote fetch.
    pub fetch_timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 1024 * 1024,
            fetch_timeout_secs: 10,
        }
    }
}

impl SourceSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Byte source addressed by chunk id.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch chunk `id`.
    ///
    /// # Errors
    ///
    /// - [`previewly_common::Error::InvalidInput`] for `id == 0`.
    /// - [`previewly_common::Error::SourceUnavailable`] when the origin
    ///   cannot serve the range.
    async fn fetch_chunk(&self, id: u64) -> previewly_common::Result<ChunkFetch>;

    fn chunk_size(&self) -> u64;
}

/// Inclusive byte range `[start, end]` of chunk `id`.
pub fn byte_range(id: u64, chunk_size: u64) -> previewly_common::Result<(u64, u64)> {
    if id == 0 {
        return Err(previewly_common::Error::invalid_input(
            "chunk ids start at 1",
        ));
    }
    if chunk_size == 0 {
        return Err(previewly_common::Error::invalid_input(
            "chunk size must be positive",
        ));
    }
    let start = (id - 1)
        .checked_mul(chunk_size)
        .ok_or_else(|| previewly_common::Error::invalid_input(format!("chunk {id} is out of range")))?;
    Ok((start, start + (chunk_size - 1)))
}

/// Build the source matching the locator's scheme.
///
/// `file` URLs are read from disk; `http` and `https` use range requests.
pub async fn for_url(
    url: &Url,
    settings: &SourceSettings,
) -> previewly_common::Result<Box<dyn ChunkSource>> {
    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|()| {
                previewly_common::Error::invalid_input(format!("not a local path: {url}"))
            })?;
            let source = LocalFileSource::open(&path, settings.chunk_size_bytes).await?;
            Ok(Box::new(source))
        }
        "http" | "https" => Ok(Box::new(RemoteSource::new(
            url.clone(),
            settings.chunk_size_bytes,
            settings.fetch_timeout(),
        )?)),
        other => Err(previewly_common::Error::invalid_input(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}
