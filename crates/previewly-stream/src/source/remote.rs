use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use url::Url;

use super::{byte_range, ChunkFetch, ChunkSource};

/// Chunks fetched with HTTP range requests.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    client: reqwest::Client,
    url: Url,
    chunk_size: u64,
}

impl RemoteSource {
    pub fn new(url: Url, chunk_size: u64, timeout: Duration) -> previewly_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| previewly_common::Error::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url,
            chunk_size,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ChunkSource for RemoteSource {
    async fn fetch_chunk(&self, id: u64) -> previewly_common::Result<ChunkFetch> {
        let (start, end) = byte_range(id, self.chunk_size)?;

        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| {
                previewly_common::Error::source_unavailable(format!("chunk {id}: {e}"))
            })?;

        let status = response.status();
        match status {
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(ChunkFetch::EndOfStream),
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            other => {
                return Err(previewly_common::Error::source_unavailable(format!(
                    "chunk {id}: origin returned HTTP {other}"
                )))
            }
        }

        // An origin that ignores Range sends the whole resource with 200;
        // skip to `start` and stop after the requested bytes either way.
        let (skip, want) = if status == StatusCode::OK {
            (start, end - start + 1)
        } else {
            (0, self.chunk_size)
        };
        let body = read_bounded(response, skip, want).await.map_err(|e| {
            previewly_common::Error::source_unavailable(format!("chunk {id} body: {e}"))
        })?;

        if body.is_empty() {
            return Ok(ChunkFetch::EndOfStream);
        }
        tracing::trace!(chunk = id, bytes = body.len(), "Fetched remote chunk");
        Ok(ChunkFetch::Data(body))
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

/// Upper bound on the up-front buffer reservation.
const RESERVE_LIMIT: u64 = 1024 * 1024;

/// Read at most `want` body bytes after discarding the first `skip`. The
/// rest of the body is left unread.
async fn read_bounded(
    mut response: reqwest::Response,
    mut skip: u64,
    want: u64,
) -> reqwest::Result<Bytes> {
    let mut out = BytesMut::with_capacity(want.min(RESERVE_LIMIT) as usize);
    while (out.len() as u64) < want {
        let Some(mut part) = response.chunk().await? else {
            break;
        };
        if skip > 0 {
            let dropped = skip.min(part.len() as u64);
            skip -= dropped;
            part = part.slice(dropped as usize..);
        }
        let room = (want - out.len() as u64).min(part.len() as u64) as usize;
        out.extend_from_slice(&part[..room]);
    }
    Ok(out.freeze())
}
