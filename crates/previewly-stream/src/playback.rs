//! Playback loop.
//!
//! Walks the active window in order, fetches every id not yet delivered,
//! hands the bytes to a channel, then slides the window forward. The loop
//! ends on end of stream, cancellation, a closed receiver, or an error.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::metrics::NetworkMetrics;
use crate::source::{ChunkFetch, ChunkSource};
use crate::window::SegmentBuffer;

/// Access to a window that the loop can read and advance.
#[async_trait]
pub trait WindowCursor: Send + Sync {
    /// Currently admissible ids, oldest first.
    async fn window(&self) -> previewly_common::Result<Vec<u64>>;

    /// Slide forward by one segment.
    async fn advance(&self) -> previewly_common::Result<()>;
}

/// A [`WindowCursor`] over a shared buffer with fixed metrics.
#[derive(Debug, Clone)]
pub struct BufferCursor {
    buffer: Arc<Mutex<SegmentBuffer>>,
    metrics: NetworkMetrics,
}

impl BufferCursor {
    pub fn new(buffer: Arc<Mutex<SegmentBuffer>>, metrics: NetworkMetrics) -> Self {
        Self { buffer, metrics }
    }
}

#[async_trait]
impl WindowCursor for BufferCursor {
    async fn window(&self) -> previewly_common::Result<Vec<u64>> {
        Ok(self.buffer.lock().await.active_chunks())
    }

    async fn advance(&self) -> previewly_common::Result<()> {
        self.buffer.lock().await.slide_forward(&self.metrics);
        Ok(())
    }
}

/// How a playback loop finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The source ran out of chunks.
    EndOfStream,
    /// The token fired or the receiver went away.
    Cancelled,
}

/// Drives a [`ChunkSource`] through a [`WindowCursor`].
pub struct PlaybackLoop {
    source: Arc<dyn ChunkSource>,
    cursor: Arc<dyn WindowCursor>,
}

impl PlaybackLoop {
    pub fn new(source: Arc<dyn ChunkSource>, cursor: Arc<dyn WindowCursor>) -> Self {
        Self { source, cursor }
    }

    /// Run until the stream ends.
    ///
    /// Each id is fetched and sent at most once, in increasing order.
    ///
    /// # Errors
    ///
    /// Propagates the first fetch or window error, typically
    /// [`previewly_common::Error::SourceUnavailable`].
    pub async fn run(
        &self,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> previewly_common::Result<PlaybackEnd> {
        let mut delivered = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(PlaybackEnd::Cancelled);
            }
            let window = self.cursor.window().await?;
            for id in window {
                if id <= delivered {
                    continue;
                }
                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(PlaybackEnd::Cancelled),
                    fetched = self.source.fetch_chunk(id) => fetched?,
                };

                match fetched {
                    ChunkFetch::EndOfStream => {
                        tracing::debug!(chunk = id, "Playback reached end of stream");
                        return Ok(PlaybackEnd::EndOfStream);
                    }
                    ChunkFetch::Data(bytes) => {
                        // A slow reader must not keep the loop alive past cancellation.
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(PlaybackEnd::Cancelled),
                            sent = tx.send(bytes) => sent,
                        };
                        if sent.is_err() {
                            return Ok(PlaybackEnd::Cancelled);
                        }
                        delivered = id;
                    }
                }
            }

            self.cursor.advance().await?;
        }
    }
}
