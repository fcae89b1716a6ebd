use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::{byte_range, ChunkFetch, ChunkSource};

/// Chunks read from a file opened once.
#[derive(Debug)]
pub struct LocalFileSource {
    path: PathBuf,
    file: Mutex<File>,
    chunk_size: u64,
}

impl LocalFileSource {
    pub async fn open(path: &Path, chunk_size: u64) -> previewly_common::Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            previewly_common::Error::source_unavailable(format!(
                "cannot open {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            chunk_size,
        })
    }
}

#[async_trait]
impl ChunkSource for LocalFileSource {
    async fn fetch_chunk(&self, id: u64) -> previewly_common::Result<ChunkFetch> {
        let (start, _) = byte_range(id, self.chunk_size)?;
        let read_err = |e: std::io::Error| {
            previewly_common::Error::source_unavailable(format!(
                "read {} chunk {id}: {e}",
                self.path.display()
            ))
        };

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(start)).await.map_err(read_err)?;

        let want = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..]).await.map_err(read_err)?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(ChunkFetch::EndOfStream);
        }
        buf.truncate(filled);
        Ok(ChunkFetch::Data(Bytes::from(buf)))
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    async fn source(contents: &[u8], chunk: u64) -> (tempfile::NamedTempFile, LocalFileSource) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        let src = LocalFileSource::open(file.path(), chunk).await.unwrap();
        (file, src)
    }

    #[tokio::test]
    async fn reads_fixed_size_chunks() {
        let (_f, src) = source(b"0123456789", 4).await;
        assert_eq!(src.fetch_chunk(1).await.unwrap(), ChunkFetch::Data(Bytes::from_static(b"0123")));
        assert_eq!(src.fetch_chunk(2).await.unwrap(), ChunkFetch::Data(Bytes::from_static(b"4567")));
        assert_eq!(src.fetch_chunk(3).await.unwrap(), ChunkFetch::Data(Bytes::from_static(b"89")));
        assert_eq!(src.fetch_chunk(4).await.unwrap(), ChunkFetch::EndOfStream);
        // Random access back to the start still works.
        assert_eq!(src.fetch_chunk(1).await.unwrap(), ChunkFetch::Data(Bytes::from_static(b"0123")));
    }

    #[tokio::test]
    async fn chunk_zero_is_rejected() {
        let (_f, src) = source(b"abc", 4).await;
        assert_matches!(src.fetch_chunk(0).await, Err(previewly_common::Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFileSource::open(&dir.path().join("nope.mp4"), 4).await.unwrap_err();
        assert_matches!(err, previewly_common::Error::SourceUnavailable(_));
    }
}
