use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::MAX_DOWNLOAD_CHUNK_SIZE, ByteRange, ByteStream, MultipartConfig, MultipartError,
    MultipartResult, ObjectStore, RetryPolicy,
};

/// Outcome of a finished download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub bytes: u64,
    pub chunks: u64,
}

/// Inclusive ranges covering `[0, size - 1]` in steps of `chunk_size`.
///
/// Yields nothing for an empty object.
pub fn chunk_ranges(size: u64, chunk_size: u64) -> impl Iterator<Item = ByteRange> {
    let chunk_size = chunk_size.max(1);
    std::iter::successors((size > 0).then_some(0_u64), move |&start| {
        let next = start.saturating_add(chunk_size);
        (next < size).then_some(next)
    })
    .map(move |start| ByteRange::new(start, start.saturating_add(chunk_size - 1).min(size - 1)))
}

/// Streams objects through sequential ranged reads so that at most one chunk
/// is held in memory, whatever the object size.
///
/// A chunk is handed to the sink only once it has been read completely; a
/// failed read is retried by re-requesting the same range, so retries never
/// duplicate output. Nothing survives a download that gives up: the caller
/// restarts from offset 0.
#[derive(Clone)]
pub struct ChunkedDownloader {
    store: Arc<dyn ObjectStore>,
    chunk_size: u64,
    retry: RetryPolicy,
}

impl ChunkedDownloader {
    pub fn new<S: ObjectStore + 'static>(store: S, config: &MultipartConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    pub fn from_arc(store: Arc<dyn ObjectStore>, config: &MultipartConfig) -> Self {
        Self {
            store,
            chunk_size: config.download_chunk_size.clamp(1, MAX_DOWNLOAD_CHUNK_SIZE),
            retry: config.download_retry.clone(),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Write the whole object at `file_name` into `sink`
    #[instrument(skip(self, sink))]
    pub async fn download<W>(
        &self,
        file_name: &str,
        sink: &mut W,
    ) -> MultipartResult<DownloadSummary>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let head = self.store.head_object(file_name).await?;
        let mut summary = DownloadSummary::default();

        for range in chunk_ranges(head.size_bytes, self.chunk_size) {
            let chunk = fetch_chunk(self.store.as_ref(), &self.retry, file_name, range).await?;
            sink.write_all(&chunk).await?;

            summary.bytes += chunk.len() as u64;
            summary.chunks += 1;
            debug!(chunk = summary.chunks, %range, "chunk written");
        }
        sink.flush().await?;

        info!(bytes = summary.bytes, chunks = summary.chunks, "download finished");
        Ok(summary)
    }

    /// Lazily stream the object one chunk at a time.
    ///
    /// The size lookup happens up front, so a missing object fails here
    /// rather than inside the stream. Dropping the stream cancels the
    /// in-flight read.
    pub async fn stream(&self, file_name: &str) -> MultipartResult<ByteStream> {
        let size = self.store.head_object(file_name).await?.size_bytes;

        let store = self.store.clone();
        let retry = self.retry.clone();
        let key = file_name.to_string();
        let ranges: Vec<ByteRange> = chunk_ranges(size, self.chunk_size).collect();

        let stream = async_stream::stream! {
            for range in ranges {
                match fetch_chunk(store.as_ref(), &retry, &key, range).await {
                    Ok(chunk) => yield Ok(chunk),
                    Err(err) => {
                        yield Err(std::io::Error::other(err));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Read `range` completely, retrying the identical range with backoff
async fn fetch_chunk(
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    key: &str,
    range: ByteRange,
) -> MultipartResult<Bytes> {
    let mut attempt = 1;
    loop {
        match read_range(store, key, range).await {
            Ok(chunk) => return Ok(chunk),
            Err(err) if attempt < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                warn!(%range, attempt, ?delay, error = %err, "ranged read failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn read_range(
    store: &dyn ObjectStore,
    key: &str,
    range: ByteRange,
) -> MultipartResult<Bytes> {
    let expected = range.length();
    let mut body = store.get_object(key, range).await?;
    let mut buffer = BytesMut::with_capacity(expected as usize);

    while let Some(piece) = body.next().await {
        let piece = piece.map_err(|e| MultipartError::upstream("GetObject", e))?;
        if buffer.len() as u64 + piece.len() as u64 > expected {
            return Err(MultipartError::upstream_message(
                "GetObject",
                format!("range {} returned more than {} bytes", range, expected),
            ));
        }
        buffer.extend_from_slice(&piece);
    }

    if buffer.len() as u64 != expected {
        return Err(MultipartError::upstream_message(
            "GetObject",
            format!("short read for range {}: got {} of {} bytes", range, buffer.len(), expected),
        ));
    }
    Ok(buffer.freeze())
}
