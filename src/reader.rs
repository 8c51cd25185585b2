//! Abstractions for reading byte ranges out of files.

use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};

use crate::error::MetadataResult;

/// The asynchronous interface used by the parsers to read bytes out of a file.
///
/// This was derived from the Parquet
/// [`AsyncFileReader`](https://docs.rs/parquet/latest/parquet/arrow/async_reader/trait.AsyncFileReader.html)
///
/// Reads behave like slicing a blob: a range reaching past the end of the file is clamped
/// and returns fewer bytes (possibly none) instead of failing. The parsers rely on this to
/// detect the end of a file.
///
/// Notes:
///
/// 1. [`ObjectReader`], available when the `object_store` crate feature
///    is enabled, implements this interface for [`ObjectStore`].
///
/// 2. You can use [`TokioReader`] to implement [`AsyncFileReader`] for types that implement
///    [`tokio::io::AsyncRead`] and [`tokio::io::AsyncSeek`], for example [`tokio::fs::File`].
///
/// [`ObjectStore`]: object_store::ObjectStore
///
/// [`tokio::fs::File`]: https://docs.rs/tokio/latest/tokio/fs/struct.File.html
pub trait AsyncFileReader: Debug + Send + Sync {
    /// Retrieve the bytes in `range`, clamped to the end of the file.
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>>;

    /// The total size of the file in bytes.
    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>>;
}

/// This allows Box<dyn AsyncFileReader + '_> to be used as an AsyncFileReader,
impl AsyncFileReader for Box<dyn AsyncFileReader + '_> {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        self.as_ref().get_bytes(range)
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.as_ref().size()
    }
}

/// This allows Arc<dyn AsyncFileReader + '_> to be used as an AsyncFileReader,
impl AsyncFileReader for Arc<dyn AsyncFileReader + '_> {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        self.as_ref().get_bytes(range)
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.as_ref().size()
    }
}

/// In-memory files.
impl AsyncFileReader for Bytes {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        let len = self.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.clamp(range.start.min(len), len) as usize;
        let result = self.slice(start..end);
        async { Ok(result) }.boxed()
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        let len = self.len() as u64;
        async move { Ok(len) }.boxed()
    }
}

/// Clamp `range` to a file of `size` bytes.
fn clamp_range(range: Range<u64>, size: u64) -> Range<u64> {
    let start = range.start.min(size);
    let end = range.end.clamp(start, size);
    start..end
}

/// A wrapper for things that implement [AsyncRead] and [AsyncSeek] to also implement
/// [AsyncFileReader].
///
/// This wrapper is needed because `AsyncRead` and `AsyncSeek` require mutable access to seek and
/// read data, while the `AsyncFileReader` trait requires immutable access to read data.
///
/// This wrapper stores the inner reader in a `Mutex`.
///
/// [AsyncRead]: tokio::io::AsyncRead
/// [AsyncSeek]: tokio::io::AsyncSeek
#[derive(Debug)]
pub struct TokioReader<T: tokio::io::AsyncRead + tokio::io::AsyncSeek + Unpin + Send + Debug>(
    tokio::sync::Mutex<T>,
);

impl<T: tokio::io::AsyncRead + tokio::io::AsyncSeek + Unpin + Send + Debug> TokioReader<T> {
    /// Create a new TokioReader from a reader.
    pub fn new(inner: T) -> Self {
        Self(tokio::sync::Mutex::new(inner))
    }

    async fn make_range_request(&self, range: Range<u64>) -> MetadataResult<Bytes> {
        use std::io::SeekFrom;
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let mut file = self.0.lock().await;

        let size = file.seek(SeekFrom::End(0)).await?;
        let range = clamp_range(range, size);
        file.seek(SeekFrom::Start(range.start)).await?;

        let to_read = range.end - range.start;
        let mut buffer = Vec::with_capacity(to_read as usize);
        (&mut *file).take(to_read).read_to_end(&mut buffer).await?;

        Ok(buffer.into())
    }

    async fn make_size_request(&self) -> MetadataResult<u64> {
        use std::io::SeekFrom;
        use tokio::io::AsyncSeekExt;

        let mut file = self.0.lock().await;
        Ok(file.seek(SeekFrom::End(0)).await?)
    }
}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncSeek + Unpin + Send + Debug> AsyncFileReader
    for TokioReader<T>
{
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        self.make_range_request(range).boxed()
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.make_size_request().boxed()
    }
}

/// An AsyncFileReader that reads from an [`ObjectStore`] instance.
///
/// [`ObjectStore`]: object_store::ObjectStore
#[cfg(feature = "object_store")]
#[derive(Clone, Debug)]
pub struct ObjectReader {
    store: Arc<dyn object_store::ObjectStore>,
    path: object_store::path::Path,
    size: Arc<tokio::sync::OnceCell<u64>>,
}

#[cfg(feature = "object_store")]
impl ObjectReader {
    /// Creates a new [`ObjectReader`] for the provided [`ObjectStore`] and path
    ///
    /// [`ObjectStore`]: object_store::ObjectStore
    pub fn new(store: Arc<dyn object_store::ObjectStore>, path: object_store::path::Path) -> Self {
        Self {
            store,
            path,
            size: Arc::new(tokio::sync::OnceCell::new()),
        }
    }

    async fn make_size_request(&self) -> MetadataResult<u64> {
        let size = self
            .size
            .get_or_try_init(|| async {
                let meta = self.store.head(&self.path).await?;
                Ok::<_, crate::error::MetadataError>(meta.size)
            })
            .await?;
        Ok(*size)
    }

    async fn make_range_request(&self, range: Range<u64>) -> MetadataResult<Bytes> {
        let size = self.make_size_request().await?;
        let range = clamp_range(range, size);
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        Ok(self.store.get_range(&self.path, range).await?)
    }
}

#[cfg(feature = "object_store")]
impl AsyncFileReader for ObjectReader {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        self.make_range_request(range).boxed()
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.make_size_request().boxed()
    }
}

/// An AsyncFileReader that reads from a URL using reqwest.
///
/// The file size is taken from the `Content-Length` of a `HEAD` request and cached.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct ReqwestReader {
    client: reqwest::Client,
    url: reqwest::Url,
    size: Arc<tokio::sync::OnceCell<u64>>,
}

#[cfg(feature = "reqwest")]
impl ReqwestReader {
    /// Construct a new ReqwestReader from a reqwest client and URL.
    pub fn new(client: reqwest::Client, url: reqwest::Url) -> Self {
        Self {
            client,
            url,
            size: Arc::new(tokio::sync::OnceCell::new()),
        }
    }

    async fn make_size_request(&self) -> MetadataResult<u64> {
        use crate::error::MetadataError;

        let size = self
            .size
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .head(self.url.clone())
                    .send()
                    .await?
                    .error_for_status()?;
                response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .ok_or_else(|| {
                        MetadataError::General(format!("no content length for {}", self.url))
                    })
            })
            .await?;
        Ok(*size)
    }

    async fn make_range_request(&self, range: Range<u64>) -> MetadataResult<Bytes> {
        let size = self.make_size_request().await?;
        let range = clamp_range(range, size);
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        // HTTP range is inclusive, so we need to subtract 1 from the end
        let header = format!("bytes={}-{}", range.start, range.end - 1);
        let response = self
            .client
            .get(self.url.clone())
            .header("Range", header)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}

#[cfg(feature = "reqwest")]
impl AsyncFileReader for ReqwestReader {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        self.make_range_request(range).boxed()
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.make_size_request().boxed()
    }
}

/// Buffering for the first `N` bytes of a file.
///
/// Parsers issue many small reads near the start of a file. Requests that fall inside the
/// prefetched prefix are served from memory, everything else goes to the wrapped reader.
#[derive(Debug)]
pub struct PrefetchBuffer<F: AsyncFileReader> {
    fetch: F,
    buffer: Bytes,
}

impl<F: AsyncFileReader> PrefetchBuffer<F> {
    /// Construct a new PrefetchBuffer, catching the first `prefetch` bytes of the file.
    pub async fn new(fetch: F, prefetch: u64) -> MetadataResult<Self> {
        let buffer = fetch.get_bytes(0..prefetch).await?;
        Ok(Self { fetch, buffer })
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &F {
        &self.fetch
    }
}

impl<F: AsyncFileReader> AsyncFileReader for PrefetchBuffer<F> {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, MetadataResult<Bytes>> {
        if range.end <= self.buffer.len() as u64 {
            let start = range.start.min(range.end) as usize;
            let result = self.buffer.slice(start..range.end as usize);
            async { Ok(result) }.boxed()
        } else {
            // TODO: reuse partial internal buffer
            self.fetch.get_bytes(range)
        }
    }

    fn size(&self) -> BoxFuture<'_, MetadataResult<u64>> {
        self.fetch.size()
    }
}

/// Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Little Endian
    LittleEndian,
    /// Big Endian
    #[default]
    BigEndian,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_reads_are_clamped() {
        let file = Bytes::from_static(b"0123456789");
        assert_eq!(file.get_bytes(2..5).await.unwrap(), Bytes::from_static(b"234"));
        assert_eq!(file.get_bytes(8..20).await.unwrap(), Bytes::from_static(b"89"));
        assert!(file.get_bytes(12..20).await.unwrap().is_empty());
        assert_eq!(file.size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_prefetch_serves_prefix_from_memory() {
        let file = Bytes::from_static(b"abcdefghijklmnop");
        let prefetch = PrefetchBuffer::new(file, 4).await.unwrap();
        assert_eq!(prefetch.get_bytes(1..4).await.unwrap(), Bytes::from_static(b"bcd"));
        assert_eq!(prefetch.get_bytes(2..8).await.unwrap(), Bytes::from_static(b"cdefgh"));
        assert_eq!(prefetch.size().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_tokio_reader_clamps_at_eof() {
        let reader = TokioReader::new(std::io::Cursor::new(b"hello world".to_vec()));
        assert_eq!(reader.get_bytes(6..11).await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(reader.get_bytes(6..100).await.unwrap(), Bytes::from_static(b"world"));
        assert_eq!(reader.size().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_boxed_and_shared_readers_forward() {
        let shared: Arc<dyn AsyncFileReader> = Arc::new(Bytes::from_static(b"0123456789"));
        let boxed: Box<dyn AsyncFileReader> = Box::new(shared.clone());
        assert_eq!(shared.get_bytes(7..12).await.unwrap(), Bytes::from_static(b"789"));
        assert_eq!(boxed.get_bytes(0..2).await.unwrap(), Bytes::from_static(b"01"));
        assert_eq!(boxed.size().await.unwrap(), 10);
    }
}
