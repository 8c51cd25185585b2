//! The parser worker: receives URLs over a message port and answers with parsed metadata.
//!
//! ```ignore
//! let (worker_port, client_port) = message_channel();
//! let dispatcher = MetadataDispatcher::new(ParserRegistry::default(), Arc::new(LocalFileResolver));
//! tokio::spawn(dispatcher.serve(worker_port));
//! ```

use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{MetadataError, MetadataResult};
use crate::parsers::{MetadataParser, ParserMetadata, ParserRegistry};
#[cfg(feature = "object_store")]
use crate::reader::ObjectReader;
use crate::reader::{AsyncFileReader, PrefetchBuffer, TokioReader};
#[cfg(feature = "reqwest")]
use crate::reader::ReqwestReader;

/// Messages sent to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherRequest {
    /// Ask for the URL patterns of the registered parsers.
    Init,
    /// Parse the file at `url`.
    Request {
        /// The file to parse.
        url: String,
    },
}

/// The stage of a request at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseStep {
    /// No parser accepts the URL.
    DetectFormat,
    /// The URL could not be opened.
    ResolveFile,
    /// The file size could not be read.
    ReadSize,
    /// The parser failed.
    ParseContent,
}

impl fmt::Display for ParseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DetectFormat => "detect_format",
            Self::ResolveFile => "resolve_file",
            Self::ReadSize => "read_size",
            Self::ParseContent => "parse_content",
        })
    }
}

/// Messages sent by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherResponse {
    /// Reply to [`DispatcherRequest::Init`].
    Initialized {
        /// URL filter patterns, in parser order.
        patterns: Vec<String>,
    },
    /// A file was parsed.
    Result {
        /// The requested URL.
        url: String,
        /// What the parser found.
        metadata: ParserMetadata,
    },
    /// A file could not be parsed.
    Error {
        /// The requested URL.
        url: String,
        /// Where the request failed.
        step: ParseStep,
        /// Description of the failure.
        cause: String,
        /// The metadata known before the failure (type, mime type, size).
        metadata: ParserMetadata,
    },
    /// A log line, only sent when [`DispatcherOptions::verbose`] is set.
    Log {
        /// The message.
        message: String,
    },
}

/// One end of a bidirectional channel, receiving `In` and sending `Out`.
#[derive(Debug)]
pub struct MessagePort<In, Out> {
    sender: UnboundedSender<Out>,
    receiver: UnboundedReceiver<In>,
}

/// Create a connected pair of ports.
pub fn message_channel<A, B>() -> (MessagePort<A, B>, MessagePort<B, A>) {
    let (a_tx, a_rx) = unbounded_channel();
    let (b_tx, b_rx) = unbounded_channel();
    (
        MessagePort {
            sender: b_tx,
            receiver: a_rx,
        },
        MessagePort {
            sender: a_tx,
            receiver: b_rx,
        },
    )
}

impl<In, Out> MessagePort<In, Out> {
    /// Send a message to the other end.
    pub fn send(&self, message: Out) -> MetadataResult<()> {
        self.sender
            .send(message)
            .map_err(|_| MetadataError::General("message port closed".to_string()))
    }

    /// Receive the next message. Returns `None` once the other end is dropped.
    pub async fn recv(&mut self) -> Option<In> {
        self.receiver.recv().await
    }

    /// A handle for sending from other tasks.
    pub fn sender(&self) -> UnboundedSender<Out> {
        self.sender.clone()
    }

    /// Split into the sending and receiving halves.
    pub fn split(self) -> (UnboundedSender<Out>, UnboundedReceiver<In>) {
        (self.sender, self.receiver)
    }
}

/// Opens files by URL.
pub trait FileResolver: Debug + Send + Sync {
    /// Open the file at `url`.
    fn resolve<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, MetadataResult<Arc<dyn AsyncFileReader>>>;
}

/// The local path named by a `file://` URL (percent-decoded) or by a plain path.
pub fn local_path(url: &str) -> MetadataResult<PathBuf> {
    if !url.starts_with("file:") {
        return Ok(PathBuf::from(url));
    }
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.to_file_path().ok())
        .ok_or_else(|| MetadataError::General(format!("not a local file url: {url}")))
}

/// Resolves `file://` URLs and plain paths on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileResolver;

impl FileResolver for LocalFileResolver {
    fn resolve<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, MetadataResult<Arc<dyn AsyncFileReader>>> {
        async move {
            let file = tokio::fs::File::open(local_path(url)?).await?;
            Ok(Arc::new(TokioReader::new(file)) as Arc<dyn AsyncFileReader>)
        }
        .boxed()
    }
}

/// Resolves URLs to objects in an [`ObjectStore`].
///
/// `prefix` (for example `"s3://bucket/"`) is stripped from each URL and the rest is used as
/// the object path.
///
/// [`ObjectStore`]: object_store::ObjectStore
#[cfg(feature = "object_store")]
#[derive(Debug, Clone)]
pub struct ObjectStoreResolver {
    store: Arc<dyn object_store::ObjectStore>,
    prefix: String,
}

#[cfg(feature = "object_store")]
impl ObjectStoreResolver {
    /// Create a resolver over `store` for URLs starting with `prefix`.
    pub fn new(store: Arc<dyn object_store::ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

#[cfg(feature = "object_store")]
impl FileResolver for ObjectStoreResolver {
    fn resolve<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, MetadataResult<Arc<dyn AsyncFileReader>>> {
        async move {
            let key = url.strip_prefix(self.prefix.as_str()).ok_or_else(|| {
                MetadataError::General(format!("{url} is outside of {}", self.prefix))
            })?;
            let path = object_store::path::Path::parse(key)
                .map_err(|e| MetadataError::General(e.to_string()))?;
            Ok(Arc::new(ObjectReader::new(self.store.clone(), path)) as Arc<dyn AsyncFileReader>)
        }
        .boxed()
    }
}

/// Resolves `http://` and `https://` URLs to range requests.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone, Default)]
pub struct HttpResolver {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl HttpResolver {
    /// Create a resolver sending requests with `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest")]
impl FileResolver for HttpResolver {
    fn resolve<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, MetadataResult<Arc<dyn AsyncFileReader>>> {
        async move {
            let url = reqwest::Url::parse(url).map_err(|e| MetadataError::General(e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(MetadataError::General(format!("not an http url: {url}")));
            }
            Ok(Arc::new(ReqwestReader::new(self.client.clone(), url)) as Arc<dyn AsyncFileReader>)
        }
        .boxed()
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Post a [`DispatcherResponse::Log`] for every request.
    pub verbose: bool,
    /// Read this many bytes from the start of each file up front and serve parser reads
    /// inside that prefix from memory.
    pub prefetch: Option<u64>,
}

/// Routes parse requests to the first parser whose URL filter matches.
#[derive(Debug, Clone)]
pub struct MetadataDispatcher {
    registry: Arc<ParserRegistry>,
    resolver: Arc<dyn FileResolver>,
    options: DispatcherOptions,
}

impl MetadataDispatcher {
    /// Create a dispatcher with default options.
    pub fn new(registry: ParserRegistry, resolver: Arc<dyn FileResolver>) -> Self {
        Self::with_options(registry, resolver, DispatcherOptions::default())
    }

    /// Create a dispatcher.
    pub fn with_options(
        registry: ParserRegistry,
        resolver: Arc<dyn FileResolver>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            resolver,
            options,
        }
    }

    /// The registered parsers.
    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Answer requests from `port` until the other end is dropped.
    ///
    /// Requests are processed concurrently; responses are sent as they complete.
    pub async fn serve(self, port: MessagePort<DispatcherRequest, DispatcherResponse>) {
        let (sender, receiver) = port.split();
        let requests = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|request| (request, receiver))
        });
        requests
            .for_each_concurrent(None, |request| {
                let sender = sender.clone();
                let this = &self;
                async move {
                    match request {
                        DispatcherRequest::Init => {
                            let patterns = this.registry.patterns();
                            let _ = sender.send(DispatcherResponse::Initialized { patterns });
                        }
                        DispatcherRequest::Request { url } => {
                            if this.options.verbose {
                                let _ = sender.send(DispatcherResponse::Log {
                                    message: format!("Processing {url}"),
                                });
                            }
                            let response = this.process(url).await;
                            if this.options.verbose {
                                if let DispatcherResponse::Error { url, step, cause, .. } = &response {
                                    let _ = sender.send(DispatcherResponse::Log {
                                        message: format!("Error processing {url} at {step}: {cause}"),
                                    });
                                }
                            }
                            // The client going away is not an error for the worker.
                            let _ = sender.send(response);
                        }
                    }
                }
            })
            .await;
        tracing::debug!("message port closed, dispatcher stopping");
    }

    /// Parse one file.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, url: String) -> DispatcherResponse {
        let failed = |url: String, step: ParseStep, err: MetadataError, metadata: ParserMetadata| {
            tracing::info!(%url, %step, error = %err, "metadata parse failed");
            DispatcherResponse::Error {
                url,
                step,
                cause: err.to_string(),
                metadata,
            }
        };

        let Some(parser) = self.registry.detect(&url) else {
            let err = MetadataError::UnsupportedFormat(url.clone());
            return failed(url, ParseStep::DetectFormat, err, ParserMetadata::default());
        };
        let mut metadata = ParserMetadata::new(parser.name(), parser.mime_type());

        let file = match self.open(&url).await {
            Ok(file) => file,
            Err(e) => return failed(url, ParseStep::ResolveFile, e, metadata),
        };

        match file.size().await {
            Ok(size) => metadata.file_size = Some(size),
            Err(e) => return failed(url, ParseStep::ReadSize, e, metadata),
        }

        match parse_with(parser.as_ref(), file.as_ref(), metadata.clone()).await {
            Ok(metadata) => DispatcherResponse::Result { url, metadata },
            Err(e) => failed(url, ParseStep::ParseContent, e, metadata),
        }
    }

    async fn open(&self, url: &str) -> MetadataResult<Arc<dyn AsyncFileReader>> {
        let file = self.resolver.resolve(url).await?;
        match self.options.prefetch {
            Some(prefetch) => {
                let buffered = PrefetchBuffer::new(file, prefetch).await?;
                Ok(Arc::new(buffered) as Arc<dyn AsyncFileReader>)
            }
            None => Ok(file),
        }
    }
}

async fn parse_with(
    parser: &dyn MetadataParser,
    file: &dyn AsyncFileReader,
    metadata: ParserMetadata,
) -> MetadataResult<ParserMetadata> {
    parser.parse(file, metadata).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;

    #[derive(Debug, Default)]
    struct MemoryResolver(HashMap<String, Bytes>);

    impl FileResolver for MemoryResolver {
        fn resolve<'a>(
            &'a self,
            url: &'a str,
        ) -> BoxFuture<'a, MetadataResult<Arc<dyn AsyncFileReader>>> {
            let file = self.0.get(url).cloned();
            async move {
                let file = file.ok_or_else(|| MetadataError::General(format!("not found: {url}")))?;
                Ok(Arc::new(file) as Arc<dyn AsyncFileReader>)
            }
            .boxed()
        }
    }

    fn dispatcher(files: &[(&str, &'static [u8])], options: DispatcherOptions) -> MetadataDispatcher {
        let files = files
            .iter()
            .map(|(url, data)| (url.to_string(), Bytes::from_static(data)))
            .collect();
        MetadataDispatcher::with_options(
            ParserRegistry::default(),
            Arc::new(MemoryResolver(files)),
            options,
        )
    }

    #[tokio::test]
    async fn test_process_steps() {
        let gif: &'static [u8] = b"GIF89a\x02\x00\x03\x00";
        let d = dispatcher(&[("a.gif", gif), ("bad.png", &b"nope"[..])], Default::default());

        match d.process("a.gif".into()).await {
            DispatcherResponse::Result { metadata, .. } => {
                assert_eq!(metadata.type_name, "gif");
                assert_eq!(metadata.mime_type.as_deref(), Some("image/gif"));
                assert_eq!(metadata.file_size, Some(10));
                assert_eq!((metadata.width, metadata.height), (Some(2), Some(3)));
            }
            other => panic!("unexpected {other:?}"),
        }

        match d.process("notes.txt".into()).await {
            DispatcherResponse::Error { step, cause, .. } => {
                assert_eq!(step, ParseStep::DetectFormat);
                assert_eq!(cause, "unsupported format");
            }
            other => panic!("unexpected {other:?}"),
        }

        match d.process("missing.png".into()).await {
            DispatcherResponse::Error { step, metadata, .. } => {
                assert_eq!(step, ParseStep::ResolveFile);
                assert_eq!(metadata.type_name, "png");
            }
            other => panic!("unexpected {other:?}"),
        }

        match d.process("bad.png".into()).await {
            DispatcherResponse::Error { step, metadata, .. } => {
                assert_eq!(step, ParseStep::ParseContent);
                assert_eq!(metadata.file_size, Some(4));
                assert_eq!(metadata.width, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_local_path_decodes_file_urls() {
        assert_eq!(local_path("file:///a%20b.mp3").unwrap(), PathBuf::from("/a b.mp3"));
        assert_eq!(local_path("/plain/a b.mp3").unwrap(), PathBuf::from("/plain/a b.mp3"));
        assert!(local_path("file://remote-host/a.mp3").is_err());
    }

    #[tokio::test]
    async fn test_local_resolver_opens_escaped_urls() {
        let dir = std::env::temp_dir().join(format!("file-metadata-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("with space.gif");
        tokio::fs::write(&path, b"GIF89a\x04\x00\x02\x00").await.unwrap();
        let url = url::Url::from_file_path(&path).unwrap().to_string();
        assert!(url.contains("%20"));

        let d = MetadataDispatcher::new(ParserRegistry::default(), Arc::new(LocalFileResolver));
        let response = d.process(url).await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
        match response {
            DispatcherResponse::Result { metadata, .. } => {
                assert_eq!((metadata.width, metadata.height), (Some(4), Some(2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unclaimed_url_is_unsupported() {
        let d = dispatcher(&[], Default::default());
        let (worker, mut client) = message_channel();
        let handle = tokio::spawn(d.serve(worker));

        client
            .send(DispatcherRequest::Request { url: "archive.tar.zst".into() })
            .unwrap();
        match client.recv().await.unwrap() {
            DispatcherResponse::Error { url, step, cause, metadata } => {
                assert_eq!(url, "archive.tar.zst");
                assert_eq!(step, ParseStep::DetectFormat);
                assert_eq!(
                    cause,
                    MetadataError::UnsupportedFormat("archive.tar.zst".into()).to_string()
                );
                assert_eq!(metadata, ParserMetadata::default());
            }
            other => panic!("unexpected {other:?}"),
        }

        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_over_port() {
        let gif: &'static [u8] = b"GIF87a\x05\x00\x06\x00";
        let options = DispatcherOptions {
            verbose: true,
            prefetch: Some(4),
        };
        let d = dispatcher(&[("x.gif", gif)], options);
        let (worker, mut client) = message_channel();
        let handle = tokio::spawn(d.serve(worker));

        client.send(DispatcherRequest::Init).unwrap();
        match client.recv().await.unwrap() {
            DispatcherResponse::Initialized { patterns } => assert_eq!(patterns.len(), 8),
            other => panic!("unexpected {other:?}"),
        }

        client
            .send(DispatcherRequest::Request { url: "x.gif".into() })
            .unwrap();
        let mut saw_log = false;
        loop {
            match client.recv().await.unwrap() {
                DispatcherResponse::Log { .. } => saw_log = true,
                DispatcherResponse::Result { url, metadata } => {
                    assert_eq!(url, "x.gif");
                    assert_eq!(metadata.width, Some(5));
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_log);

        drop(client);
        handle.await.unwrap();
    }

    #[cfg(feature = "object_store")]
    #[tokio::test]
    async fn test_object_store_resolver() {
        use object_store::memory::InMemory;
        use object_store::{ObjectStore, PutPayload};

        let store = Arc::new(InMemory::new());
        store
            .put(
                &object_store::path::Path::from("photos/a.gif"),
                PutPayload::from_static(b"GIF89a\x07\x00\x09\x00"),
            )
            .await
            .unwrap();
        let resolver = ObjectStoreResolver::new(store, "memory://bucket/");
        let d = MetadataDispatcher::new(ParserRegistry::default(), Arc::new(resolver));

        match d.process("memory://bucket/photos/a.gif".into()).await {
            DispatcherResponse::Result { metadata, .. } => {
                assert_eq!((metadata.width, metadata.height), (Some(7), Some(9)));
                assert_eq!(metadata.file_size, Some(10));
            }
            other => panic!("unexpected {other:?}"),
        }
        match d.process("file:///elsewhere.gif".into()).await {
            DispatcherResponse::Error { step, .. } => assert_eq!(step, ParseStep::ResolveFile),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "reqwest")]
    #[tokio::test]
    async fn test_http_resolver_rejects_other_schemes() {
        let resolver = HttpResolver::default();
        assert!(resolver.resolve("ftp://example.com/a.png").await.is_err());
        assert!(resolver.resolve("https://example.com/a.png").await.is_ok());
    }
}
