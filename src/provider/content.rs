use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::dispatcher::{
    message_channel, DispatcherRequest, DispatcherResponse, MessagePort, MetadataDispatcher,
};
use crate::error::{MetadataError, MetadataResult, PropertyError};
use crate::parsers::{url_filter, ParserMetadata};
use crate::provider::{
    FileEntry, MetadataItem, MetadataProvider, MetadataRequest, Property, PropertyName,
};

type ParseResult = Result<ParserMetadata, PropertyError>;

#[derive(Debug, Default)]
struct PendingReplies {
    parses: HashMap<String, Vec<oneshot::Sender<ParseResult>>>,
    inits: Vec<oneshot::Sender<Vec<String>>>,
}

/// Client side of the parser worker's message port.
///
/// Concurrent requests for the same URL share a single message to the worker.
#[derive(Debug, Clone)]
pub struct ParserClient {
    sender: UnboundedSender<DispatcherRequest>,
    pending: Arc<Mutex<PendingReplies>>,
}

impl ParserClient {
    /// Wrap `port`. The returned future routes the worker's replies and must be polled (for
    /// example spawned) for requests to complete. It ends when the worker drops its port.
    pub fn connect(
        port: MessagePort<DispatcherResponse, DispatcherRequest>,
    ) -> (Self, BoxFuture<'static, ()>) {
        let (sender, mut receiver) = port.split();
        let pending = Arc::new(Mutex::new(PendingReplies::default()));
        let client = Self {
            sender,
            pending: pending.clone(),
        };

        let driver = async move {
            while let Some(response) = receiver.recv().await {
                route_response(&pending, response);
            }
            tracing::debug!("parser worker port closed");
            // Dropping the senders wakes every waiter with an error.
            *pending.lock() = PendingReplies::default();
        }
        .boxed();
        (client, driver)
    }

    /// Start `dispatcher` and a reply router on the current tokio runtime.
    pub fn spawn(dispatcher: MetadataDispatcher) -> Self {
        let (worker_port, client_port) = message_channel();
        let (client, driver) = Self::connect(client_port);
        tokio::spawn(dispatcher.serve(worker_port));
        tokio::spawn(driver);
        client
    }

    /// Ask the worker for the URL patterns it can parse.
    pub async fn patterns(&self) -> MetadataResult<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().inits.push(tx);
        self.send(DispatcherRequest::Init)?;
        rx.await.map_err(|_| worker_stopped())
    }

    /// Parse the file at `url` in the worker.
    pub async fn parse(&self, url: &str) -> ParseResult {
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut pending = self.pending.lock();
            let waiters = pending.parses.entry(url.to_string()).or_default();
            waiters.push(tx);
            waiters.len() == 1
        };
        if first {
            let request = DispatcherRequest::Request {
                url: url.to_string(),
            };
            if let Err(e) = self.send(request) {
                self.pending.lock().parses.remove(url);
                return Err(e.into());
            }
        }
        rx.await.map_err(|_| PropertyError::from(worker_stopped()))?
    }

    fn send(&self, request: DispatcherRequest) -> MetadataResult<()> {
        self.sender.send(request).map_err(|_| worker_stopped())
    }
}

fn worker_stopped() -> MetadataError {
    MetadataError::General("parser worker stopped".to_string())
}

fn route_response(pending: &Mutex<PendingReplies>, response: DispatcherResponse) {
    match response {
        DispatcherResponse::Initialized { patterns } => {
            let waiters = std::mem::take(&mut pending.lock().inits);
            for waiter in waiters {
                let _ = waiter.send(patterns.clone());
            }
        }
        DispatcherResponse::Result { url, metadata } => {
            let waiters = pending.lock().parses.remove(&url).unwrap_or_default();
            for waiter in waiters {
                let _ = waiter.send(Ok(metadata.clone()));
            }
        }
        DispatcherResponse::Error {
            url, step, cause, ..
        } => {
            let error = content_error(&url, &step.to_string(), &cause);
            let waiters = pending.lock().parses.remove(&url).unwrap_or_default();
            for waiter in waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
        DispatcherResponse::Log { message } => tracing::debug!(target: "parser_worker", "{message}"),
    }
}

fn content_error(url: &str, step: &str, cause: &str) -> PropertyError {
    PropertyError::new(format!("content metadata {step} failed for {url}: {cause}"))
}

/// Audio and video metadata sniffed by a media service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    /// Track title.
    pub title: Option<String>,
    /// Artist.
    pub artist: Option<String>,
    /// Album.
    pub album: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Track number.
    pub track: Option<i64>,
    /// Recording year.
    pub year_recorded: Option<i64>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Video width.
    pub width: Option<u32>,
    /// Video height.
    pub height: Option<u32>,
    /// Attached picture as a `data:` URL.
    pub thumbnail_url: Option<String>,
}

/// A media service that can read audio and video containers.
pub trait ContentSniffingService: Debug + Send + Sync {
    /// Sniff the mime type from the file content.
    fn get_content_mime_type<'a>(
        &'a self,
        entry: &'a FileEntry,
    ) -> BoxFuture<'a, MetadataResult<String>>;

    /// Read tags and stream properties.
    fn get_content_metadata<'a>(
        &'a self,
        entry: &'a FileEntry,
        mime_type: &'a str,
        include_images: bool,
    ) -> BoxFuture<'a, MetadataResult<MediaMetadata>>;
}

/// Supplies properties read from file content.
///
/// Audio and video go to the [`ContentSniffingService`] when one is configured; everything
/// else is parsed by the parser worker.
#[derive(Debug, Clone)]
pub struct ContentMetadataProvider {
    client: ParserClient,
    sniffer: Option<Arc<dyn ContentSniffingService>>,
    media_filter: Regex,
}

impl ContentMetadataProvider {
    /// The properties supplied by this provider.
    pub const PROPERTY_NAMES: &'static [PropertyName] = &[
        PropertyName::ContentImageTransform,
        PropertyName::ContentThumbnailTransform,
        PropertyName::ContentThumbnailUrl,
        PropertyName::ExifLittleEndian,
        PropertyName::Ifd,
        PropertyName::ImageHeight,
        PropertyName::ImageWidth,
        PropertyName::MediaAlbum,
        PropertyName::MediaArtist,
        PropertyName::MediaDuration,
        PropertyName::MediaGenre,
        PropertyName::MediaMimeType,
        PropertyName::MediaTitle,
        PropertyName::MediaTrack,
        PropertyName::MediaYearRecorded,
    ];

    /// Create a provider that sends every file to the parser worker.
    pub fn new(client: ParserClient) -> Self {
        Self {
            client,
            sniffer: None,
            media_filter: url_filter(
                r"\.(3gp|aac|amr|avi|flac|m4a|m4v|mkv|mov|mp3|mpe?g4?|oga|ogg|ogv|wav|webm)$",
            ),
        }
    }

    /// Send audio and video to `sniffer` instead of the parser worker.
    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffingService>) -> Self {
        self.sniffer = Some(sniffer);
        self
    }

    /// The client talking to the parser worker.
    pub fn client(&self) -> &ParserClient {
        &self.client
    }

    async fn get_one(&self, request: MetadataRequest) -> MetadataItem {
        let MetadataRequest { entry, names } = request;
        if entry.is_directory {
            return failed(&names, content_error(&entry.url, "get", "directories have no content"));
        }

        if let Some(sniffer) = self.sniffer.as_ref() {
            if self.media_filter.is_match(&entry.url) {
                return match sniff(sniffer.as_ref(), &entry, &names).await {
                    Ok(item) => item,
                    Err(err) => failed(&names, err),
                };
            }
        }

        match self.client.parse(&entry.url).await {
            Ok(metadata) => convert_parser_metadata(metadata),
            Err(err) => {
                tracing::debug!(url = %entry.url, error = %err, "content metadata unavailable");
                failed(&names, err)
            }
        }
    }
}

async fn sniff(
    sniffer: &dyn ContentSniffingService,
    entry: &FileEntry,
    names: &[PropertyName],
) -> Result<MetadataItem, PropertyError> {
    let mime_type = sniffer
        .get_content_mime_type(entry)
        .await
        .map_err(|e| content_error(&entry.url, "getContentMimeType", &e.to_string()))?;
    if mime_type.is_empty() {
        return Err(content_error(&entry.url, "getContentMimeType", "unknown mime type"));
    }

    let include_images = names.contains(&PropertyName::ContentThumbnailUrl);
    let media = sniffer
        .get_content_metadata(entry, &mime_type, include_images)
        .await
        .map_err(|e| content_error(&entry.url, "getContentMetadata", &e.to_string()))?;

    let mut item = MetadataItem::new();
    item.set(PropertyName::MediaMimeType, mime_type);
    item.set_optional(PropertyName::MediaTitle, media.title);
    item.set_optional(PropertyName::MediaArtist, media.artist);
    item.set_optional(PropertyName::MediaAlbum, media.album);
    item.set_optional(PropertyName::MediaGenre, media.genre);
    item.set_optional(PropertyName::MediaTrack, media.track);
    item.set_optional(PropertyName::MediaYearRecorded, media.year_recorded);
    item.set_optional(PropertyName::MediaDuration, media.duration);
    item.set_optional(PropertyName::ImageWidth, media.width);
    item.set_optional(PropertyName::ImageHeight, media.height);
    item.set_optional(PropertyName::ContentThumbnailUrl, media.thumbnail_url);
    Ok(item)
}

/// Map what a parser found to content properties.
pub(crate) fn convert_parser_metadata(metadata: ParserMetadata) -> MetadataItem {
    let mut item = MetadataItem::new();
    item.set_optional(PropertyName::ContentImageTransform, metadata.image_transform);
    item.set_optional(PropertyName::ContentThumbnailTransform, metadata.thumbnail_transform);
    item.set_optional(PropertyName::ContentThumbnailUrl, metadata.thumbnail_url);
    item.set_optional(PropertyName::ExifLittleEndian, metadata.little_endian);
    item.set_optional(PropertyName::Ifd, metadata.ifd);
    item.set_optional(PropertyName::ImageHeight, metadata.height);
    item.set_optional(PropertyName::ImageWidth, metadata.width);
    item.set_optional(PropertyName::MediaMimeType, metadata.mime_type);
    item.set_optional(PropertyName::MediaTitle, metadata.title);
    item.set_optional(PropertyName::MediaArtist, metadata.artist);
    item.set_optional(PropertyName::MediaAlbum, metadata.album);
    item.set_optional(PropertyName::MediaDuration, metadata.duration);
    item
}

fn failed(names: &[PropertyName], err: PropertyError) -> MetadataItem {
    names
        .iter()
        .map(|name| (*name, Property::Failed(err.clone())))
        .collect()
}

impl MetadataProvider for ContentMetadataProvider {
    fn property_names(&self) -> &[PropertyName] {
        Self::PROPERTY_NAMES
    }

    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>> {
        join_all(requests.into_iter().map(|request| self.get_one(request))).boxed()
    }
}
