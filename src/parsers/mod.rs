//! Parsers for binary file headers.
//!
//! Each parser recognizes one family of files by URL, reads the few bytes it needs through an
//! [`AsyncFileReader`] and fills in a [`ParserMetadata`].

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::{Regex, RegexBuilder};

use crate::error::{MetadataError, MetadataResult};
use crate::reader::AsyncFileReader;

pub mod exif;
pub mod id3;
pub mod image;
pub mod mpeg;

pub use exif::{ExifDirectories, ExifEntry, ExifParser, Value};
pub use id3::{Id3Description, Id3Parser, Id3Tags};
pub use image::{ImageFormat, ImageHeaderParser};
pub use mpeg::MpegParser;

/// Orientation of an image, as decoded from the EXIF orientation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageTransform {
    /// Horizontal scale, `1` or `-1` (mirrored).
    pub scale_x: i32,
    /// Vertical scale, `1` or `-1` (flipped).
    pub scale_y: i32,
    /// Whether the image is rotated by 90 degrees.
    pub rotate90: bool,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            scale_x: 1,
            scale_y: 1,
            rotate90: false,
        }
    }
}

/// Everything a parser found out about a file.
///
/// A fresh value is created for every parse, pre-filled with the parser's type and mime type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserMetadata {
    /// Name of the parser that produced this metadata, e.g. `"exif"`.
    pub type_name: String,
    /// Mime type associated with the parser.
    pub mime_type: Option<String>,
    /// Size of the file in bytes.
    pub file_size: Option<u64>,
    /// Image or video width, after orientation is applied.
    pub width: Option<u32>,
    /// Image or video height, after orientation is applied.
    pub height: Option<u32>,
    /// Orientation of the main image.
    pub image_transform: Option<ImageTransform>,
    /// Orientation of the embedded thumbnail.
    pub thumbnail_transform: Option<ImageTransform>,
    /// Embedded thumbnail or cover art as a `data:` URL (or a plain URL for ID3 links).
    pub thumbnail_url: Option<String>,
    /// Raw EXIF directories.
    pub ifd: Option<ExifDirectories>,
    /// Byte order of the EXIF block.
    pub little_endian: Option<bool>,
    /// Media title.
    pub title: Option<String>,
    /// Media artist.
    pub artist: Option<String>,
    /// Media album.
    pub album: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Major brand of an MP4 file.
    pub brand: Option<String>,
    /// Human readable ID3 fields, in display order.
    pub description: Vec<Id3Description>,
    /// Raw ID3 tags.
    pub id3: Option<Id3Tags>,
}

impl ParserMetadata {
    /// Create empty metadata tagged with a parser's name and mime type.
    pub fn new(type_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            mime_type: Some(mime_type.into()),
            ..Default::default()
        }
    }
}

/// Tunables shared by the parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Smallest slice the JPEG parser requests at a time.
    pub min_slice_len: u64,
    /// Most children of one MP4 atom that are parsed before the rest are skipped.
    pub max_child_atoms: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            min_slice_len: 1024,
            max_child_atoms: 100,
        }
    }
}

/// A file format parser.
pub trait MetadataParser: Debug + Send + Sync {
    /// Short name of the format, e.g. `"png"`.
    fn name(&self) -> &'static str;

    /// Mime type reported for files this parser accepts.
    fn mime_type(&self) -> String;

    /// Case-insensitive pattern matched against file URLs.
    fn url_filter(&self) -> &Regex;

    /// Parse `file`, filling in and returning `metadata`.
    fn parse<'a>(
        &'a self,
        file: &'a dyn AsyncFileReader,
        metadata: ParserMetadata,
    ) -> BoxFuture<'a, MetadataResult<ParserMetadata>>;

    /// Returns `true` if this parser handles `url`.
    fn accepts(&self, url: &str) -> bool {
        self.url_filter().is_match(url)
    }
}

/// Build a case-insensitive URL filter from a pattern anchored at the end of the URL.
pub(crate) fn url_filter(pattern: &str) -> Regex {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        // Patterns are compile-time constants.
        Err(e) => unreachable!("invalid url filter {pattern}: {e}"),
    }
}

/// A registry of parsers, tried in registration order.
///
/// This allows end users to register their own parsers or to replace the defaults.
#[derive(Debug, Clone)]
pub struct ParserRegistry(Vec<Arc<dyn MetadataParser>>);

impl ParserRegistry {
    /// Create a new parser registry with no parsers registered
    pub fn new() -> Self {
        Self(vec![])
    }

    /// Create a registry with the built-in parsers configured by `options`.
    ///
    /// The order is exif, id3, mpeg, png, bmp, gif, webp, ico.
    pub fn with_options(options: ParserOptions) -> Self {
        let mut parsers: Vec<Arc<dyn MetadataParser>> = vec![
            Arc::new(ExifParser::new(options.min_slice_len)),
            Arc::new(Id3Parser::new()),
            Arc::new(MpegParser::new(options.max_child_atoms)),
        ];
        parsers.extend(
            ImageFormat::ALL
                .into_iter()
                .map(|format| Arc::new(ImageHeaderParser::new(format)) as _),
        );
        Self(parsers)
    }

    /// Add a parser after the already registered ones.
    ///
    /// Fails if a parser with the same name is registered.
    pub fn register(&mut self, parser: Arc<dyn MetadataParser>) -> MetadataResult<()> {
        if self.get(parser.name()).is_some() {
            return Err(MetadataError::General(format!(
                "Parser {} already registered",
                parser.name()
            )));
        }
        self.0.push(parser);
        Ok(())
    }

    /// Look up a parser by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn MetadataParser>> {
        self.0.iter().find(|parser| parser.name() == name)
    }

    /// The first parser whose URL filter matches `url`.
    pub fn detect(&self, url: &str) -> Option<&Arc<dyn MetadataParser>> {
        self.0.iter().find(|parser| parser.accepts(url))
    }

    /// URL filter patterns of all registered parsers, in order.
    pub fn patterns(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|parser| parser.url_filter().as_str().to_string())
            .collect()
    }
}

impl AsRef<[Arc<dyn MetadataParser>]> for ParserRegistry {
    fn as_ref(&self) -> &[Arc<dyn MetadataParser>] {
        &self.0
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_options(ParserOptions::default())
    }
}
