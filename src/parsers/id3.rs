//! ID3v1 and ID3v2 tags of MP3 files.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;

use crate::byte_reader::{ByteReader, SeekOrigin};
use crate::error::{MetadataError, MetadataResult};
use crate::parsers::{url_filter, MetadataParser, ParserMetadata};
use crate::reader::AsyncFileReader;

const ID3V1_SIZE: u64 = 128;
const ID3V1_FIELD_SIZE: usize = 30;
const ID3V2_HEADER_SIZE: u64 = 10;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const PICTURE_LINK: &str = "-->";

/// Frame id to display label, for the frames that make up [`ParserMetadata::description`].
const MAPPERS: [(&str, &str); 20] = [
    ("TALB", "ID3_ALBUM"),
    ("TBPM", "ID3_BPM"),
    ("TCOM", "ID3_COMPOSER"),
    ("TDAT", "ID3_DATE"),
    ("TDLY", "ID3_PLAYLIST_DELAY"),
    ("TEXT", "ID3_LYRICIST"),
    ("TFLT", "ID3_FILE_TYPE"),
    ("TIME", "ID3_TIME"),
    ("TIT2", "ID3_TITLE"),
    ("TLEN", "ID3_LENGTH"),
    ("TOWN", "ID3_OWNER"),
    ("TPE1", "ID3_LEAD_PERFORMER"),
    ("TPE2", "ID3_BAND"),
    ("TRCK", "ID3_TRACK_NUMBER"),
    ("TYER", "ID3_YEAR"),
    ("WCOP", "ID3_COPYRIGHT"),
    ("WOAF", "ID3_OFFICIAL_AUDIO_FILE_WEBPAGE"),
    ("WOAR", "ID3_OFFICIAL_ARTIST"),
    ("WOAS", "ID3_OFFICIAL_AUDIO_SOURCE_WEBPAGE"),
    ("WPUB", "ID3_PUBLISHERS_OFFICIAL_WEBPAGE"),
];

/// Display order of the description labels.
const METADATA_ORDER: [&str; 20] = [
    "ID3_TITLE",
    "ID3_LEAD_PERFORMER",
    "ID3_YEAR",
    "ID3_ALBUM",
    "ID3_TRACK_NUMBER",
    "ID3_BPM",
    "ID3_COMPOSER",
    "ID3_DATE",
    "ID3_PLAYLIST_DELAY",
    "ID3_LYRICIST",
    "ID3_FILE_TYPE",
    "ID3_TIME",
    "ID3_LENGTH",
    "ID3_OWNER",
    "ID3_BAND",
    "ID3_COPYRIGHT",
    "ID3_OFFICIAL_AUDIO_FILE_WEBPAGE",
    "ID3_OFFICIAL_ARTIST",
    "ID3_OFFICIAL_AUDIO_SOURCE_WEBPAGE",
    "ID3_PUBLISHERS_OFFICIAL_WEBPAGE",
];

/// The fixed 128-byte tag at the end of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Id3v1Tag {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// The tag at the start of a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Id3v2Tag {
    /// Major version, 2, 3 or 4.
    pub major: u8,
    /// Revision.
    pub minor: u8,
    /// Header flags.
    pub flags: u8,
    /// Size of the tag body, excluding the 10-byte header.
    pub size: u32,
    /// Frames by id. A repeated id keeps the last frame.
    pub frames: BTreeMap<String, Id3v2Frame>,
}

/// One frame of an ID3v2 tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Id3v2Frame {
    /// Frame id, 3 characters for version 2.2 and 4 otherwise.
    pub name: String,
    /// Body size.
    pub size: u32,
    /// Header size, 6 or 10.
    pub header_size: u32,
    /// Frame flags (zero for version 2.2).
    pub flags: u16,
    /// Decoded body.
    pub body: FrameBody,
}

/// The payload of an embedded picture frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PictureData {
    /// A link to the picture.
    Url(String),
    /// The picture itself, as a `data:` URL.
    Image(String),
}

/// Decoded frame bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// `T***` and `W***` frames.
    Text {
        /// Text encoding byte.
        encoding: u8,
        /// The text.
        value: String,
    },
    /// `TXX(X)` and `WXX(X)` frames.
    UserDefined {
        /// Text encoding byte.
        encoding: u8,
        /// Description of the value.
        description: String,
        /// The value. URLs are always Latin-1.
        value: String,
    },
    /// `PIC` and `APIC` frames.
    Picture {
        /// Text encoding of the description.
        encoding: u8,
        /// Image format (`PIC`) or mime type (`APIC`).
        format: String,
        /// Picture type byte.
        picture_type: u8,
        /// Description of the picture.
        description: String,
        /// Link or image data.
        data: PictureData,
    },
    /// Frames that are not decoded, or whose body could not be read.
    Skipped,
}

impl FrameBody {
    /// The text of a text frame.
    pub fn text(&self) -> Option<&str> {
        match self {
            FrameBody::Text { value, .. } | FrameBody::UserDefined { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Both tag versions found in a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Id3Tags {
    /// The trailing ID3v1 tag.
    pub v1: Option<Id3v1Tag>,
    pub v2: Option<Id3v2Tag>,
}

/// A labelled ID3 value for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3Description {
    /// Label key, e.g. `ID3_TITLE`.
    pub key: &'static str,
    /// Trimmed frame text.
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    UserText,
    UserUrl,
    Pic,
    Apic,
    Text,
    Skip,
}

impl FrameKind {
    fn of(name: &str) -> Self {
        match name {
            "TXX" | "TXXX" => Self::UserText,
            "WXX" | "WXXX" => Self::UserUrl,
            "PIC" => Self::Pic,
            "APIC" => Self::Apic,
            _ if name.starts_with('T') || name.starts_with('W') => Self::Text,
            _ => Self::Skip,
        }
    }
}

/// Reads ID3v1 and ID3v2 tags.
#[derive(Debug, Clone)]
pub struct Id3Parser {
    url_filter: Regex,
}

impl Id3Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            url_filter: url_filter(r"\.mp3$"),
        }
    }
}

impl Default for Id3Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataParser for Id3Parser {
    fn name(&self) -> &'static str {
        "id3"
    }

    fn mime_type(&self) -> String {
        "audio/mpeg".to_string()
    }

    fn url_filter(&self) -> &Regex {
        &self.url_filter
    }

    fn parse<'a>(
        &'a self,
        file: &'a dyn AsyncFileReader,
        metadata: ParserMetadata,
    ) -> BoxFuture<'a, MetadataResult<ParserMetadata>> {
        parse_file(file, metadata).boxed()
    }
}

#[tracing::instrument(skip_all)]
async fn parse_file(
    file: &dyn AsyncFileReader,
    mut metadata: ParserMetadata,
) -> MetadataResult<ParserMetadata> {
    let file_size = match metadata.file_size {
        Some(size) => size,
        None => file.size().await?,
    };

    let (v1, v2) = futures::try_join!(read_id3v1(file, file_size), read_id3v2(file))?;

    if let Some(v1) = &v1 {
        for (slot, value) in [
            (&mut metadata.title, &v1.title),
            (&mut metadata.artist, &v1.artist),
            (&mut metadata.album, &v1.album),
        ] {
            if !value.is_empty() {
                *slot = Some(value.clone());
            }
        }
    }

    if let Some(v2) = &v2 {
        apply_id3v2(v2, &mut metadata);
    }

    metadata.id3 = Some(Id3Tags { v1, v2 });
    Ok(metadata)
}

/// Read the ID3v1 tag from the last 128 bytes of a file.
pub async fn read_id3v1(
    file: &dyn AsyncFileReader,
    file_size: u64,
) -> MetadataResult<Option<Id3v1Tag>> {
    if file_size < ID3V1_SIZE {
        return Err(MetadataError::EndOfFile(ID3V1_SIZE, file_size));
    }
    let data = file.get_bytes(file_size - ID3V1_SIZE..file_size).await?;
    parse_id3v1(data)
}

/// Parse a 128-byte ID3v1 block. Returns `None` without the `TAG` signature.
pub fn parse_id3v1(data: Bytes) -> MetadataResult<Option<Id3v1Tag>> {
    let mut br = ByteReader::new(data);
    if !br.can_read(ID3V1_SIZE as usize) {
        return Err(MetadataError::EndOfFile(ID3V1_SIZE, br.len() as u64));
    }
    if br.read_string(3, None)? != "TAG" {
        return Ok(None);
    }
    let mut field = || -> MetadataResult<String> {
        Ok(br
            .read_null_terminated_string(ID3V1_FIELD_SIZE, None)?
            .trim()
            .to_string())
    };
    let title = field()?;
    let artist = field()?;
    let album = field()?;
    Ok(Some(Id3v1Tag {
        title,
        artist,
        album,
    }))
}

/// Read the ID3v2 tag at the start of a file.
pub async fn read_id3v2(file: &dyn AsyncFileReader) -> MetadataResult<Option<Id3v2Tag>> {
    let header = file.get_bytes(0..ID3V2_HEADER_SIZE).await?;
    if !header.starts_with(b"ID3") {
        return Ok(None);
    }
    let mut br = ByteReader::new(header);
    br.seek(3, SeekOrigin::Begin)?;
    let major = br.read_u8()?;
    let minor = br.read_u8()?;
    let flags = br.read_u8()?;
    let size = read_synchsafe(&mut br)?;

    let body_range = ID3V2_HEADER_SIZE..ID3V2_HEADER_SIZE + size as u64;
    let body = file.get_bytes(body_range).await?;
    if body.len() < size as usize {
        return Err(MetadataError::EndOfFile(size as u64, body.len() as u64));
    }
    tracing::debug!(major, minor, size, "found ID3v2 tag");

    let mut tag = Id3v2Tag {
        major,
        minor,
        flags,
        size,
        frames: BTreeMap::new(),
    };
    read_frames(body, &mut tag)?;
    Ok(Some(tag))
}

fn read_synchsafe(br: &mut ByteReader) -> MetadataResult<u32> {
    let mut value = 0;
    for _ in 0..4 {
        value = (value << 7) | (br.read_u8()? & 0x7f) as u32;
    }
    Ok(value)
}

fn read_u24(br: &mut ByteReader) -> MetadataResult<u32> {
    let high = br.read_u8()? as u32;
    Ok((high << 16) | br.read_u16()? as u32)
}

fn read_frames(body: Bytes, tag: &mut Id3v2Tag) -> MetadataResult<()> {
    let mut br = ByteReader::new(body);

    if tag.major > 2 && tag.flags & FLAG_EXTENDED_HEADER != 0 {
        if tag.major == 3 {
            let length = br.read_u32()?;
            br.skip(length as usize)?;
        } else {
            let length = read_synchsafe(&mut br)?;
            br.seek(length as i64, SeekOrigin::Begin)?;
        }
    }

    let (name_size, header_size) = if tag.major == 2 { (3, 6) } else { (4, 10) };

    while !br.eof() {
        if !br.can_read(header_size) {
            tracing::debug!(position = br.tell(), "truncated frame header");
            break;
        }
        let frame_start = br.tell();
        let name = br.read_null_terminated_string(name_size, None)?;
        if name.is_empty() {
            break;
        }
        let (size, flags) = match tag.major {
            2 => (read_u24(&mut br)?, 0),
            3 => (br.read_u32()?, br.read_u16()?),
            _ => (read_synchsafe(&mut br)?, br.read_u16()?),
        };

        let body_end = (br.tell() + size as usize).min(br.len());
        let body = br.read_slice(body_end - br.tell(), None)?;
        let kind = FrameKind::of(&name);
        let body = match read_frame_body(kind, body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(frame = %name, error = %e, "failed to read frame");
                FrameBody::Skipped
            }
        };
        tracing::trace!(frame = %name, size, ?kind, "frame");

        tag.frames.insert(
            name.clone(),
            Id3v2Frame {
                name,
                size,
                header_size: header_size as u32,
                flags,
                body,
            },
        );

        let next = frame_start as i64 + header_size as i64 + size as i64;
        if br.seek(next, SeekOrigin::Begin).is_err() {
            break;
        }
    }
    Ok(())
}

fn read_frame_body(kind: FrameKind, body: Bytes) -> MetadataResult<FrameBody> {
    let mut br = ByteReader::new(body.clone());
    match kind {
        FrameKind::Skip => Ok(FrameBody::Skipped),
        FrameKind::Text => {
            let encoding = br.read_u8()?;
            let size = remaining(&br);
            let value = read_encoded(&mut br, encoding, size)?;
            Ok(FrameBody::Text { encoding, value })
        }
        FrameKind::UserText | FrameKind::UserUrl => {
            let encoding = br.read_u8()?;
            let description = read_encoded_field(&mut br, &body, encoding)?;
            let value = if kind == FrameKind::UserUrl {
                br.read_null_terminated_string(remaining(&br), None)?
            } else {
                let size = remaining(&br);
                read_encoded(&mut br, encoding, size)?
            };
            Ok(FrameBody::UserDefined {
                encoding,
                description,
                value,
            })
        }
        FrameKind::Pic | FrameKind::Apic => {
            let encoding = br.read_u8()?;
            let format = if kind == FrameKind::Pic {
                br.read_string(3, None)?
            } else {
                read_encoded_field(&mut br, &body, 0)?
            };
            let picture_type = br.read_u8()?;
            let description = read_encoded_field(&mut br, &body, encoding)?;
            let data = if format == PICTURE_LINK {
                PictureData::Url(br.read_null_terminated_string(remaining(&br), None)?)
            } else {
                PictureData::Image(br.read_image(remaining(&br), None)?)
            };
            Ok(FrameBody::Picture {
                encoding,
                format,
                picture_type,
                description,
                data,
            })
        }
    }
}

fn remaining(br: &ByteReader) -> usize {
    br.len() - br.tell()
}

/// Read `size` bytes of text in one of the ID3 encodings.
fn read_encoded(br: &mut ByteReader, encoding: u8, size: usize) -> MetadataResult<String> {
    match encoding {
        0 => br.read_null_terminated_string(size, None),
        1 => br.read_null_terminated_string_utf16(true, size, None),
        2 => br.read_null_terminated_string_utf16(false, size, None),
        3 => {
            tracing::warn!("UTF-8 text is read as ISO-8859-1");
            br.read_null_terminated_string(size, None)
        }
        other => {
            tracing::warn!(encoding = other, "unknown text encoding");
            br.skip(size)?;
            Ok(String::new())
        }
    }
}

/// Read a terminated text field, consuming exactly its bytes and terminator.
fn read_encoded_field(br: &mut ByteReader, body: &Bytes, encoding: u8) -> MetadataResult<String> {
    let rest = &body[br.tell()..];
    let size = if matches!(encoding, 1 | 2) {
        rest.chunks_exact(2)
            .position(|unit| unit == [0, 0])
            .map_or(rest.len(), |i| i * 2 + 2)
    } else {
        rest.iter().position(|&b| b == 0).map_or(rest.len(), |i| i + 1)
    };
    read_encoded(br, encoding, size)
}

fn frame_text<'a>(tag: &'a Id3v2Tag, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| tag.frames.get(*name))
        .find_map(|frame| frame.body.text())
}

fn apply_id3v2(tag: &Id3v2Tag, metadata: &mut ParserMetadata) {
    let picture = ["APIC", "PIC"].iter().find_map(|name| {
        match tag.frames.get(*name).map(|frame| &frame.body) {
            Some(FrameBody::Picture { data, .. }) => Some(data),
            _ => None,
        }
    });
    if let Some(PictureData::Url(url) | PictureData::Image(url)) = picture {
        metadata.thumbnail_url = Some(url.clone());
    }

    let mut description: Vec<Id3Description> = MAPPERS
        .iter()
        .filter_map(|(frame, key)| {
            let value = tag.frames.get(*frame)?.body.text()?.trim();
            (!value.is_empty()).then(|| Id3Description {
                key: *key,
                value: value.to_string(),
            })
        })
        .collect();
    description.sort_by_key(|d| METADATA_ORDER.iter().position(|key| *key == d.key));
    metadata.description = description;

    for (slot, names) in [
        (&mut metadata.album, ["TAL", "TALB"]),
        (&mut metadata.title, ["TT2", "TIT2"]),
        (&mut metadata.artist, ["TP1", "TPE1"]),
    ] {
        if let Some(value) = frame_text(tag, &names) {
            *slot = Some(value.trim().to_string());
        }
    }
}
