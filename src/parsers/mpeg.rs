//! MP4/QuickTime atom tree.
//!
//! Only the atoms leading to duration, video dimensions, iTunes-style tags and cover art are
//! walked. Top-level atoms without a parser are skipped without reading their bodies, so large
//! `mdat` atoms cost a single header read.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;

use crate::byte_reader::{ByteReader, SeekOrigin};
use crate::error::{MetadataError, MetadataResult};
use crate::parsers::{url_filter, MetadataParser, ParserMetadata};
use crate::reader::AsyncFileReader;

const HEADER_SIZE: u64 = 8;

/// The `ilst` item a `data` atom belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagField {
    Title,
    Album,
    Artist,
    Cover,
}

/// The atoms this parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomKind {
    Ftyp,
    Moov,
    Mvhd,
    Trak,
    Mdia,
    Hdlr,
    Minf,
    Stbl,
    Stsd,
    Udta,
    Meta,
    Ilst,
    Tag(TagField),
    Data(TagField),
}

impl AtomKind {
    fn root(name: &[u8]) -> Option<Self> {
        match name {
            b"ftyp" => Some(Self::Ftyp),
            b"moov" => Some(Self::Moov),
            b"meta" => Some(Self::Meta),
            _ => None,
        }
    }

    fn child(&self, name: &[u8]) -> Option<Self> {
        let kind = match (self, name) {
            (Self::Moov, b"mvhd") => Self::Mvhd,
            (Self::Moov, b"trak") => Self::Trak,
            (Self::Moov, b"udta") => Self::Udta,
            (Self::Moov | Self::Trak | Self::Udta, b"meta") => Self::Meta,
            (Self::Trak, b"mdia") => Self::Mdia,
            (Self::Mdia, b"hdlr") => Self::Hdlr,
            (Self::Mdia, b"minf") => Self::Minf,
            (Self::Minf, b"stbl") => Self::Stbl,
            (Self::Stbl, b"stsd") => Self::Stsd,
            (Self::Meta, b"ilst") => Self::Ilst,
            (Self::Ilst, b"\xa9nam") => Self::Tag(TagField::Title),
            (Self::Ilst, b"\xa9alb") => Self::Tag(TagField::Album),
            (Self::Ilst, b"\xa9art" | b"\xa9ART") => Self::Tag(TagField::Artist),
            (Self::Ilst, b"covr") => Self::Tag(TagField::Cover),
            (Self::Tag(field), b"data") => Self::Data(*field),
            _ => return None,
        };
        Some(kind)
    }
}

/// Per-track state shared between `hdlr` and `stsd`.
#[derive(Debug, Default)]
struct Track {
    kind: Option<String>,
}

/// Reads duration, video size, tags and cover art of MP4 files.
#[derive(Debug, Clone)]
pub struct MpegParser {
    max_child_atoms: usize,
    url_filter: Regex,
}

impl MpegParser {
    /// Create a parser that reads at most `max_child_atoms` children of any atom.
    pub fn new(max_child_atoms: usize) -> Self {
        Self {
            max_child_atoms,
            url_filter: url_filter(r"\.(mp4|m4v|m4a|mpe?g4?)$"),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn parse_file(
        &self,
        file: &dyn AsyncFileReader,
        mut metadata: ParserMetadata,
    ) -> MetadataResult<ParserMetadata> {
        let mut file_pos = 0;
        let mut size = HEADER_SIZE;
        let mut name: Option<Bytes> = None;

        loop {
            let buf = file.get_bytes(file_pos..file_pos + size).await?;
            let atom_end = size - HEADER_SIZE;
            let buf_len = buf.len() as u64;
            if buf_len != atom_end && buf_len != size {
                return Err(MetadataError::EndOfFile(size, buf_len));
            }

            let mut br = ByteReader::new(buf);
            if let Some(kind) = name.as_deref().and_then(AtomKind::root) {
                let mut track = Track::default();
                self.parse_atom(kind, &mut br, atom_end as usize, &mut track, &mut metadata)?;
            }

            file_pos += buf_len;
            if buf_len != size {
                // The last atom ended the file without a following header.
                return Ok(metadata);
            }

            br.seek(-(HEADER_SIZE as i64), SeekOrigin::End)?;
            let mut next_size = br.read_u32()? as u64;
            let next_name = br.read_slice(4, None)?;
            if next_size < HEADER_SIZE {
                return Err(MetadataError::Malformed(format!(
                    "Invalid atom size {next_size} @{}",
                    file_pos - HEADER_SIZE
                )));
            }
            if AtomKind::root(&next_name).is_none() {
                tracing::trace!(atom = %crate::byte_reader::latin1(&next_name), next_size, "skipping");
                file_pos += next_size - HEADER_SIZE;
                next_size = HEADER_SIZE;
            }
            size = next_size;
            name = Some(next_name);
        }
    }

    /// Parse the body of an atom of `kind`, which ends at `end`.
    fn parse_atom(
        &self,
        kind: AtomKind,
        br: &mut ByteReader,
        end: usize,
        track: &mut Track,
        metadata: &mut ParserMetadata,
    ) -> MetadataResult<()> {
        let bound = Some(end);
        match kind {
            AtomKind::Ftyp => {
                metadata.brand = Some(br.read_string(4, bound)?);
            }
            AtomKind::Mvhd => {
                let version = br.read_scalar(1, bound)?;
                br.skip(3)?;
                let (timescale, duration) = if version == 0 {
                    br.skip(8)?;
                    (br.read_scalar(4, bound)?, br.read_scalar(4, bound)?)
                } else {
                    br.skip(16)?;
                    (br.read_scalar(4, bound)?, br.read_scalar(8, bound)?)
                };
                if timescale > 0 {
                    metadata.duration = Some(duration as f64 / timescale as f64);
                }
            }
            AtomKind::Hdlr => {
                br.skip(8)?;
                track.kind = Some(br.read_string(4, bound)?);
            }
            AtomKind::Stsd => {
                if track.kind.as_deref() == Some("vide") {
                    br.skip(40)?;
                    metadata.width = Some(br.read_scalar(2, bound)? as u32);
                    metadata.height = Some(br.read_scalar(2, bound)? as u32);
                }
            }
            AtomKind::Data(field) => {
                br.skip(8)?;
                let size = end.saturating_sub(br.tell());
                match field {
                    TagField::Cover => metadata.thumbnail_url = Some(br.read_image(size, bound)?),
                    TagField::Title => metadata.title = Some(br.read_string(size, bound)?),
                    TagField::Album => metadata.album = Some(br.read_string(size, bound)?),
                    TagField::Artist => metadata.artist = Some(br.read_string(size, bound)?),
                }
            }
            AtomKind::Trak => {
                self.parse_children(kind, br, end, &mut Track::default(), metadata)?;
            }
            AtomKind::Meta => {
                // Version and flags.
                br.skip(4)?;
                self.parse_children(kind, br, end, track, metadata)?;
            }
            AtomKind::Moov
            | AtomKind::Mdia
            | AtomKind::Minf
            | AtomKind::Stbl
            | AtomKind::Udta
            | AtomKind::Ilst
            | AtomKind::Tag(_) => {
                self.parse_children(kind, br, end, track, metadata)?;
            }
        }
        Ok(())
    }

    /// Parse the children of `parent` from the cursor up to `end`.
    fn parse_children(
        &self,
        parent: AtomKind,
        br: &mut ByteReader,
        end: usize,
        track: &mut Track,
        metadata: &mut ParserMetadata,
    ) -> MetadataResult<()> {
        let mut count = 0;
        while br.tell() < end {
            if count == self.max_child_atoms {
                tracing::warn!(?parent, "too many child atoms, ignoring the rest");
                break;
            }
            count += 1;

            let start = br.tell();
            let size = br.read_scalar(4, Some(end))? as usize;
            let name = br.read_slice(4, Some(end))?;
            let atom_end = start + size;
            if size < HEADER_SIZE as usize || atom_end > end {
                return Err(MetadataError::Malformed(format!(
                    "Invalid atom size {size} @{start}, parent ends @{end}"
                )));
            }

            if let Some(kind) = parent.child(&name) {
                self.parse_atom(kind, br, atom_end, track, metadata)?;
            }
            br.seek(atom_end as i64, SeekOrigin::Begin)?;
        }
        Ok(())
    }
}

impl MetadataParser for MpegParser {
    fn name(&self) -> &'static str {
        "mpeg"
    }

    fn mime_type(&self) -> String {
        "video/mpeg".to_string()
    }

    fn url_filter(&self) -> &Regex {
        &self.url_filter
    }

    fn parse<'a>(
        &'a self,
        file: &'a dyn AsyncFileReader,
        metadata: ParserMetadata,
    ) -> BoxFuture<'a, MetadataResult<ParserMetadata>> {
        self.parse_file(file, metadata).boxed()
    }
}
