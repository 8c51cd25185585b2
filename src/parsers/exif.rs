//! JPEG marker walker and EXIF directory reader.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use num_enum::TryFromPrimitive;
use regex::Regex;

use crate::byte_reader::{ByteReader, SeekOrigin};
use crate::error::{MetadataError, MetadataResult};
use crate::parsers::{url_filter, ImageTransform, MetadataParser, ParserMetadata};
use crate::reader::{AsyncFileReader, Endianness};

const MARK_SOI: u16 = 0xFFD8;
const MARK_SOS: u16 = 0xFFDA;
const MARK_SOF: u16 = 0xFFC0;
const MARK_EXIF: u16 = 0xFFE1;

const EXIF_SIGNATURE: &[u8; 6] = b"Exif\0\0";
const ALIGN_LITTLE: u16 = 0x4949;
const ALIGN_BIG: u16 = 0x4D4D;
const TIFF_MAGIC: u16 = 0x002A;

/// Orientation of the image.
pub const TAG_ORIENTATION: u16 = 0x0112;
/// Offset of the EXIF sub-directory.
pub const TAG_EXIF_POINTER: u16 = 0x8769;
/// Offset of the GPS directory.
pub const TAG_GPS_POINTER: u16 = 0x8825;
/// Offset of the embedded JPEG thumbnail.
pub const TAG_THUMBNAIL_OFFSET: u16 = 0x0201;
/// Length of the embedded JPEG thumbnail.
pub const TAG_THUMBNAIL_LENGTH: u16 = 0x0202;

// Indexed by orientation - 1.
const SCALE_X: [i32; 8] = [1, -1, -1, 1, 1, 1, -1, -1];
const SCALE_Y: [i32; 8] = [1, 1, -1, -1, -1, 1, -1, 1];
const ROTATE_90: [bool; 8] = [false, false, false, false, true, true, true, true];

/// Component formats of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u16)]
pub enum ExifFormat {
    /// Unsigned 8-bit.
    Byte = 1,
    /// Latin-1 text.
    Ascii = 2,
    /// Unsigned 16-bit.
    Short = 3,
    /// Unsigned 32-bit.
    Long = 4,
    /// Two unsigned 32-bit values.
    Rational = 5,
    /// Opaque bytes.
    Undefined = 7,
    /// Signed 32-bit.
    SignedLong = 9,
    /// Two signed 32-bit values.
    SignedRational = 10,
}

impl ExifFormat {
    fn unit_size(&self) -> u64 {
        match self {
            Self::Byte | Self::Ascii | Self::Undefined => 1,
            Self::Short => 2,
            Self::Long | Self::SignedLong => 4,
            Self::Rational | Self::SignedRational => 8,
        }
    }
}

/// A decoded directory entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Short(u16),
    Unsigned(u32),
    Signed(i32),
    Rational(u32, u32),
    SRational(i32, i32),
    Ascii(String),
    List(Vec<Value>),
}

impl Value {
    /// The value as an unsigned integer, for the scalar integer variants.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Byte(v) => Some(*v as u32),
            Value::Short(v) => Some(*v as u32),
            Value::Unsigned(v) => Some(*v),
            Value::Signed(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

/// One entry of an EXIF directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifEntry {
    /// Tag identifier.
    pub id: u16,
    /// Format code as stored in the file.
    pub format: u16,
    /// Number of components. For text this includes the trailing NUL.
    pub component_count: u32,
    /// Decoded value, `None` if it could not be read.
    pub value: Option<Value>,
}

/// A directory, keyed by tag identifier.
pub type ExifDirectory = BTreeMap<u16, ExifEntry>;

/// The EXIF directories found in a JPEG file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifDirectories {
    /// The main image directory (IFD0).
    pub image: ExifDirectory,
    /// The thumbnail directory chained after IFD0.
    pub thumbnail: ExifDirectory,
    /// The EXIF sub-directory, if pointed to.
    pub exif: Option<ExifDirectory>,
    /// The GPS directory, if pointed to.
    pub gps: Option<ExifDirectory>,
}

/// Result of parsing one slice of a JPEG stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Parsing finished.
    Complete,
    /// Parsing must continue with the bytes at `offset..offset + length`.
    NeedMoreBytes {
        /// Absolute file offset of the next slice.
        offset: u64,
        /// Number of bytes needed, before the minimum slice length is applied.
        length: u64,
    },
}

/// Map an EXIF orientation value to a transform. Unknown values are the identity.
pub fn orientation_transform(orientation: u32) -> ImageTransform {
    match orientation.checked_sub(1).map(|i| i as usize) {
        Some(i) if i < 8 => ImageTransform {
            scale_x: SCALE_X[i],
            scale_y: SCALE_Y[i],
            rotate90: ROTATE_90[i],
        },
        _ => ImageTransform::default(),
    }
}

/// Markers without a length field: TEM and RST0 to RST7.
fn is_standalone(mark: u16) -> bool {
    mark == 0xFF01 || (0xFFD0..=0xFFD7).contains(&mark)
}

fn is_sof(mark: u16) -> bool {
    // 0xFFC4 (DHT), 0xFFC8 (JPG) and 0xFFCC (DAC) share the range without being frames.
    (mark & 0xFFF0) == MARK_SOF && !matches!(mark & 0x000F, 4 | 8 | 12)
}

/// Reads dimensions, orientation, thumbnail and the raw EXIF directories of JPEG files.
#[derive(Debug, Clone)]
pub struct ExifParser {
    min_slice_len: u64,
    url_filter: Regex,
}

impl ExifParser {
    /// Create a parser that fetches at least `min_slice_len` bytes at a time.
    pub fn new(min_slice_len: u64) -> Self {
        Self {
            min_slice_len: min_slice_len.max(1),
            url_filter: url_filter(r"\.jpe?g$"),
        }
    }

    #[tracing::instrument(skip_all, fields(file_size = tracing::field::Empty))]
    async fn parse_file(
        &self,
        file: &dyn AsyncFileReader,
        mut metadata: ParserMetadata,
    ) -> MetadataResult<ParserMetadata> {
        let file_size = match metadata.file_size {
            Some(size) => size,
            None => file.size().await?,
        };
        tracing::Span::current().record("file_size", file_size);

        let mut offset = 0;
        let mut length = self.min_slice_len;
        loop {
            let length_to_read = length.max(self.min_slice_len);
            let buf = file.get_bytes(offset..offset + length_to_read).await?;
            match parse_slice(offset, buf, &mut metadata)? {
                SliceOutcome::Complete => return Ok(metadata),
                SliceOutcome::NeedMoreBytes {
                    offset: next_offset,
                    length: next_length,
                } => {
                    if next_offset + next_length > file_size {
                        return Err(MetadataError::Malformed(format!(
                            "Segment at {next_offset} with {next_length} bytes runs past the end of the file ({file_size})"
                        )));
                    }
                    tracing::debug!(next_offset, next_length, "re-reading");
                    offset = next_offset;
                    length = next_length;
                }
            }
        }
    }
}

impl MetadataParser for ExifParser {
    fn name(&self) -> &'static str {
        "exif"
    }

    fn mime_type(&self) -> String {
        "image/jpeg".to_string()
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

/// Walk the JPEG markers in `buf`, which starts at `file_pos` in the file.
///
/// Returns [`SliceOutcome::NeedMoreBytes`] whenever a marker header or a whole segment body is
/// not contained in `buf`.
pub fn parse_slice(
    file_pos: u64,
    buf: Bytes,
    metadata: &mut ParserMetadata,
) -> MetadataResult<SliceOutcome> {
    let mut br = ByteReader::new(buf.clone());
    if !br.can_read(4) {
        return Err(MetadataError::Malformed(format!(
            "Unexpected EOF @{}",
            file_pos + buf.len() as u64
        )));
    }

    if file_pos == 0 && br.read_u16()? != MARK_SOI {
        return Err(MetadataError::InvalidSignature {
            format: "jpeg",
            found: crate::byte_reader::latin1(&buf[..2]),
        });
    }

    let reread = |br: &ByteReader, rewind: u64, length: u64| SliceOutcome::NeedMoreBytes {
        offset: file_pos + br.tell() as u64 - rewind,
        length,
    };

    loop {
        if !br.can_read(4) {
            return Ok(reread(&br, 0, 0));
        }

        // Fill bytes may pad the gap before a marker.
        while buf[br.tell()] == 0xFF && buf[br.tell() + 1] == 0xFF {
            br.skip(1)?;
            if !br.can_read(4) {
                return Ok(reread(&br, 0, 0));
            }
        }

        let mark = br.read_u16()?;
        if is_standalone(mark) {
            continue;
        }
        if mark == MARK_SOS {
            return Err(MetadataError::Malformed(
                "SOS marker found before SOF".to_string(),
            ));
        }

        let mark_length = br.read_u16()?.checked_sub(2).ok_or_else(|| {
            MetadataError::Malformed(format!("Invalid length for marker {mark:#06x}"))
        })? as usize;

        if !br.can_read(mark_length) {
            // Re-read from the marker, with the whole section in one slice.
            return Ok(reread(&br, 4, mark_length as u64 + 4));
        }

        let section_end = br.tell() + mark_length;

        if mark == MARK_EXIF && mark_length >= EXIF_SIGNATURE.len() {
            let signature = br.read_slice(EXIF_SIGNATURE.len(), None)?;
            if signature.as_ref() == EXIF_SIGNATURE {
                let exif = br.read_slice(section_end - br.tell(), None)?;
                parse_exif_section(exif, metadata)?;
            } else {
                tracing::debug!("APP1 segment without EXIF signature");
            }
        } else if is_sof(mark) {
            br.skip(1)?;
            let height = br.read_u16()? as u32;
            let width = br.read_u16()? as u32;
            let rotated = metadata.image_transform.is_some_and(|t| t.rotate90);
            if rotated {
                metadata.width = Some(height);
                metadata.height = Some(width);
            } else {
                metadata.width = Some(width);
                metadata.height = Some(height);
            }
            return Ok(SliceOutcome::Complete);
        }

        br.seek(section_end as i64, SeekOrigin::Begin)?;
    }
}

/// Parse the TIFF structure of an APP1 segment, starting right after the EXIF signature.
fn parse_exif_section(data: Bytes, metadata: &mut ParserMetadata) -> MetadataResult<()> {
    let mut br = ByteReader::new(data);

    let endianness = match br.read_u16()? {
        ALIGN_LITTLE => Endianness::LittleEndian,
        ALIGN_BIG => Endianness::BigEndian,
        other => {
            return Err(MetadataError::Malformed(format!(
                "Invalid alignment value {other:#06x}"
            )))
        }
    };
    br.set_byte_order(endianness);

    let tag = br.read_u16()?;
    if tag != TIFF_MAGIC {
        return Err(MetadataError::Malformed(format!(
            "Invalid TIFF tag {tag:#06x}"
        )));
    }

    metadata.little_endian = Some(endianness == Endianness::LittleEndian);

    let mut ifd = ExifDirectories::default();

    let image_offset = br.read_u32()?;
    let next_offset = match read_directory_at(&mut br, image_offset, &mut ifd.image) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read image directory");
            0
        }
    };

    let image_transform = transform_of(&ifd.image);
    if let Some(transform) = image_transform {
        metadata.image_transform = Some(transform);
    }

    if next_offset != 0 {
        if let Err(e) = read_directory_at(&mut br, next_offset, &mut ifd.thumbnail) {
            tracing::warn!(error = %e, "failed to read thumbnail directory");
        }
    }
    metadata.thumbnail_transform = transform_of(&ifd.thumbnail).or(image_transform);

    for (pointer_tag, slot, name) in [
        (TAG_EXIF_POINTER, &mut ifd.exif, "exif"),
        (TAG_GPS_POINTER, &mut ifd.gps, "gps"),
    ] {
        let Some(offset) = entry_u32(&ifd.image, pointer_tag) else {
            continue;
        };
        let mut directory = ExifDirectory::new();
        if let Err(e) = read_directory_at(&mut br, offset, &mut directory) {
            tracing::warn!(error = %e, directory = name, "failed to read directory");
        }
        *slot = Some(directory);
    }

    if let (Some(offset), Some(length)) = (
        entry_u32(&ifd.thumbnail, TAG_THUMBNAIL_OFFSET),
        entry_u32(&ifd.thumbnail, TAG_THUMBNAIL_LENGTH),
    ) {
        let thumbnail = br
            .seek(offset as i64, SeekOrigin::Begin)
            .and_then(|_| br.read_image(length as usize, None));
        match thumbnail {
            Ok(url) => metadata.thumbnail_url = Some(url),
            Err(e) => tracing::warn!(error = %e, "failed to read thumbnail"),
        }
    }

    metadata.ifd = Some(ifd);
    Ok(())
}

fn entry_u32(directory: &ExifDirectory, tag: u16) -> Option<u32> {
    directory
        .get(&tag)
        .and_then(|entry| entry.value.as_ref())
        .and_then(Value::as_u32)
}

fn transform_of(directory: &ExifDirectory) -> Option<ImageTransform> {
    entry_u32(directory, TAG_ORIENTATION).map(orientation_transform)
}

fn read_directory_at(
    br: &mut ByteReader,
    offset: u32,
    tags: &mut ExifDirectory,
) -> MetadataResult<u32> {
    br.seek(offset as i64, SeekOrigin::Begin)?;
    read_directory(br, tags)
}

/// Read a directory at the cursor into `tags`, returning the offset of the next directory.
///
/// Entries read before a failure stay in `tags`.
pub fn read_directory(br: &mut ByteReader, tags: &mut ExifDirectory) -> MetadataResult<u32> {
    let entry_count = br.read_u16()?;
    for _ in 0..entry_count {
        let id = br.read_u16()?;
        let format = br.read_u16()?;
        let component_count = br.read_u32()?;
        let mut entry = ExifEntry {
            id,
            format,
            component_count,
            value: None,
        };
        read_tag_value(br, &mut entry)?;
        tracing::trace!(tag = id, format, value = ?entry.value, "exif entry");
        tags.insert(id, entry);
    }
    br.read_u32()
}

/// Decode the value of `entry` from the 4-byte value field at the cursor.
///
/// The cursor always ends up just past the value field. A value that cannot be decoded is
/// logged and left as `None`; only a value field that is itself out of bounds is an error.
pub fn read_tag_value(br: &mut ByteReader, entry: &mut ExifEntry) -> MetadataResult<()> {
    let field_start = br.tell();
    match decode_tag_value(br, entry) {
        Ok(value) => entry.value = Some(value),
        Err(e) => {
            tracing::warn!(tag = entry.id, error = %e, "failed to read tag value");
            entry.value = None;
        }
    }
    br.seek(field_start as i64 + 4, SeekOrigin::Begin)
}

fn decode_tag_value(br: &mut ByteReader, entry: &mut ExifEntry) -> MetadataResult<Value> {
    let Ok(format) = ExifFormat::try_from_primitive(entry.format) else {
        tracing::warn!(tag = entry.id, format = entry.format, "unknown tag format");
        return Ok(Value::Unsigned(br.read_u32()?));
    };

    let size = entry.component_count as u64 * format.unit_size();
    if size == 0 {
        entry.component_count = 1;
        return Ok(Value::Unsigned(br.read_u32()?));
    }

    if size > 4 {
        let pointer = br.read_u32()?;
        br.push_seek(pointer as i64, SeekOrigin::Begin)?;
        let value = read_components(br, format, entry);
        br.pop_seek()?;
        value
    } else {
        read_components(br, format, entry)
    }
}

fn read_components(
    br: &mut ByteReader,
    format: ExifFormat,
    entry: &mut ExifEntry,
) -> MetadataResult<Value> {
    if format == ExifFormat::Ascii {
        let mut text = br.read_string(entry.component_count as usize, None)?;
        if !text.ends_with('\0') {
            text.push('\0');
            entry.component_count = text.chars().count() as u32;
        }
        return Ok(Value::Ascii(text));
    }

    let read_one = |br: &mut ByteReader| -> MetadataResult<Value> {
        Ok(match format {
            ExifFormat::Byte | ExifFormat::Ascii | ExifFormat::Undefined => {
                Value::Byte(br.read_u8()?)
            }
            ExifFormat::Short => Value::Short(br.read_u16()?),
            ExifFormat::Long => Value::Unsigned(br.read_u32()?),
            ExifFormat::SignedLong => Value::Signed(br.read_i32()?),
            ExifFormat::Rational => Value::Rational(br.read_u32()?, br.read_u32()?),
            ExifFormat::SignedRational => Value::SRational(br.read_i32()?, br.read_i32()?),
        })
    };

    if entry.component_count == 1 {
        return read_one(br);
    }
    let mut values = Vec::with_capacity((entry.component_count as usize).min(1024));
    for _ in 0..entry.component_count {
        values.push(read_one(br)?);
    }
    Ok(Value::List(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &[u8], endianness: Endianness) -> ExifEntry {
        let mut br = ByteReader::new(Bytes::copy_from_slice(data));
        br.set_byte_order(endianness);
        let mut tags = ExifDirectory::new();
        let next = read_directory(&mut br, &mut tags).unwrap();
        assert_eq!(next, 0);
        tags.into_values().next().unwrap()
    }

    #[test]
    #[rustfmt::skip]
    fn test_inline_values() {
        let cases = [
            // count  tag     type    count      value         next dir
            (&[0,1,   1,0x12, 0,3,    0,0,0,1,   0,8,0,0,      0,0,0,0][..], Endianness::BigEndian,    Value::Short(8)),
            (&[1,0,   0x12,1, 3,0,    1,0,0,0,   8,0,0,0,      0,0,0,0][..], Endianness::LittleEndian, Value::Short(8)),
            (&[0,1,   0,1,    0,1,    0,0,0,1,   42,0,0,0,     0,0,0,0][..], Endianness::BigEndian,    Value::Byte(42)),
            (&[0,1,   0,1,    0,7,    0,0,0,2,   1,2,0,0,      0,0,0,0][..], Endianness::BigEndian,    Value::List(vec![Value::Byte(1), Value::Byte(2)])),
            (&[0,1,   0,1,    0,4,    0,0,0,1,   0,0,1,0,      0,0,0,0][..], Endianness::BigEndian,    Value::Unsigned(256)),
            (&[0,1,   0,1,    0,9,    0,0,0,1,   255,255,255,254, 0,0,0,0][..], Endianness::BigEndian, Value::Signed(-2)),
            (&[0,1,   0,1,    0,2,    0,0,0,3,   b'a',b'b',0,0, 0,0,0,0][..], Endianness::BigEndian,   Value::Ascii("ab\0".into())),
            // zero components read as one long
            (&[0,1,   0,1,    0,3,    0,0,0,0,   0,0,0,7,      0,0,0,0][..], Endianness::BigEndian,    Value::Unsigned(7)),
            // unknown format read as one long
            (&[0,1,   0,1,    0,11,   0,0,0,1,   0,0,0,9,      0,0,0,0][..], Endianness::BigEndian,    Value::Unsigned(9)),
        ];
        for (data, endianness, expected) in cases {
            assert_eq!(entry(data, endianness).value, Some(expected));
        }
    }

    #[test]
    #[rustfmt::skip]
    fn test_string_gets_null_terminator() {
        let data: &[u8] = &[
            0,1,                    // one entry
            0x01,0x0f, 0,2,         // Make, ascii
            0,0,0,8,  0,0,0,18,     // 8 components at offset 18
            0,0,0,0,                // next directory
            b'M',b'a',b'n',b'u',b'f',b'a',b'c',b't',
        ];
        let e = entry(data, Endianness::BigEndian);
        assert_eq!(e.value, Some(Value::Ascii("Manufact\0".into())));
        assert_eq!(e.component_count, 9);
    }

    #[test]
    #[rustfmt::skip]
    fn test_rational_via_pointer() {
        let data: &'static [u8] = &[
            0,1,
            0x01,0x1a, 0,5,
            0,0,0,1,  0,0,0,18,
            0,0,0,0,
            0,0,0,72, 0,0,0,1,
        ];
        assert_eq!(entry(data, Endianness::BigEndian).value, Some(Value::Rational(72, 1)));
    }

    #[test]
    #[rustfmt::skip]
    fn test_bad_pointer_keeps_directory_aligned() {
        let data: &'static [u8] = &[
            0,2,
            0x01,0x1a, 0,5,   0,0,0,1,  0,0,0,200,  // runaway pointer
            0x01,0x12, 0,3,   0,0,0,1,  0,6,0,0,
            0,0,0,0,
        ];
        let mut br = ByteReader::new(Bytes::from_static(data));
        let mut tags = ExifDirectory::new();
        read_directory(&mut br, &mut tags).unwrap();
        assert_eq!(tags[&0x011a].value, None);
        assert_eq!(tags[&TAG_ORIENTATION].value, Some(Value::Short(6)));
    }

    #[test]
    fn test_orientation_tables() {
        assert_eq!(orientation_transform(1), ImageTransform::default());
        assert_eq!(
            orientation_transform(8),
            ImageTransform { scale_x: -1, scale_y: 1, rotate90: true }
        );
        assert_eq!(
            orientation_transform(3),
            ImageTransform { scale_x: -1, scale_y: -1, rotate90: false }
        );
        assert_eq!(orientation_transform(0), ImageTransform::default());
        assert_eq!(orientation_transform(9), ImageTransform::default());
    }

    #[test]
    fn test_is_sof() {
        assert!(is_sof(0xFFC0));
        assert!(is_sof(0xFFC2));
        assert!(!is_sof(0xFFC4));
        assert!(!is_sof(0xFFC8));
        assert!(!is_sof(0xFFCC));
        assert!(!is_sof(0xFFE1));
    }

    #[test]
    fn test_slice_requests_more_bytes() {
        // SOI, then an APP0 segment declaring 100 bytes of which only 4 are present.
        let buf = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x66, 1, 2, 3, 4]);
        let mut metadata = ParserMetadata::default();
        let outcome = parse_slice(0, buf, &mut metadata).unwrap();
        assert_eq!(
            outcome,
            SliceOutcome::NeedMoreBytes { offset: 2, length: 104 }
        );

        // A slice that ends between markers continues where the cursor stopped.
        let buf = Bytes::from_static(&[0xFF, 0xE0, 0x00, 0x04, 1, 2, 0xFF]);
        let outcome = parse_slice(2, buf, &mut metadata).unwrap();
        assert_eq!(outcome, SliceOutcome::NeedMoreBytes { offset: 8, length: 0 });
    }

    #[test]
    fn test_slice_skips_fill_bytes_and_standalone_markers() {
        #[rustfmt::skip]
        let buf = Bytes::from_static(&[
            0xFF, 0xD8,
            0xFF, 0xFF, 0xFF, 0xE0, 0x00, 0x04, 1, 2,
            0xFF, 0xD0,
            0xFF, 0xFF, 0xC0, 0x00, 0x0B, 8, 0x00, 0x20, 0x00, 0x40, 1, 1, 0x11, 0,
        ]);
        let mut metadata = ParserMetadata::default();
        let outcome = parse_slice(0, buf, &mut metadata).unwrap();
        assert_eq!(outcome, SliceOutcome::Complete);
        assert_eq!((metadata.width, metadata.height), (Some(64), Some(32)));

        // Fill bytes running into the end of the slice ask for more data from there.
        let buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let outcome = parse_slice(10, buf, &mut metadata).unwrap();
        assert_eq!(outcome, SliceOutcome::NeedMoreBytes { offset: 12, length: 0 });
    }

    #[test]
    fn test_slice_errors() {
        let mut metadata = ParserMetadata::default();
        let err = parse_slice(0, Bytes::from_static(b"\x89PNG"), &mut metadata).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidSignature { .. }));

        let err = parse_slice(0, Bytes::from_static(&[0xFF, 0xD8]), &mut metadata).unwrap_err();
        assert!(matches!(err, MetadataError::Malformed(_)));

        let sos = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02]);
        let err = parse_slice(0, sos, &mut metadata).unwrap_err();
        assert!(err.to_string().contains("SOS"));
    }
}
