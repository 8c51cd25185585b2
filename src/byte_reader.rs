//! A cursor over an in-memory byte buffer.
//!
//! The format parsers fetch a slice of a file with an [`AsyncFileReader`] and then walk it
//! synchronously with a [`ByteReader`]. Every read is bounds checked against an optional end
//! bound (never past the buffer) and a failed read leaves the cursor where it was.
//!
//! [`AsyncFileReader`]: crate::reader::AsyncFileReader

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{MetadataError, MetadataResult};
use crate::reader::Endianness;

/// Image types recognized by [`ByteReader::read_image`], keyed by their first two bytes.
const IMAGE_MAGIC: [(&[u8; 2], &str); 4] = [
    (b"\x89P", "png"),
    (b"\xFF\xD8", "jpeg"),
    (b"BM", "bmp"),
    (b"GI", "gif"),
];

/// Where a seek is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// From the start of the view.
    Begin,
    /// From the current cursor position.
    Current,
    /// From the end bound (the buffer length unless another end is given).
    End,
}

/// Build a `data:` URL for an embedded image, sniffing its type from the first two bytes.
pub fn image_data_url(data: &[u8]) -> String {
    let prefix = &data[..data.len().min(2)];
    let mime = IMAGE_MAGIC
        .iter()
        .find(|(magic, _)| magic.as_slice() == prefix)
        .map(|(_, mime)| mime.to_string())
        .unwrap_or_else(|| prefix.iter().map(|b| format!("{b:02x}")).collect());
    format!("data:image/{mime};base64,{}", STANDARD.encode(data))
}

/// Decode bytes as Latin-1 code points.
pub(crate) fn latin1(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

/// A bounds-checked cursor over a fixed view of a [`Bytes`] buffer.
#[derive(Debug, Clone)]
pub struct ByteReader {
    view: Bytes,
    pos: usize,
    endianness: Endianness,
    seek_stack: Vec<usize>,
}

impl ByteReader {
    /// Create a reader over the whole buffer, big endian, cursor at 0.
    pub fn new(buffer: Bytes) -> Self {
        Self {
            view: buffer,
            pos: 0,
            endianness: Endianness::BigEndian,
            seek_stack: vec![],
        }
    }

    /// Create a reader over `buffer[offset..offset + length]`.
    ///
    /// `length` defaults to the remainder of the buffer. Offsets inside the new reader are
    /// relative to `offset`.
    pub fn with_view(buffer: &Bytes, offset: usize, length: Option<usize>) -> MetadataResult<Self> {
        let length = match length {
            Some(length) => length,
            None => buffer.len().checked_sub(offset).ok_or(MetadataError::OutOfRange {
                position: offset,
                size: 0,
                end: buffer.len(),
            })?,
        };
        let end = offset.checked_add(length).unwrap_or(usize::MAX);
        if end > buffer.len() {
            return Err(MetadataError::OutOfRange {
                position: offset,
                size: length,
                end: buffer.len(),
            });
        }
        Ok(Self::new(buffer.slice(offset..end)))
    }

    /// Set the byte order used by scalar reads.
    pub fn set_byte_order(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    /// The byte order used by scalar reads.
    pub fn byte_order(&self) -> Endianness {
        self.endianness
    }

    /// Length of the view.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Returns `true` if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Current cursor position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Returns `true` if the cursor is at (or past) the end of the view.
    pub fn eof(&self) -> bool {
        self.pos >= self.view.len()
    }

    /// Returns `true` if the cursor is at the start of the view.
    pub fn bof(&self) -> bool {
        self.pos == 0
    }

    /// Returns `true` if the cursor sits on either boundary of the view.
    pub fn beof(&self) -> bool {
        self.bof() || self.eof()
    }

    /// Returns `true` if `size` more bytes fit before the end of the view.
    pub fn can_read(&self, size: usize) -> bool {
        self.pos
            .checked_add(size)
            .is_some_and(|end| end <= self.view.len())
    }

    fn effective_end(&self, end: Option<usize>) -> usize {
        end.map_or(self.view.len(), |end| end.min(self.view.len()))
    }

    fn validate_read(&self, size: usize, end: Option<usize>) -> MetadataResult<usize> {
        let end = self.effective_end(end);
        match self.pos.checked_add(size) {
            Some(read_end) if read_end <= end => Ok(read_end),
            _ => Err(MetadataError::OutOfRange {
                position: self.pos,
                size,
                end,
            }),
        }
    }

    /// Borrow the next `size` bytes and advance past them.
    fn take(&mut self, size: usize, end: Option<usize>) -> MetadataResult<&[u8]> {
        let read_end = self.validate_read(size, end)?;
        let start = self.pos;
        self.pos = read_end;
        Ok(&self.view[start..read_end])
    }

    /// Read an unsigned integer of `width` bytes (1, 2, 4 or 8) in the current byte order.
    ///
    /// Eight byte values are assembled from two four byte words.
    pub fn read_scalar(&mut self, width: usize, end: Option<usize>) -> MetadataResult<u64> {
        if width == 8 {
            self.validate_read(8, end)?;
            let first = self.read_scalar(4, end)?;
            let second = self.read_scalar(4, end)?;
            return Ok(match self.endianness {
                Endianness::BigEndian => (first << 32) | second,
                Endianness::LittleEndian => (second << 32) | first,
            });
        }
        let endianness = self.endianness;
        if !matches!(width, 1 | 2 | 4) {
            return Err(MetadataError::General(format!(
                "unsupported scalar width {width}"
            )));
        }
        let data = self.take(width, end)?;
        Ok(match (width, endianness) {
            (1, _) => data[0] as u64,
            (2, Endianness::BigEndian) => BigEndian::read_u16(data) as u64,
            (2, Endianness::LittleEndian) => LittleEndian::read_u16(data) as u64,
            (_, Endianness::BigEndian) => BigEndian::read_u32(data) as u64,
            (_, Endianness::LittleEndian) => LittleEndian::read_u32(data) as u64,
        })
    }

    /// Read a two's complement integer of `width` bytes (1, 2, 4 or 8).
    pub fn read_signed_scalar(&mut self, width: usize, end: Option<usize>) -> MetadataResult<i64> {
        let value = self.read_scalar(width, end)?;
        Ok(match width {
            1 => value as u8 as i8 as i64,
            2 => value as u16 as i16 as i64,
            4 => value as u32 as i32 as i64,
            _ => value as i64,
        })
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> MetadataResult<u8> {
        Ok(self.read_scalar(1, None)? as u8)
    }

    /// Read a two byte unsigned integer.
    pub fn read_u16(&mut self) -> MetadataResult<u16> {
        Ok(self.read_scalar(2, None)? as u16)
    }

    /// Read a four byte unsigned integer.
    pub fn read_u32(&mut self) -> MetadataResult<u32> {
        Ok(self.read_scalar(4, None)? as u32)
    }

    /// Read a four byte signed integer.
    pub fn read_i32(&mut self) -> MetadataResult<i32> {
        Ok(self.read_signed_scalar(4, None)? as i32)
    }

    /// Read `size` bytes as a zero-copy slice of the underlying buffer.
    pub fn read_slice(&mut self, size: usize, end: Option<usize>) -> MetadataResult<Bytes> {
        let read_end = self.validate_read(size, end)?;
        let slice = self.view.slice(self.pos..read_end);
        self.pos = read_end;
        Ok(slice)
    }

    /// Read `size` bytes as Latin-1 text.
    pub fn read_string(&mut self, size: usize, end: Option<usize>) -> MetadataResult<String> {
        self.take(size, end).map(latin1)
    }

    /// Read up to `size` bytes of Latin-1 text, stopping at the first zero byte.
    ///
    /// The cursor always advances by `size` so that the next read starts after the field.
    pub fn read_null_terminated_string(
        &mut self,
        size: usize,
        end: Option<usize>,
    ) -> MetadataResult<String> {
        let data = self.take(size, end)?;
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(latin1(&data[..len]))
    }

    /// Read up to `size` bytes of UTF-16 text, stopping at the first zero code unit.
    ///
    /// With `has_byte_order_mark`, the first two bytes select the byte order of this string
    /// only (`FF FE` is little endian, anything else big endian). Without one the text is big
    /// endian. The reader's own byte order is not consulted. The cursor advances by `size`.
    pub fn read_null_terminated_string_utf16(
        &mut self,
        has_byte_order_mark: bool,
        size: usize,
        end: Option<usize>,
    ) -> MetadataResult<String> {
        let data = self.take(size, end)?;
        let mut little_endian = false;
        let mut start = 0;
        if has_byte_order_mark && data.len() >= 2 {
            little_endian = data[0] == 0xFF;
            start = 2;
        }
        let units = data[start..]
            .chunks_exact(2)
            .map(|unit| {
                if little_endian {
                    LittleEndian::read_u16(unit)
                } else {
                    BigEndian::read_u16(unit)
                }
            })
            .take_while(|&unit| unit != 0);
        Ok(char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }

    /// Read `size` bytes and return them base64 encoded.
    pub fn read_base64(&mut self, size: usize, end: Option<usize>) -> MetadataResult<String> {
        self.take(size, end).map(|data| STANDARD.encode(data))
    }

    /// Read `size` bytes of an embedded image and return them as a `data:` URL.
    pub fn read_image(&mut self, size: usize, end: Option<usize>) -> MetadataResult<String> {
        self.take(size, end).map(image_data_url)
    }

    /// Advance the cursor by `size` bytes without reading them.
    pub fn skip(&mut self, size: usize) -> MetadataResult<()> {
        self.seek(size as i64, SeekOrigin::Current)
    }

    /// Move the cursor. [`SeekOrigin::End`] is relative to the buffer length.
    pub fn seek(&mut self, pos: i64, origin: SeekOrigin) -> MetadataResult<()> {
        self.seek_bounded(pos, origin, None)
    }

    /// Move the cursor, measuring [`SeekOrigin::End`] from `end`.
    ///
    /// The resulting position must lie within `0..=len()` regardless of `end`.
    pub fn seek_bounded(
        &mut self,
        pos: i64,
        origin: SeekOrigin,
        end: Option<usize>,
    ) -> MetadataResult<()> {
        let end = end.unwrap_or(self.view.len()) as i64;
        let new_pos = match origin {
            SeekOrigin::Begin => Some(pos),
            SeekOrigin::Current => (self.pos as i64).checked_add(pos),
            SeekOrigin::End => end.checked_add(pos),
        };
        match new_pos {
            Some(new_pos) if new_pos >= 0 && new_pos <= self.view.len() as i64 => {
                self.pos = new_pos as usize;
                Ok(())
            }
            _ => Err(MetadataError::SeekOutOfRange {
                position: new_pos.unwrap_or(i64::MAX),
                length: self.view.len(),
            }),
        }
    }

    /// Seek, remembering the current position for [`pop_seek`](Self::pop_seek).
    ///
    /// Nothing is remembered if the seek fails.
    pub fn push_seek(&mut self, pos: i64, origin: SeekOrigin) -> MetadataResult<()> {
        let old_pos = self.pos;
        self.seek(pos, origin)?;
        self.seek_stack.push(old_pos);
        Ok(())
    }

    /// Return to the position saved by the matching [`push_seek`](Self::push_seek).
    pub fn pop_seek(&mut self) -> MetadataResult<()> {
        let pos = self
            .seek_stack
            .pop()
            .ok_or_else(|| MetadataError::General("pop_seek without push_seek".to_string()))?;
        self.pos = pos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> ByteReader {
        ByteReader::new(Bytes::from_static(data))
    }

    fn reader_over(data: &[u8]) -> ByteReader {
        ByteReader::new(Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_scalars_honor_byte_order() {
        let mut br = reader(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
        assert_eq!(br.read_scalar(2, None).unwrap(), 0x1234);
        br.set_byte_order(Endianness::LittleEndian);
        assert_eq!(br.read_scalar(2, None).unwrap(), 0x7856);
        br.seek(0, SeekOrigin::Begin).unwrap();
        assert_eq!(br.read_scalar(4, None).unwrap(), 0x78563412);
        br.seek(0, SeekOrigin::Begin).unwrap();
        assert_eq!(br.read_scalar(8, None).unwrap(), 0xf0debc9a78563412);
        br.set_byte_order(Endianness::BigEndian);
        br.seek(0, SeekOrigin::Begin).unwrap();
        assert_eq!(br.read_scalar(8, None).unwrap(), 0x123456789abcdef0);
    }

    #[test]
    fn test_signed_scalars() {
        let mut br = reader(&[0xff, 0xff, 0xfe, 0xff, 0xff, 0xff, 0xfd]);
        assert_eq!(br.read_signed_scalar(1, None).unwrap(), -1);
        assert_eq!(br.read_signed_scalar(2, None).unwrap(), -2);
        assert_eq!(br.read_signed_scalar(4, None).unwrap(), -3);
    }

    #[test]
    fn test_failed_read_does_not_move_cursor() {
        let mut br = reader(&[1, 2, 3]);
        br.read_u8().unwrap();
        let err = br.read_scalar(4, None).unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(br.tell(), 1);
        // end bound tighter than the buffer
        assert!(br.read_scalar(2, Some(2)).is_err());
        assert_eq!(br.tell(), 1);
        assert_eq!(br.read_scalar(2, Some(3)).unwrap(), 0x0203);
        assert!(br.eof());
    }

    #[test]
    fn test_null_terminated_string_advances_full_size() {
        let mut br = reader(b"abc\0\0\0xyz");
        assert_eq!(br.read_null_terminated_string(6, None).unwrap(), "abc");
        assert_eq!(br.tell(), 6);
        assert_eq!(br.read_string(3, None).unwrap(), "xyz");
    }

    #[test]
    fn test_latin1_strings() {
        let mut br = reader(&[0xa9, b'n', b'a', b'm']);
        assert_eq!(br.read_string(4, None).unwrap(), "\u{a9}nam");
    }

    #[test]
    fn test_utf16_strings() {
        // little endian with BOM
        let mut br = reader(&[0xff, 0xfe, b'h', 0, b'i', 0, 0, 0, 0xaa, 0xbb]);
        assert_eq!(br.read_null_terminated_string_utf16(true, 8, None).unwrap(), "hi");
        assert_eq!(br.tell(), 8);

        // big endian with BOM, reader left little endian
        let mut br = reader(&[0xfe, 0xff, 0, b'o', 0, b'k']);
        br.set_byte_order(Endianness::LittleEndian);
        assert_eq!(br.read_null_terminated_string_utf16(true, 6, None).unwrap(), "ok");
        assert_eq!(br.byte_order(), Endianness::LittleEndian);

        // no BOM is big endian
        let mut br = reader(&[0, b'y', 0, b'o', 0, 0]);
        assert_eq!(br.read_null_terminated_string_utf16(false, 6, None).unwrap(), "yo");
    }

    #[test]
    fn test_base64_padding() {
        let data: Vec<u8> = (0..=255u8).rev().collect();
        for len in 0..40 {
            let encoded = reader_over(&data[..len]).read_base64(len, None).unwrap();
            match len % 3 {
                1 => assert!(encoded.ends_with("==")),
                2 => assert!(encoded.ends_with('=') && !encoded.ends_with("==")),
                _ => assert!(!encoded.ends_with('=')),
            }
            assert_eq!(STANDARD.decode(&encoded).unwrap(), &data[..len]);
        }
    }

    #[test]
    fn test_image_data_url_decodes_to_input() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR";
        let url = image_data_url(png);
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(payload).unwrap(), png);
    }

    #[test]
    fn test_read_image_sniffs_magic() {
        let mut br = reader(b"\xFF\xD8\xFF");
        assert_eq!(br.read_image(3, None).unwrap(), "data:image/jpeg;base64,/9j/");
        let mut br = reader(b"\x01\x02\x03");
        assert_eq!(br.read_image(3, None).unwrap(), "data:image/0102;base64,AQID");
    }

    #[test]
    fn test_seek_bounds() {
        let mut br = reader(&[0; 10]);
        br.seek(10, SeekOrigin::Begin).unwrap();
        assert!(br.eof());
        assert!(br.seek(11, SeekOrigin::Begin).is_err());
        assert!(br.seek(-11, SeekOrigin::Current).is_err());
        assert_eq!(br.tell(), 10);
        br.seek(-4, SeekOrigin::End).unwrap();
        assert_eq!(br.tell(), 6);
        br.seek_bounded(-1, SeekOrigin::End, Some(5)).unwrap();
        assert_eq!(br.tell(), 4);
        br.seek(0, SeekOrigin::Begin).unwrap();
        assert!(br.bof() && br.beof());
    }

    #[test]
    fn test_push_seek_is_balanced_on_failure() {
        let mut br = reader(&[0, 1, 2, 3, 4, 5]);
        br.seek(2, SeekOrigin::Begin).unwrap();
        assert!(br.push_seek(100, SeekOrigin::Begin).is_err());
        assert!(br.pop_seek().is_err());

        br.push_seek(5, SeekOrigin::Begin).unwrap();
        assert_eq!(br.read_u8().unwrap(), 5);
        br.push_seek(0, SeekOrigin::Begin).unwrap();
        assert_eq!(br.read_u8().unwrap(), 0);
        br.pop_seek().unwrap();
        assert_eq!(br.tell(), 6);
        br.pop_seek().unwrap();
        assert_eq!(br.tell(), 2);
    }

    #[test]
    fn test_view() {
        let buffer = Bytes::from_static(b"..MM\x00\x2a");
        let mut br = ByteReader::with_view(&buffer, 2, None).unwrap();
        assert_eq!(br.len(), 4);
        assert_eq!(br.read_u16().unwrap(), 0x4d4d);
        assert!(ByteReader::with_view(&buffer, 4, Some(3)).is_err());
        assert!(ByteReader::with_view(&buffer, 7, None).is_err());
    }
}
