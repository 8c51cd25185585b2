//! Dimensions from the fixed-size headers of simple image formats.

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;

use crate::byte_reader::{latin1, ByteReader, SeekOrigin};
use crate::error::{MetadataError, MetadataResult};
use crate::parsers::{url_filter, MetadataParser, ParserMetadata};
use crate::reader::{AsyncFileReader, Endianness};

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const VP8_START_CODE: u32 = 0x2a019d;
const VP8L_SIGNATURE: u8 = 0x2f;
const ICO_SIGNATURE: &[u8; 4] = b"\0\0\x01\0";

/// Image formats whose dimensions live at fixed offsets of a short header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Bmp,
    Gif,
    Webp,
    Ico,
}

impl ImageFormat {
    /// All formats, in the order they are registered.
    pub const ALL: [ImageFormat; 5] = [Self::Png, Self::Bmp, Self::Gif, Self::Webp, Self::Ico];

    /// Name of the format, also used as the mime subtype.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Ico => "ico",
        }
    }

    /// Byte order of the header fields.
    pub fn byte_order(&self) -> Endianness {
        match self {
            Self::Png => Endianness::BigEndian,
            _ => Endianness::LittleEndian,
        }
    }

    /// Number of bytes read from the start of the file.
    pub fn header_size(&self) -> usize {
        match self {
            Self::Png => 24,
            Self::Bmp => 26,
            Self::Gif => 10,
            Self::Webp => 30,
            Self::Ico => 8,
        }
    }

    fn signature_error(&self, found: &[u8]) -> MetadataError {
        MetadataError::InvalidSignature {
            format: self.name(),
            found: latin1(found),
        }
    }

    fn expect(&self, br: &mut ByteReader, signature: &[u8]) -> MetadataResult<()> {
        let found = br.read_slice(signature.len(), None)?;
        if found.as_ref() != signature {
            return Err(self.signature_error(&found));
        }
        Ok(())
    }

    /// Read `(width, height)` from a header, with the reader at offset 0.
    pub fn parse_header(&self, br: &mut ByteReader) -> MetadataResult<(u32, u32)> {
        br.set_byte_order(self.byte_order());
        match self {
            Self::Png => {
                self.expect(br, PNG_SIGNATURE)?;
                br.seek(12, SeekOrigin::Begin)?;
                self.expect(br, b"IHDR")?;
                Ok((br.read_u32()?, br.read_u32()?))
            }
            Self::Bmp => {
                self.expect(br, b"BM")?;
                br.seek(18, SeekOrigin::Begin)?;
                Ok((br.read_u32()?, br.read_u32()?))
            }
            Self::Gif => {
                let signature = br.read_slice(6, None)?;
                if !matches!(signature.as_ref(), b"GIF87a" | b"GIF89a") {
                    return Err(self.signature_error(&signature));
                }
                Ok((br.read_u16()? as u32, br.read_u16()? as u32))
            }
            Self::Webp => parse_webp(self, br),
            Self::Ico => {
                self.expect(br, ICO_SIGNATURE)?;
                br.seek(6, SeekOrigin::Begin)?;
                let size = |b: u8| if b == 0 { 256 } else { b as u32 };
                Ok((size(br.read_u8()?), size(br.read_u8()?)))
            }
        }
    }
}

fn read_u24(br: &mut ByteReader) -> MetadataResult<u32> {
    let low = br.read_u16()? as u32;
    Ok(low | (br.read_u8()? as u32) << 16)
}

fn parse_webp(format: &ImageFormat, br: &mut ByteReader) -> MetadataResult<(u32, u32)> {
    format.expect(br, b"RIFF")?;
    br.seek(8, SeekOrigin::Begin)?;
    format.expect(br, b"WEBP")?;
    let chunk = br.read_slice(4, None)?;
    match chunk.as_ref() {
        b"VP8 " => {
            br.seek(23, SeekOrigin::Begin)?;
            let start_code = read_u24(br)?;
            if start_code != VP8_START_CODE {
                return Err(format.signature_error(&start_code.to_le_bytes()[..3]));
            }
            let bits = br.read_u32()?;
            Ok((bits & 0x3fff, (bits >> 16) & 0x3fff))
        }
        b"VP8L" => {
            br.seek(20, SeekOrigin::Begin)?;
            let signature = br.read_u8()?;
            if signature != VP8L_SIGNATURE {
                return Err(format.signature_error(&[signature]));
            }
            let bits = br.read_u32()?;
            Ok(((bits & 0x3fff) + 1, ((bits >> 14) & 0x3fff) + 1))
        }
        b"VP8X" => {
            br.seek(24, SeekOrigin::Begin)?;
            Ok((read_u24(br)? + 1, read_u24(br)? + 1))
        }
        _ => Err(format.signature_error(&chunk)),
    }
}

/// A parser for one [`ImageFormat`].
#[derive(Debug, Clone)]
pub struct ImageHeaderParser {
    format: ImageFormat,
    url_filter: Regex,
}

impl ImageHeaderParser {
    /// Create a parser for `format`, matching URLs by its extension.
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            url_filter: url_filter(&format!(r"\.{}$", format.name())),
        }
    }

    /// The format handled by this parser.
    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

impl MetadataParser for ImageHeaderParser {
    fn name(&self) -> &'static str {
        self.format.name()
    }

    fn mime_type(&self) -> String {
        format!("image/{}", self.format.name())
    }

    fn url_filter(&self) -> &Regex {
        &self.url_filter
    }

    fn parse<'a>(
        &'a self,
        file: &'a dyn AsyncFileReader,
        mut metadata: ParserMetadata,
    ) -> BoxFuture<'a, MetadataResult<ParserMetadata>> {
        async move {
            let header = file.get_bytes(0..self.format.header_size() as u64).await?;
            let mut br = ByteReader::new(header);
            let (width, height) = self.format.parse_header(&mut br)?;
            metadata.width = Some(width);
            metadata.height = Some(height);
            Ok(metadata)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn parse(format: ImageFormat, data: &[u8]) -> MetadataResult<(u32, u32)> {
        format.parse_header(&mut ByteReader::new(Bytes::copy_from_slice(data)))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend(13u32.to_be_bytes());
        data.extend(b"IHDR");
        data.extend(width.to_be_bytes());
        data.extend(height.to_be_bytes());
        data
    }

    fn bmp(width: u32, height: u32) -> Vec<u8> {
        let mut data = b"BM".to_vec();
        data.resize(18, 0);
        data.extend(width.to_le_bytes());
        data.extend(height.to_le_bytes());
        data
    }

    fn webp(chunk: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = b"RIFF\0\0\0\0WEBP".to_vec();
        data.extend(chunk);
        data.resize(20, 0);
        data.extend(payload);
        data.resize(30, 0);
        data
    }

    #[test]
    fn test_png_and_bmp_round_trip() {
        for (width, height) in [(1, 1), (640, 480), (65536, 3)] {
            assert_eq!(parse(ImageFormat::Png, &png(width, height)).unwrap(), (width, height));
            assert_eq!(parse(ImageFormat::Bmp, &bmp(width, height)).unwrap(), (width, height));
        }
    }

    #[test]
    fn test_gif() {
        assert_eq!(parse(ImageFormat::Gif, b"GIF89a\x40\x01\xf0\x00").unwrap(), (320, 240));
        assert_eq!(parse(ImageFormat::Gif, b"GIF87a\x01\x00\x02\x00").unwrap(), (1, 2));
        let err = parse(ImageFormat::Gif, b"GIF88a\x01\x00\x02\x00").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidSignature { format: "gif", .. }));
    }

    #[test]
    #[rustfmt::skip]
    fn test_webp_variants() {
        // lossy: frame header, start code at 23, 14-bit dimensions at 26
        let lossy = webp(b"VP8 ", &[0, 0, 0, 0x9d, 0x01, 0x2a, 0x80, 0x02, 0xe0, 0x01]);
        assert_eq!(parse(ImageFormat::Webp, &lossy).unwrap(), (640, 480));

        // lossless: signature at 20, (w - 1) | (h - 1) << 14 at 21
        let bits: u32 = 99 | (49 << 14);
        let mut payload = vec![0x2f];
        payload.extend(bits.to_le_bytes());
        let lossless = webp(b"VP8L", &payload);
        assert_eq!(parse(ImageFormat::Webp, &lossless).unwrap(), (100, 50));

        // extended: 24-bit canvas size minus one at 24 and 27
        let extended = webp(b"VP8X", &[0, 0, 0, 0, 0xff, 0x03, 0x00, 0xff, 0x01, 0x00]);
        assert_eq!(parse(ImageFormat::Webp, &extended).unwrap(), (1024, 512));

        let bad_code = webp(b"VP8 ", &[0, 0, 0, 0x9d, 0x01, 0x2b, 1, 0, 1, 0]);
        assert!(parse(ImageFormat::Webp, &bad_code).is_err());
        let unknown = webp(b"ALPH", &[]);
        assert!(parse(ImageFormat::Webp, &unknown).is_err());
    }

    #[test]
    fn test_ico() {
        assert_eq!(parse(ImageFormat::Ico, b"\0\0\x01\0\x01\0\x10\x20").unwrap(), (16, 32));
        assert_eq!(parse(ImageFormat::Ico, b"\0\0\x01\0\x01\0\0\0").unwrap(), (256, 256));
        assert!(parse(ImageFormat::Ico, b"\0\0\x02\0\x01\0\x10\x20").is_err());
    }

    #[test]
    fn test_signature_mismatch() {
        let err = parse(ImageFormat::Png, &bmp(1, 1)).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidSignature { format: "png", .. }));
        let err = parse(ImageFormat::Bmp, b"BM").unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[tokio::test]
    async fn test_parser_fills_dimensions() {
        let parser = ImageHeaderParser::new(ImageFormat::Png);
        let file = Bytes::from(png(3, 7));
        let metadata = parser
            .parse(&file, ParserMetadata::new("png", "image/png"))
            .await
            .unwrap();
        assert_eq!((metadata.width, metadata.height), (Some(3), Some(7)));
        assert!(parser.accepts("file:///tmp/A.PNG"));
    }
}
