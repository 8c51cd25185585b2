//! Synthetic files for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use file_metadata::dispatcher::FileResolver;
use file_metadata::error::{MetadataError, MetadataResult};
use file_metadata::reader::AsyncFileReader;
use futures::future::{BoxFuture, FutureExt};

/// Serves files from memory, keyed by URL.
#[derive(Debug, Default)]
pub(crate) struct MemoryResolver(pub HashMap<String, Bytes>);

impl MemoryResolver {
    pub(crate) fn with(mut self, url: &str, data: Vec<u8>) -> Self {
        self.0.insert(url.to_string(), Bytes::from(data));
        self
    }
}

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

fn segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
    out.extend([0xff, marker]);
    out.extend(((payload.len() + 2) as u16).to_be_bytes());
    out.extend(payload);
}

/// A little-endian JPEG whose image directory holds only an orientation tag.
pub(crate) fn jpeg(orientation: u16, width: u16, height: u16) -> Vec<u8> {
    let mut tiff = b"II\x2a\x00".to_vec();
    tiff.extend(8u32.to_le_bytes());
    tiff.extend(1u16.to_le_bytes());
    tiff.extend(0x0112u16.to_le_bytes());
    tiff.extend(3u16.to_le_bytes());
    tiff.extend(1u32.to_le_bytes());
    tiff.extend(orientation.to_le_bytes());
    tiff.extend([0, 0]);
    tiff.extend(0u32.to_le_bytes());

    let mut app1 = b"Exif\0\0".to_vec();
    app1.extend(tiff);

    let mut sof = vec![8];
    sof.extend(height.to_be_bytes());
    sof.extend(width.to_be_bytes());
    sof.extend([1, 1, 0x11, 0]);

    let mut data = vec![0xff, 0xd8];
    segment(&mut data, 0xe1, &app1);
    segment(&mut data, 0xc0, &sof);
    data.extend([0xff, 0xda, 0x00, 0x02, 0xff, 0xd9]);
    data
}

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut field = text.as_bytes().to_vec();
    field.push(0);
    field.resize(len, 0);
    field
}

/// Some audio bytes followed by an ID3v1 tag.
pub(crate) fn mp3_with_id3v1(title: &str, artist: &str, album: &str) -> Vec<u8> {
    let mut data = vec![0xff, 0xfb, 0x90, 0x00];
    data.resize(512, 0);
    data.extend(b"TAG");
    data.extend(padded(title, 30));
    data.extend(padded(artist, 30));
    data.extend(padded(album, 30));
    data.extend(b"2001");
    data.extend(padded("", 30));
    data.push(0xff);
    data
}

/// A PNG signature and IHDR chunk header.
pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR".to_vec();
    data.extend(width.to_be_bytes());
    data.extend(height.to_be_bytes());
    data
}
