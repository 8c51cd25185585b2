//! Error handling.

use std::fmt::Debug;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetadataError {
    /// A read would cross the end bound of a [`ByteReader`](crate::byte_reader::ByteReader).
    #[error("Read past end of buffer: {size} bytes at {position}, end {end}")]
    OutOfRange {
        /// Cursor position of the attempted read.
        position: usize,
        /// Number of bytes requested.
        size: usize,
        /// Effective end bound of the read.
        end: usize,
    },

    /// A seek target lies outside of the buffer.
    #[error("Seek outside of buffer: {position} not in 0..={length}")]
    SeekOutOfRange {
        /// The absolute position that was requested.
        position: i64,
        /// The length of the buffer.
        length: usize,
    },

    /// The magic bytes of a file did not match the format selected for it.
    #[error("Invalid {format} signature: {found:?}")]
    InvalidSignature {
        /// Format whose signature check failed.
        format: &'static str,
        /// The bytes that were found, as Latin-1 text.
        found: String,
    },

    /// The data is structurally broken.
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// No parser accepts the URL held by the variant.
    #[error("unsupported format")]
    UnsupportedFormat(String),

    /// A property name that no provider knows about.
    #[error("Unknown property name: {0}")]
    UnknownProperty(String),

    /// End of file error.
    #[error("End of File: expected to read {0} bytes, got {1}")]
    EndOfFile(u64, u64),

    /// General error.
    #[error("General error: {0}")]
    General(String),

    /// IO Error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Error while fetching data using object store.
    #[cfg(feature = "object_store")]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// Reqwest error
    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
}

impl MetadataError {
    /// Returns `true` for bounds violations raised by the byte reader.
    ///
    /// Streaming parsers treat these as "not enough data yet" or as a corrupt sub-structure,
    /// depending on where they happen.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            MetadataError::OutOfRange { .. } | MetadataError::SeekOutOfRange { .. }
        )
    }
}

/// Crate-specific result type.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// The error half of a metadata property.
///
/// Providers never fail a whole batch; instead each property that could not be obtained
/// carries one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PropertyError(pub String);

impl PropertyError {
    /// Create a new error from anything printable.
    pub fn new(message: impl ToString) -> Self {
        Self(message.to_string())
    }
}

impl From<&MetadataError> for PropertyError {
    fn from(err: &MetadataError) -> Self {
        Self(err.to_string())
    }
}

impl From<MetadataError> for PropertyError {
    fn from(err: MetadataError) -> Self {
        Self(err.to_string())
    }
}
