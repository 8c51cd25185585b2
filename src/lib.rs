#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod byte_reader;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod parsers;
pub mod provider;
pub mod reader;

pub use byte_reader::ByteReader;
pub use dispatcher::MetadataDispatcher;
pub use model::MetadataModel;
pub use parsers::{ParserMetadata, ParserRegistry};
