//! Archive format: compression codecs and the embedded chain record.

pub mod compression;
pub mod meta;

pub use compression::{CompressionFormat, KNOWN_ARCHIVE_EXTENSIONS};
pub use meta::{MetaFile, META_FILE_NAME};
