//! Compression format factory.
//!
//! Works on any `AsyncRead`: the encoder wraps the tar byte stream on its
//! way to the backend, the decoder wraps the backend stream on its way to
//! the tar reader.

use crate::storage::BoxReader;
use crate::{BackupError, Result};
use async_compression::Level;
use std::fmt;
use std::str::FromStr;
use tokio::io::BufReader;

/// Archive extensions recognised when listing a destination. `tar.sz`
/// archives can be listed but not produced or restored.
pub const KNOWN_ARCHIVE_EXTENSIONS: &[&str] = &[
    "tar", "tar.gz", "tar.bz2", "tar.lz4", "tar.xz", "tar.sz", "tar.zstd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionFormat {
    /// Plain tar, no compression
    Tar,
    #[default]
    Gzip,
    Bzip2,
    Lz4,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// File extension of archives written in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Tar => "tar",
            CompressionFormat::Gzip => "tar.gz",
            CompressionFormat::Bzip2 => "tar.bz2",
            CompressionFormat::Lz4 => "tar.lz4",
            CompressionFormat::Xz => "tar.xz",
            CompressionFormat::Zstd => "tar.zstd",
        }
    }

    /// Wrap `reader` so that reading yields compressed bytes.
    ///
    /// `level` of `None` uses the codec's default.
    pub fn encoder(&self, reader: BoxReader, level: Option<i32>) -> BoxReader {
        use async_compression::tokio::bufread::{
            BzEncoder, GzipEncoder, Lz4Encoder, XzEncoder, ZstdEncoder,
        };

        let quality = level.map(Level::Precise).unwrap_or(Level::Default);
        let buf_reader = BufReader::new(reader);
        match self {
            CompressionFormat::Tar => Box::pin(buf_reader),
            CompressionFormat::Gzip => Box::pin(GzipEncoder::with_quality(buf_reader, quality)),
            CompressionFormat::Bzip2 => Box::pin(BzEncoder::with_quality(buf_reader, quality)),
            CompressionFormat::Lz4 => Box::pin(Lz4Encoder::with_quality(buf_reader, quality)),
            CompressionFormat::Xz => Box::pin(XzEncoder::with_quality(buf_reader, quality)),
            CompressionFormat::Zstd => Box::pin(ZstdEncoder::with_quality(buf_reader, quality)),
        }
    }

    /// Wrap `reader` so that reading yields the original tar bytes.
    pub fn decoder(&self, reader: BoxReader) -> BoxReader {
        use async_compression::tokio::bufread::{
            BzDecoder, GzipDecoder, Lz4Decoder, XzDecoder, ZstdDecoder,
        };

        let buf_reader = BufReader::new(reader);
        match self {
            CompressionFormat::Tar => Box::pin(buf_reader),
            CompressionFormat::Gzip => Box::pin(GzipDecoder::new(buf_reader)),
            CompressionFormat::Bzip2 => Box::pin(BzDecoder::new(buf_reader)),
            CompressionFormat::Lz4 => Box::pin(Lz4Decoder::new(buf_reader)),
            CompressionFormat::Xz => Box::pin(XzDecoder::new(buf_reader)),
            CompressionFormat::Zstd => Box::pin(ZstdDecoder::new(buf_reader)),
        }
    }
}

impl FromStr for CompressionFormat {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tar" | "none" => Ok(CompressionFormat::Tar),
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "bzip2" | "bz2" => Ok(CompressionFormat::Bzip2),
            "lz4" => Ok(CompressionFormat::Lz4),
            "xz" => Ok(CompressionFormat::Xz),
            "zstd" | "zst" => Ok(CompressionFormat::Zstd),
            other => Err(BackupError::Config(format!(
                "compression format '{}' not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionFormat::Tar => "tar",
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Bzip2 => "bzip2",
            CompressionFormat::Lz4 => "lz4",
            CompressionFormat::Xz => "xz",
            CompressionFormat::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const ALL: [CompressionFormat; 6] = [
        CompressionFormat::Tar,
        CompressionFormat::Gzip,
        CompressionFormat::Bzip2,
        CompressionFormat::Lz4,
        CompressionFormat::Xz,
        CompressionFormat::Zstd,
    ];

    #[test]
    fn test_parse_aliases() {
        assert_eq!("none".parse::<CompressionFormat>().unwrap(), CompressionFormat::Tar);
        assert_eq!("GZ".parse::<CompressionFormat>().unwrap(), CompressionFormat::Gzip);
        assert_eq!("bz2".parse::<CompressionFormat>().unwrap(), CompressionFormat::Bzip2);
        assert_eq!("zst".parse::<CompressionFormat>().unwrap(), CompressionFormat::Zstd);
        assert!(matches!(
            "snappy".parse::<CompressionFormat>(),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn test_extensions_are_listable() {
        for format in ALL {
            assert!(KNOWN_ARCHIVE_EXTENSIONS.contains(&format.extension()));
            assert_eq!(format.to_string().parse::<CompressionFormat>().unwrap(), format);
        }
    }

    #[tokio::test]
    async fn test_every_format_restores_input() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();

        for format in ALL {
            let source: BoxReader = Box::pin(std::io::Cursor::new(data.clone()));
            let mut compressed = Vec::new();
            format
                .encoder(source, Some(3))
                .read_to_end(&mut compressed)
                .await
                .unwrap();

            let mut restored = Vec::new();
            format
                .decoder(Box::pin(std::io::Cursor::new(compressed)))
                .read_to_end(&mut restored)
                .await
                .unwrap();
            assert_eq!(restored, data, "format {}", format);
        }
    }

    #[tokio::test]
    async fn test_corrupt_input_is_an_error() {
        let garbage: BoxReader = Box::pin(std::io::Cursor::new(b"definitely not gzip".to_vec()));
        let mut out = Vec::new();
        assert!(CompressionFormat::Gzip
            .decoder(garbage)
            .read_to_end(&mut out)
            .await
            .is_err());
    }
}
