// src/compression/mod.rs
//! Compression codecs for package artifacts
//!
//! Artifacts are tarballs optionally wrapped in gzip or zstd. Gzip output is
//! produced by [`ParallelGzipWriter`], which compresses fixed-size blocks on
//! a thread pool and writes them as concatenated gzip members; any
//! multi-member decoder reads the result back.

use flate2::Compression;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} codec: {source}")]
    CodecCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to compress {format} data: {source}")]
    Compression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

impl From<CompressionError> for crate::error::Error {
    fn from(e: CompressionError) -> Self {
        crate::error::Error::IoError(e.to_string())
    }
}

/// Supported artifact compression types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Plain tar
    #[default]
    None,
    /// Gzip (.gz)
    Gzip,
    /// Zstandard (.zst)
    Zstd,
}

impl CompressionType {
    /// Detect compression format from file extension
    pub fn from_extension(path: &str) -> Self {
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Self::Gzip
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Detect compression format from magic bytes
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// File extension appended after `.tar`
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for CompressionType {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(CompressionError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Uncompressed bytes per gzip member
pub const GZIP_BLOCK_SIZE: usize = 1 << 20;

/// Gzip writer compressing blocks in parallel
///
/// Input is buffered until `concurrency` blocks are ready; the batch is then
/// compressed on the pool and written out in order.
pub struct ParallelGzipWriter<W: Write> {
    inner: W,
    pool: rayon::ThreadPool,
    concurrency: usize,
    level: Compression,
    buffer: Vec<u8>,
}

impl<W: Write> ParallelGzipWriter<W> {
    pub fn new(inner: W, concurrency: usize) -> Result<Self, CompressionError> {
        let concurrency = concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .build()
            .map_err(|e| CompressionError::CodecCreation {
                format: "gzip",
                source: io::Error::other(e),
            })?;
        Ok(Self {
            inner,
            pool,
            concurrency,
            level: Compression::default(),
            buffer: Vec::with_capacity(GZIP_BLOCK_SIZE * concurrency),
        })
    }

    fn compress_block(block: &[u8], level: Compression) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(block.len() / 2), level);
        encoder.write_all(block)?;
        encoder.finish()
    }

    /// Compress and write everything buffered, including a partial last block
    fn flush_blocks(&mut self, include_partial: bool) -> io::Result<()> {
        let full = self.buffer.len() / GZIP_BLOCK_SIZE * GZIP_BLOCK_SIZE;
        let end = if include_partial { self.buffer.len() } else { full };
        if end == 0 {
            return Ok(());
        }

        let level = self.level;
        let data = &self.buffer[..end];
        let members: Vec<Vec<u8>> = self.pool.install(|| {
            data.par_chunks(GZIP_BLOCK_SIZE)
                .map(|block| Self::compress_block(block, level))
                .collect::<io::Result<Vec<_>>>()
        })?;

        for member in members {
            self.inner.write_all(&member)?;
        }
        self.buffer.drain(..end);
        Ok(())
    }

    /// Flush remaining data and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_blocks(true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ParallelGzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= GZIP_BLOCK_SIZE * self.concurrency {
            self.flush_blocks(false)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compress everything from `reader` into `writer`
pub fn compress<R: Read, W: Write>(
    reader: &mut R,
    writer: W,
    format: CompressionType,
    concurrency: usize,
) -> Result<W, CompressionError> {
    let wrap = |format: &'static str| move |source: io::Error| CompressionError::Compression { format, source };

    match format {
        CompressionType::None => {
            let mut writer = writer;
            io::copy(reader, &mut writer).map_err(wrap("none"))?;
            Ok(writer)
        }
        CompressionType::Gzip => {
            let mut encoder = ParallelGzipWriter::new(writer, concurrency)?;
            io::copy(reader, &mut encoder).map_err(wrap("gzip"))?;
            encoder.finish().map_err(wrap("gzip"))
        }
        CompressionType::Zstd => {
            let mut encoder =
                zstd::Encoder::new(writer, 0).map_err(|source| CompressionError::CodecCreation {
                    format: "zstd",
                    source,
                })?;
            if concurrency > 1 {
                encoder
                    .multithread(concurrency as u32)
                    .map_err(|source| CompressionError::CodecCreation {
                        format: "zstd",
                        source,
                    })?;
            }
            io::copy(reader, &mut encoder).map_err(wrap("zstd"))?;
            encoder.finish().map_err(wrap("zstd"))
        }
    }
}

/// Create a decompressing reader for the given format
///
/// Gzip input may hold several members, as written by [`ParallelGzipWriter`].
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionType,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionType::None => Ok(Box::new(reader)),
        CompressionType::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        CompressionType::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::CodecCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn roundtrip(format: CompressionType, data: &[u8], concurrency: usize) -> Vec<u8> {
        let compressed = compress(&mut &data[..], Vec::new(), format, concurrency).unwrap();
        assert_eq!(CompressionType::from_magic_bytes(&compressed), format);
        let mut out = Vec::new();
        create_decoder(&compressed[..], format)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CompressionType::from_extension("a.package.tar.gz"), CompressionType::Gzip);
        assert_eq!(CompressionType::from_extension("a.package.tar.zst"), CompressionType::Zstd);
        assert_eq!(CompressionType::from_extension("a.package.tar"), CompressionType::None);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("gzip".parse::<CompressionType>().unwrap(), CompressionType::Gzip);
        assert_eq!("".parse::<CompressionType>().unwrap(), CompressionType::None);
        assert!("xz".parse::<CompressionType>().is_err());
        assert_eq!(CompressionType::Zstd.to_string(), "zstd");
    }

    #[test]
    fn test_parallel_gzip_multiple_members() {
        // Three and a half blocks over four workers
        let data = sample(GZIP_BLOCK_SIZE * 3 + GZIP_BLOCK_SIZE / 2);
        assert_eq!(roundtrip(CompressionType::Gzip, &data, 4), data);
    }

    #[test]
    fn test_zstd_multithreaded() {
        let data = sample(200_000);
        assert_eq!(roundtrip(CompressionType::Zstd, &data, 2), data);
    }

    #[test]
    fn test_none_passthrough() {
        let data = b"plain tar bytes".to_vec();
        let compressed = compress(&mut &data[..], Vec::new(), CompressionType::None, 1).unwrap();
        assert_eq!(compressed, data);
    }
}
