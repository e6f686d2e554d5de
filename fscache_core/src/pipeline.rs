//! Streaming hash and zlib pipeline.
//!
//! Objects are never buffered whole. The write side pushes the header and then
//! the payload, one block at a time, through a single SHA-1 state and a single
//! zlib compressor; the read side pulls decompressed blocks out of the stored
//! file. Memory use is bounded by the block size.

use crate::error::Result;
use crate::hash::{Hash, Hasher};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{self, BufReader, Read, Write};

/// Default chunk size for reading payloads.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Hashes and compresses the same uncompressed byte sequence in one pass.
pub struct HashingCompressor<W: Write> {
    hasher: Hasher,
    encoder: ZlibEncoder<W>,
    bytes_in: u64,
}

impl<W: Write> HashingCompressor<W> {
    /// Create a compressor writing zlib output to `writer`.
    pub fn new(writer: W, level: Compression) -> Self {
        Self {
            hasher: Hasher::new(),
            encoder: ZlibEncoder::new(writer, level),
            bytes_in: 0,
        }
    }

    /// Digest and compress the next chunk.
    pub fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        self.encoder.write_all(chunk)?;
        self.bytes_in += chunk.len() as u64;
        Ok(())
    }

    /// Uncompressed bytes seen so far, header included.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Flush the compressor and return the digest and the inner writer.
    pub fn finish(self) -> Result<(Hash, W)> {
        let writer = self.encoder.finish()?;
        Ok((self.hasher.finalize(), writer))
    }
}

/// Call `f` on each chunk of at most `block_size` bytes until end of stream.
///
/// Returns the number of bytes read.
pub(crate) fn for_each_chunk<R, F>(mut reader: R, block_size: usize, mut f: F) -> Result<u64>
where
    R: Read,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut buf = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        f(&buf[..n])?;
        total += n as u64;
    }

    Ok(total)
}

/// Digest `header` followed by everything in `payload`.
///
/// Returns the hash and the number of payload bytes read.
pub fn hash_stream<R: Read>(header: &[u8], payload: R, block_size: usize) -> Result<(Hash, u64)> {
    let mut hasher = Hasher::new();
    hasher.update(header);
    let read = for_each_chunk(payload, block_size, |chunk| {
        hasher.update(chunk);
        Ok(())
    })?;
    Ok((hasher.finalize(), read))
}

/// Digest and compress `header` followed by everything in `payload` into `out`.
///
/// Returns the hash, the number of payload bytes read, and `out` once the
/// compressor has been flushed into it.
pub fn hash_and_compress<R: Read, W: Write>(
    header: &[u8],
    payload: R,
    block_size: usize,
    level: Compression,
    out: W,
) -> Result<(Hash, u64, W)> {
    let mut pipeline = HashingCompressor::new(out, level);
    pipeline.update(header)?;
    let read = for_each_chunk(payload, block_size, |chunk| pipeline.update(chunk))?;
    let (hash, out) = pipeline.finish()?;
    Ok((hash, read, out))
}

/// Sequential reader over the decompressed bytes of a zlib stream.
///
/// Single pass: once drained it stays at end of data. Reading the same object
/// again means opening the stored file again.
pub struct Decompressor<R: Read> {
    decoder: ZlibDecoder<BufReader<R>>,
    chunk: Vec<u8>,
}

impl<R: Read> Decompressor<R> {
    /// Wrap a compressed stream, reading it `block_size` bytes at a time.
    pub fn new(reader: R, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            decoder: ZlibDecoder::new(BufReader::with_capacity(block_size, reader)),
            chunk: vec![0u8; block_size],
        }
    }

    /// Next decompressed chunk, or `None` at end of data.
    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            match self.decoder.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(&self.chunk[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Whether an I/O error raised by the decoder means the compressed input is bad.
pub fn is_corrupt_stream(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
    )
}
