//! Store management and object I/O.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/objects/<hash[0:2]>/<hash[2:40]>    zlib("<kind> <length>\0" ++ payload)
//! ```
//!
//! The store holds no state besides the filesystem. Any number of `Store`
//! values, in any number of threads or processes, may share one root.

use crate::error::{Error, Result};
use crate::hash::{Hash, Hasher};
use crate::object::{ObjectKind, build_header, parse_header};
use crate::pipeline::{self, DEFAULT_BLOCK_SIZE, Decompressor, hash_and_compress, hash_stream};
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the objects directory under the store root.
pub const OBJECTS_DIR: &str = "objects";

/// Tunables for a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Chunk size for streaming reads, hashing and compression.
    pub block_size: usize,
    /// zlib level, 0 (store) to 9 (best).
    pub compression_level: u32,
    /// Abort a restore when a file mode cannot be applied.
    pub strict_modes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression_level: 6,
            strict_modes: false,
        }
    }
}

impl StoreOptions {
    /// Set the streaming block size. Zero is treated as one.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Set the zlib compression level. Values above 9 are clamped.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Make mode application failures fatal during restore.
    pub fn with_strict_modes(mut self, strict: bool) -> Self {
        self.strict_modes = strict;
        self
    }

    pub(crate) fn compression(&self) -> Compression {
        Compression::new(self.compression_level.min(9))
    }
}

/// Outcome of a single object write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectWrite {
    /// Hash of the object.
    pub hash: Hash,
    /// Payload length in bytes.
    pub length: u64,
    /// False when the object was already present and nothing was written.
    pub written: bool,
}

/// A content-addressed loose object store.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    options: StoreOptions,
}

impl Store {
    /// Open a store rooted at `root` with default options.
    ///
    /// Nothing is created until the first write.
    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Self::with_options(root, StoreOptions::default())
    }

    /// Open a store rooted at `root` with the given options.
    pub fn with_options<P: AsRef<Path>>(root: P, options: StoreOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options: StoreOptions {
                block_size: options.block_size.max(1),
                ..options
            },
        }
    }

    /// Get the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the options of this handle.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Get the objects directory.
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    /// Get the path to an object file given its hash.
    ///
    /// Returns: `objects/{prefix}/{suffix}`
    pub fn object_path(&self, hash: &Hash) -> PathBuf {
        self.objects_dir().join(hash.prefix()).join(hash.suffix())
    }

    /// Check whether an object is present. Only the shard path is consulted.
    pub fn object_exists(&self, hash: &Hash) -> bool {
        self.object_path(hash).is_file()
    }

    /// Compute the hash an object would have, without writing it.
    ///
    /// Reads from the current position of `reader` to its end.
    pub fn hash_object<R: Read + Seek>(&self, kind: ObjectKind, mut reader: R) -> Result<ObjectWrite> {
        let (start, length) = measure(&mut reader)?;
        reader.seek(SeekFrom::Start(start))?;
        let header = build_header(kind, length);
        let (hash, _) = hash_stream(&header, reader.take(length), self.options.block_size)?;
        Ok(ObjectWrite {
            hash,
            length,
            written: false,
        })
    }

    /// Compute the hash a file would have as an object, without writing it.
    pub fn hash_file(&self, kind: ObjectKind, path: &Path) -> Result<ObjectWrite> {
        let (file, length) = open_measured(path)?;
        let header = build_header(kind, length);
        let (hash, _) = hash_stream(&header, file.take(length), self.options.block_size)?;
        Ok(ObjectWrite {
            hash,
            length,
            written: false,
        })
    }

    /// Write an object from a seekable stream.
    ///
    /// The payload is everything from the current position of `reader` to its
    /// end. If the object already exists nothing is written.
    pub fn write_object<R: Read + Seek>(&self, kind: ObjectKind, mut reader: R) -> Result<ObjectWrite> {
        let (start, length) = measure(&mut reader)?;
        self.write_measured(kind, reader, start, length)
    }

    /// Write a file's content as an object, reading it straight from disk.
    pub fn write_file(&self, kind: ObjectKind, path: &Path) -> Result<ObjectWrite> {
        let (file, length) = open_measured(path)?;
        self.write_measured(kind, file, 0, length)
    }

    /// Write an in-memory payload as an object.
    pub fn write_bytes(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectWrite> {
        self.write_measured(kind, io::Cursor::new(data), 0, data.len() as u64)
    }

    /// Hash first, then compress into a temp file in the shard and rename.
    fn write_measured<R: Read + Seek>(
        &self,
        kind: ObjectKind,
        mut reader: R,
        start: u64,
        length: u64,
    ) -> Result<ObjectWrite> {
        let block_size = self.options.block_size;
        let header = build_header(kind, length);

        reader.seek(SeekFrom::Start(start))?;
        let (hash, read) = hash_stream(&header, (&mut reader).take(length), block_size)?;
        if read != length {
            return Err(Error::unmeasurable_source(format!(
                "source yielded {} bytes, expected {}",
                read, length
            )));
        }

        let obj_path = self.object_path(&hash);
        if obj_path.is_file() {
            debug!(%hash, kind = kind.as_str(), length, "object already present");
            return Ok(ObjectWrite {
                hash,
                length,
                written: false,
            });
        }

        // Create shard directory if needed
        let shard_dir = self.objects_dir().join(hash.prefix());
        fs::create_dir_all(&shard_dir)?;

        let temp_file = tempfile::NamedTempFile::new_in(&shard_dir)?;
        reader.seek(SeekFrom::Start(start))?;
        let (second, _, writer) = hash_and_compress(
            &header,
            (&mut reader).take(length),
            block_size,
            self.options.compression(),
            BufWriter::with_capacity(block_size, temp_file),
        )?;

        // Dropping the temp file removes it.
        if second != hash {
            return Err(Error::Io {
                source: io::Error::other(format!(
                    "payload source changed while writing object {}",
                    hash
                )),
            });
        }

        let temp_file = writer.into_inner().map_err(|e| e.into_error())?;
        temp_file.as_file().sync_all()?;

        let written = match temp_file.persist(&obj_path) {
            Ok(_) => true,
            // Another writer won the rename; content is identical by hash.
            Err(err) if obj_path.is_file() => {
                warn!(%hash, error = %err.error, "object appeared during write");
                false
            }
            Err(err) => return Err(err.into()),
        };

        debug!(%hash, kind = kind.as_str(), length, written, "object stored");
        Ok(ObjectWrite {
            hash,
            length,
            written,
        })
    }

    /// Open an object for reading.
    ///
    /// The header is parsed eagerly; the payload is decompressed lazily as
    /// the returned reader is consumed. Dropping the reader closes the file.
    pub fn read_object(&self, hash: &Hash) -> Result<ObjectReader> {
        let obj_path = self.object_path(hash);
        let file = match File::open(&obj_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::object_not_found(hash.to_hex()));
            }
            Err(err) => return Err(err.into()),
        };

        let block_size = self.options.block_size;
        let mut decoder = Decompressor::new(file, block_size);
        let (header, leftover) =
            parse_header(&mut decoder, block_size).map_err(|e| corrupt_or(e, hash))?;

        // Decoded headers are canonical, so this re-encodes the bytes read.
        let mut hasher = Hasher::new();
        hasher.update(&header.encode());

        Ok(ObjectReader {
            hash: *hash,
            kind: header.kind,
            length: header.length,
            remaining: header.length,
            pending: leftover,
            pending_pos: 0,
            decoder,
            hasher: Some(hasher),
            block_size,
        })
    }
}

/// Determine the remaining length of a stream and leave it where it was.
fn measure<R: Seek>(reader: &mut R) -> Result<(u64, u64)> {
    let unmeasurable = |e: io::Error| Error::unmeasurable_source(format!("cannot seek: {}", e));

    let start = reader.stream_position().map_err(unmeasurable)?;
    let end = reader.seek(SeekFrom::End(0)).map_err(unmeasurable)?;
    reader.seek(SeekFrom::Start(start)).map_err(unmeasurable)?;

    Ok((start, end.saturating_sub(start)))
}

/// Open a regular file and take its length from metadata.
fn open_measured(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path).map_err(|e| with_path(e, path))?;
    let metadata = file.metadata().map_err(|e| with_path(e, path))?;
    if !metadata.is_file() {
        return Err(Error::unmeasurable_source(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok((file, metadata.len()))
}

/// Attach a path to an I/O error message.
pub(crate) fn with_path(err: io::Error, path: &Path) -> Error {
    Error::Io {
        source: io::Error::new(err.kind(), format!("{}: {}", path.display(), err)),
    }
}

/// Turn decoder failures into `CorruptObjectData` for `hash`.
fn corrupt_or(err: Error, hash: &Hash) -> Error {
    match err {
        Error::Io { source } if pipeline::is_corrupt_stream(&source) => {
            Error::corrupt_object_data(hash.to_hex(), source.to_string())
        }
        other => other,
    }
}

/// A stored object opened for reading.
///
/// The payload is a single-pass stream. It is checked against the header
/// length and the object hash as it is consumed: a short stream, trailing
/// bytes, or a digest mismatch all surface as `CorruptObjectData`.
pub struct ObjectReader {
    hash: Hash,
    kind: ObjectKind,
    length: u64,
    remaining: u64,
    pending: Vec<u8>,
    pending_pos: usize,
    decoder: Decompressor<File>,
    hasher: Option<Hasher>,
    block_size: usize,
}

impl ObjectReader {
    /// Hash the object was opened by.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Object kind from the header.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Payload length from the header.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Fail with `WrongObjectKind` unless this object is of `expected` kind.
    pub fn expect_kind(&self, expected: ObjectKind) -> Result<()> {
        if self.kind != expected {
            return Err(Error::wrong_object_kind(
                self.hash.to_hex(),
                expected.as_str(),
                self.kind.as_str(),
            ));
        }
        Ok(())
    }

    /// Stream the rest of the payload into `writer`.
    pub fn copy_to<W: Write>(&mut self, mut writer: W) -> Result<u64> {
        let mut buf = vec![0u8; self.block_size];
        let mut total = 0u64;
        loop {
            let n = self.read_payload(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        writer.flush()?;
        Ok(total)
    }

    /// Read the rest of the payload into memory.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let capacity = self.remaining.min(1 << 20) as usize;
        let mut out = Vec::with_capacity(capacity);
        self.copy_to(&mut out)?;
        Ok(out)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.finish()?;
            return Ok(0);
        }

        let limit = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));

        let n = if self.pending_pos < self.pending.len() {
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(limit);
            buf[..n].copy_from_slice(&available[..n]);
            self.pending_pos += n;
            n
        } else {
            self.decoder
                .read(&mut buf[..limit])
                .map_err(|e| corrupt_or(e.into(), &self.hash))?
        };

        if n == 0 {
            return Err(Error::corrupt_object_data(
                self.hash.to_hex(),
                format!(
                    "payload truncated: {} of {} bytes missing",
                    self.remaining, self.length
                ),
            ));
        }

        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    /// Runs once, when the declared length has been consumed.
    fn finish(&mut self) -> Result<()> {
        let Some(hasher) = self.hasher.take() else {
            return Ok(());
        };

        let mut probe = [0u8; 1];
        let trailing = self.pending_pos < self.pending.len()
            || self
                .decoder
                .read(&mut probe)
                .map_err(|e| corrupt_or(e.into(), &self.hash))?
                > 0;
        if trailing {
            return Err(Error::corrupt_object_data(
                self.hash.to_hex(),
                format!("trailing bytes after {}-byte payload", self.length),
            ));
        }

        let computed = hasher.finalize();
        if computed != self.hash {
            return Err(Error::corrupt_object_data(
                self.hash.to_hex(),
                format!("content hashes to {}", computed),
            ));
        }
        Ok(())
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_payload(buf).map_err(|err| match err {
            Error::Io { source } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("hash", &self.hash)
            .field("kind", &self.kind)
            .field("length", &self.length)
            .field("remaining", &self.remaining)
            .finish()
    }
}
