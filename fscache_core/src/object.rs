//! Object framing.
//!
//! Every stored object is the zlib stream of an ASCII header followed by the
//! payload:
//!
//! ```text
//! <kind> SP <length> NUL <payload: length bytes>
//! ```
//!
//! `kind` is one of `blob`, `tree` or `commit`, and `length` is the payload
//! length in decimal. The object hash is the SHA-1 of these exact bytes, so the
//! header is always hashed and compressed together with the payload.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::str::FromStr;

/// Longest header accepted before the NUL terminator.
///
/// `commit 18446744073709551615` is 27 bytes, so anything past this is not a
/// header produced by this format.
pub const MAX_HEADER_LEN: usize = 64;

/// Object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A blob (file content).
    Blob,
    /// A tree (flat snapshot listing).
    Tree,
    /// A commit. Reserved: shares the header contract, payload is opaque.
    Commit,
}

impl ObjectKind {
    /// All recognized kinds, in header-tag order.
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Blob, ObjectKind::Tree, ObjectKind::Commit];

    /// Get the header tag of this object kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    /// Parse a header tag.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            "commit" => Ok(ObjectKind::Commit),
            _ => Err(Error::invalid_object_kind(tag)),
        }
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectKind::parse(s)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Object kind.
    pub kind: ObjectKind,
    /// Length of the payload in bytes (header excluded).
    pub length: u64,
}

impl ObjectHeader {
    /// Create a new object header.
    pub fn new(kind: ObjectKind, length: u64) -> Self {
        Self { kind, length }
    }

    /// Encode the header to its exact on-disk bytes, NUL included.
    pub fn encode(&self) -> Vec<u8> {
        build_header(self.kind, self.length)
    }

    /// Decode a header from its bytes, with or without the trailing NUL.
    ///
    /// Only the canonical form `build_header` produces is accepted: one
    /// space, and no leading zero unless the length is exactly `0`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let buf = buf.strip_suffix(b"\0").unwrap_or(buf);

        let text = std::str::from_utf8(buf)
            .map_err(|_| Error::malformed_header("header is not ASCII"))?;

        let (tag, length) = text
            .split_once(' ')
            .ok_or_else(|| Error::malformed_header(format!("no length field in {:?}", text)))?;

        let kind = ObjectKind::parse(tag)
            .map_err(|_| Error::malformed_header(format!("unrecognized object kind {:?}", tag)))?;

        if length.is_empty() || !length.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::malformed_header(format!(
                "invalid length {:?}",
                length
            )));
        }
        if length.len() > 1 && length.starts_with('0') {
            return Err(Error::malformed_header(format!(
                "length {:?} has a leading zero",
                length
            )));
        }
        let length = length
            .parse::<u64>()
            .map_err(|e| Error::malformed_header(format!("invalid length {:?}: {}", length, e)))?;

        Ok(Self { kind, length })
    }
}

/// Build the exact header bytes `"<kind> <length>\0"`.
pub fn build_header(kind: ObjectKind, length: u64) -> Vec<u8> {
    format!("{} {}\0", kind.as_str(), length).into_bytes()
}

/// Build a header from an untyped kind tag.
///
/// Fails with `InvalidObjectKind` before anything else happens if the tag is
/// not a recognized kind.
pub fn build_header_for(tag: &str, length: u64) -> Result<Vec<u8>> {
    let kind = ObjectKind::parse(tag)?;
    Ok(build_header(kind, length))
}

/// Incremental header parser.
///
/// Bytes are fed in arbitrary chunks; the NUL terminator may land in any of
/// them. Partial header bytes are buffered across calls.
#[derive(Debug, Default)]
pub struct HeaderParser {
    buf: Vec<u8>,
}

impl HeaderParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    ///
    /// Returns `Some((header, consumed))` once the NUL is seen, where
    /// `consumed` is how many bytes of `chunk` belong to the header. Bytes of
    /// `chunk` past that offset are payload.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<(ObjectHeader, usize)>> {
        match chunk.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.buf.extend_from_slice(&chunk[..nul]);
                self.check_len()?;
                let header = ObjectHeader::decode(&self.buf)?;
                Ok(Some((header, nul + 1)))
            }
            None => {
                self.buf.extend_from_slice(chunk);
                self.check_len()?;
                Ok(None)
            }
        }
    }

    /// Number of header bytes buffered so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn check_len(&self) -> Result<()> {
        if self.buf.len() > MAX_HEADER_LEN {
            return Err(Error::malformed_header(format!(
                "no NUL terminator within {} bytes",
                MAX_HEADER_LEN
            )));
        }
        Ok(())
    }
}

/// Parse a header from the front of a stream read in `block_size` chunks.
///
/// Returns the header and whatever payload bytes were read past the NUL.
pub fn parse_header<R: Read>(mut reader: R, block_size: usize) -> Result<(ObjectHeader, Vec<u8>)> {
    let mut parser = HeaderParser::new();
    let mut chunk = vec![0u8; block_size.max(1)];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(Error::malformed_header(format!(
                "stream ended after {} bytes without a NUL terminator",
                parser.buffered()
            )));
        }

        if let Some((header, consumed)) = parser.feed(&chunk[..n])? {
            return Ok((header, chunk[consumed..n].to_vec()));
        }
    }
}
