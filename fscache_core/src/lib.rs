//! # fscache core
//!
//! A content-addressed loose object store for filesystem snapshots.
//!
//! Objects are framed as `"<kind> <length>\0" ++ payload`, identified by the
//! SHA-1 of those bytes, zlib-compressed and stored under a two-level shard at
//! `objects/<hash[0:2]>/<hash[2:]>`. A snapshot is one blob per file plus a flat
//! tree object listing `(mode, hash, relative path)` for each of them.
//!
//! ## Features
//!
//! - Streaming writes: hashing and compression in one bounded-memory pass
//! - Lazy, verified reads through [`ObjectReader`]
//! - Idempotent writes, safe across concurrent writers of the same object
//! - Snapshot write and restore with root containment checks
//!
//! ## Example
//!
//! ```no_run
//! use fscache_core::Store;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("./.fscache");
//!
//! // Snapshot two files under ./project
//! let snapshot = store.write_snapshot(Path::new("./project"), &["README.md", "src/main.rs"])?;
//! println!("tree {} ({} bytes new)", snapshot.tree, snapshot.stats.bytes_written);
//!
//! // Materialize it somewhere else
//! let restore = store.restore_snapshot(&snapshot.tree, Path::new("./restored"))?;
//! println!("restored {} files", restore.paths.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod hash;
mod object;
mod pipeline;
mod restore;
mod snapshot;
mod store;
mod tree;
mod walk;

pub use error::{Error, Result};
pub use hash::{HASH_SIZE, HEX_LEN, Hash, Hasher};
pub use object::{
    HeaderParser, MAX_HEADER_LEN, ObjectHeader, ObjectKind, build_header, build_header_for,
    parse_header,
};
pub use pipeline::{
    DEFAULT_BLOCK_SIZE, Decompressor, HashingCompressor, hash_and_compress, hash_stream,
};
pub use restore::{ModeFailure, Restore};
pub use snapshot::{Snapshot, WriteStats, normalize_path};
pub use store::{OBJECTS_DIR, ObjectReader, ObjectWrite, Store, StoreOptions};
pub use tree::{
    FileMode, TreeEntry, decode_tree, encode_tree, file_modes, validate_relative_path,
};
pub use walk::collect_files;
