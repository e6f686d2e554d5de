//! Snapshot writing.
//!
//! A snapshot stores each listed file as a blob and then one tree object
//! naming them all. Paths are resolved against the snapshot root lexically;
//! anything that does not land strictly under the root is refused before any
//! object is written.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::ObjectKind;
use crate::store::{ObjectWrite, Store, with_path};
use crate::tree::{FileMode, TreeEntry, encode_tree};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Counts of what one snapshot write actually put on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Objects newly written.
    pub objects_written: u64,
    /// Objects that were already present.
    pub objects_skipped: u64,
    /// Payload bytes of newly written objects.
    pub bytes_written: u64,
}

impl WriteStats {
    /// Account for one object write.
    pub fn record(&mut self, write: &ObjectWrite) {
        if write.written {
            self.objects_written += 1;
            self.bytes_written += write.length;
        } else {
            self.objects_skipped += 1;
        }
    }
}

/// Result of a snapshot write.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Hash of the tree object.
    pub tree: Hash,
    /// Entries as encoded into the tree, in input order.
    pub entries: Vec<TreeEntry>,
    /// What this write added to the store.
    pub stats: WriteStats,
}

impl Store {
    /// Write each file in `paths` as a blob and one tree describing them.
    ///
    /// `paths` may be relative to `root` or absolute; either way they must
    /// resolve strictly under `root`. An empty list produces the empty tree.
    pub fn write_snapshot<P: AsRef<Path>>(&self, root: &Path, paths: &[P]) -> Result<Snapshot> {
        let root = normalize_path(root)?;

        // Resolve everything up front so no blob is written for a bad list.
        let mut seen = HashSet::with_capacity(paths.len());
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            let (absolute, relative) = resolve_under(&root, path.as_ref())?;
            if !seen.insert(relative.clone()) {
                return Err(Error::invalid_entry(relative, "duplicate path in snapshot"));
            }
            resolved.push((absolute, relative));
        }

        let mut stats = WriteStats::default();
        let mut entries = Vec::with_capacity(resolved.len());

        for (absolute, relative) in resolved {
            let metadata = fs::metadata(&absolute).map_err(|e| with_path(e, &absolute))?;
            let write = self.write_file(ObjectKind::Blob, &absolute)?;
            stats.record(&write);
            debug!(path = %relative, hash = %write.hash, written = write.written, "blob");

            entries.push(TreeEntry::new(file_mode(&metadata), write.hash, relative)?);
        }

        let payload = encode_tree(&entries)?;
        let tree = self.write_bytes(ObjectKind::Tree, &payload)?;
        stats.record(&tree);

        info!(
            tree = %tree.hash,
            entries = entries.len(),
            bytes_written = stats.bytes_written,
            "snapshot written"
        );

        Ok(Snapshot {
            tree: tree.hash,
            entries,
            stats,
        })
    }
}

/// Make `path` absolute and fold `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| with_path(e, path))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve `path` against `root`, returning the absolute path and the
/// `/`-joined path relative to `root`.
fn resolve_under(root: &Path, path: &Path) -> Result<(PathBuf, String)> {
    let absolute = normalize_path(&root.join(path))?;
    let escapes = || Error::path_escapes_root(&absolute, root);

    let relative = absolute.strip_prefix(root).map_err(|_| escapes())?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    Error::invalid_entry(
                        relative.to_string_lossy(),
                        "path is not valid UTF-8",
                    )
                })?;
                segments.push(name);
            }
            _ => return Err(escapes()),
        }
    }
    if segments.is_empty() {
        return Err(escapes());
    }

    let relative = segments.join("/");
    Ok((absolute, relative))
}

/// Get the file mode from metadata.
#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

/// Get the file mode from metadata (non-Unix fallback).
#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> FileMode {
    crate::tree::file_modes::REGULAR
}
