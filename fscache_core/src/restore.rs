//! Snapshot restoring.
//!
//! Files are restored one entry at a time, in tree order. Each file is
//! streamed into a temporary file next to its destination and renamed into
//! place once the blob has been fully read and verified. A failing blob stops
//! the restore; files restored before it stay on disk.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::ObjectKind;
use crate::snapshot::normalize_path;
use crate::store::{Store, with_path};
use crate::tree::{FileMode, TreeEntry, decode_tree, validate_relative_path};
use serde::Serialize;
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// A stored mode that could not be applied to a restored file.
#[derive(Debug, Clone, Serialize)]
pub struct ModeFailure {
    /// Relative path of the file.
    pub path: String,
    /// Mode from the tree entry.
    pub mode: FileMode,
    /// Why it failed.
    pub error: String,
}

/// Result of a snapshot restore.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Restore {
    /// Relative paths restored, in tree order.
    pub paths: Vec<String>,
    /// Modes that were not applied. Always empty with strict modes.
    pub mode_failures: Vec<ModeFailure>,
    /// Payload bytes written to the destination.
    pub bytes_restored: u64,
}

impl Store {
    /// Read and decode a tree object.
    pub fn read_tree(&self, hash: &Hash) -> Result<Vec<TreeEntry>> {
        let mut reader = self.read_object(hash)?;
        reader.expect_kind(ObjectKind::Tree)?;
        let payload = reader.read_to_vec()?;
        decode_tree(&payload)
    }

    /// Recreate the files of tree `hash` under `dest`.
    ///
    /// `dest` and any missing parent directories are created. Existing files
    /// at entry paths are replaced.
    pub fn restore_snapshot(&self, hash: &Hash, dest: &Path) -> Result<Restore> {
        self.restore_with(hash, dest, apply_mode)
    }

    /// Restore with `apply` setting the mode of each file once it is in place.
    fn restore_with<F>(&self, hash: &Hash, dest: &Path, mut apply: F) -> Result<Restore>
    where
        F: FnMut(&Path, FileMode) -> io::Result<()>,
    {
        let entries = self.read_tree(hash)?;
        let dest = normalize_path(dest)?;

        let mut restore = Restore::default();
        for entry in &entries {
            let target = target_path(&dest, &entry.path)?;
            let bytes = self.restore_file(&entry.hash, &dest, &target)?;

            if let Err(err) = apply(&target, entry.mode) {
                if self.options().strict_modes {
                    return Err(with_path(err, &target));
                }
                warn!(path = %entry.path, mode = %entry.mode_octal(), error = %err, "could not apply mode");
                restore.mode_failures.push(ModeFailure {
                    path: entry.path.clone(),
                    mode: entry.mode,
                    error: err.to_string(),
                });
            }

            debug!(path = %entry.path, hash = %entry.hash, bytes, "restored");
            restore.bytes_restored += bytes;
            restore.paths.push(entry.path.clone());
        }

        info!(
            tree = %hash,
            dest = %dest.display(),
            files = restore.paths.len(),
            "snapshot restored"
        );
        Ok(restore)
    }

    fn restore_file(&self, hash: &Hash, dest: &Path, target: &Path) -> Result<u64> {
        let mut reader = self.read_object(hash)?;
        reader.expect_kind(ObjectKind::Blob)?;

        let parent = target.parent().unwrap_or(dest);
        fs::create_dir_all(parent).map_err(|e| with_path(e, parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent).map_err(|e| with_path(e, parent))?;
        let mut writer = BufWriter::with_capacity(self.options().block_size, temp_file);
        let bytes = reader.copy_to(&mut writer)?;

        let temp_file = writer.into_inner().map_err(|e| with_path(e.into_error(), target))?;
        temp_file
            .persist(target)
            .map_err(|e| with_path(e.error, target))?;
        Ok(bytes)
    }
}

/// Join a tree path onto `dest`, refusing anything that would leave it.
fn target_path(dest: &Path, relative: &str) -> Result<PathBuf> {
    let target = dest.join(relative);
    let safe = validate_relative_path(relative).is_ok()
        && Path::new(relative)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(Error::path_escapes_root(target, dest));
    }
    Ok(target)
}

/// Set the permission bits of a mode on a file.
#[cfg(unix)]
fn apply_mode(path: &Path, mode: FileMode) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = fs::Permissions::from_mode(mode & crate::tree::file_modes::PERMISSION_MASK);
    fs::set_permissions(path, permissions)
}

/// Set the permission bits of a mode on a file (no-op on non-Unix).
#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: FileMode) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("repo"));
        let root = temp_dir.path().join("work");
        fs::create_dir_all(&root).unwrap();
        (temp_dir, store, root)
    }

    /// Write a tree payload directly, bypassing path validation.
    fn raw_tree(store: &Store, lines: &[String]) -> Hash {
        store
            .write_bytes(ObjectKind::Tree, lines.join("\n").as_bytes())
            .unwrap()
            .hash
    }

    #[test]
    fn test_restore_roundtrip() {
        let (temp_dir, store, root) = setup();
        fs::create_dir_all(root.join("deep/er")).unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();
        fs::write(root.join("deep/er/leaf.bin"), [0u8, 1, 2, 255]).unwrap();

        let snapshot = store
            .write_snapshot(&root, &["top.txt", "deep/er/leaf.bin"])
            .unwrap();

        let dest = temp_dir.path().join("out");
        let restore = store.restore_snapshot(&snapshot.tree, &dest).unwrap();

        assert_eq!(restore.paths, ["top.txt", "deep/er/leaf.bin"]);
        assert_eq!(restore.bytes_restored, 7);
        assert!(restore.mode_failures.is_empty());
        assert_eq!(fs::read(dest.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(dest.join("deep/er/leaf.bin")).unwrap(), [0u8, 1, 2, 255]);
    }

    #[test]
    fn test_restore_replaces_existing_file() {
        let (temp_dir, store, root) = setup();
        fs::write(root.join("f"), b"new").unwrap();
        let snapshot = store.write_snapshot(&root, &["f"]).unwrap();

        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("f"), b"old and longer").unwrap();

        store.restore_snapshot(&snapshot.tree, &dest).unwrap();
        assert_eq!(fs::read(dest.join("f")).unwrap(), b"new");
    }

    #[test]
    fn test_restore_rejects_parent_segments() {
        let (temp_dir, store, _root) = setup();
        let blob = store.write_bytes(ObjectKind::Blob, b"evil").unwrap();
        let tree = raw_tree(&store, &[format!("'100644' '{}' '../evil.txt'", blob.hash)]);

        let dest = temp_dir.path().join("out");
        assert!(matches!(
            store.restore_snapshot(&tree, &dest),
            Err(Error::PathEscapesRoot { .. })
        ));
        assert!(!temp_dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_restore_rejects_absolute_path() {
        let (temp_dir, store, _root) = setup();
        let blob = store.write_bytes(ObjectKind::Blob, b"evil").unwrap();
        let outside = temp_dir.path().join("abs.txt");
        let tree = raw_tree(
            &store,
            &[format!("'100644' '{}' '{}'", blob.hash, outside.display())],
        );

        assert!(matches!(
            store.restore_snapshot(&tree, &temp_dir.path().join("out")),
            Err(Error::PathEscapesRoot { .. })
        ));
        assert!(!outside.exists());
    }

    #[test]
    fn test_restore_missing_blob_keeps_earlier_files() {
        let (temp_dir, store, _root) = setup();
        let present = store.write_bytes(ObjectKind::Blob, b"here").unwrap();
        let missing = Hash::digest(b"never stored");
        let tree = raw_tree(
            &store,
            &[
                format!("'100644' '{}' 'first.txt'", present.hash),
                format!("'100644' '{}' 'second.txt'", missing),
            ],
        );

        let dest = temp_dir.path().join("out");
        match store.restore_snapshot(&tree, &dest) {
            Err(Error::ObjectNotFound { hash }) => assert_eq!(hash, missing.to_hex()),
            other => panic!("expected ObjectNotFound, got {:?}", other),
        }
        assert_eq!(fs::read(dest.join("first.txt")).unwrap(), b"here");
        assert!(!dest.join("second.txt").exists());
    }

    #[test]
    fn test_restore_corrupt_blob_leaves_no_file() {
        let (temp_dir, store, root) = setup();
        fs::write(root.join("f"), b"pristine").unwrap();
        let snapshot = store.write_snapshot(&root, &["f"]).unwrap();

        fs::write(store.object_path(&snapshot.entries[0].hash), b"garbage").unwrap();

        let dest = temp_dir.path().join("out");
        assert!(matches!(
            store.restore_snapshot(&snapshot.tree, &dest),
            Err(Error::CorruptObjectData { .. })
        ));
        assert!(!dest.join("f").exists());
    }

    #[test]
    fn test_restore_non_tree_is_wrong_kind() {
        let (temp_dir, store, _root) = setup();
        let blob = store.write_bytes(ObjectKind::Blob, b"not a tree").unwrap();

        assert!(matches!(
            store.restore_snapshot(&blob.hash, &temp_dir.path().join("out")),
            Err(Error::WrongObjectKind { .. })
        ));
    }

    #[test]
    fn test_restore_entry_pointing_at_tree_is_wrong_kind() {
        let (temp_dir, store, _root) = setup();
        let inner = store.write_bytes(ObjectKind::Tree, b"").unwrap();
        let tree = raw_tree(&store, &[format!("'100644' '{}' 'f'", inner.hash)]);

        assert!(matches!(
            store.restore_snapshot(&tree, &temp_dir.path().join("out")),
            Err(Error::WrongObjectKind { .. })
        ));
    }

    #[test]
    fn test_restore_empty_tree() {
        let (temp_dir, store, root) = setup();
        let snapshot = store.write_snapshot::<&str>(&root, &[]).unwrap();

        let restore = store
            .restore_snapshot(&snapshot.tree, &temp_dir.path().join("out"))
            .unwrap();
        assert!(restore.paths.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, store, root) = setup();
        let script = root.join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(root.join("plain"), b"x").unwrap();

        let snapshot = store.write_snapshot(&root, &["run.sh", "plain"]).unwrap();
        let dest = temp_dir.path().join("out");
        store.restore_snapshot(&snapshot.tree, &dest).unwrap();

        let mode = |p: &str| fs::metadata(dest.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("run.sh"), 0o755);
        assert_eq!(mode("plain"), fs::metadata(root.join("plain")).unwrap().permissions().mode() & 0o777);
    }

    #[test]
    fn test_read_tree() {
        let (_temp_dir, store, root) = setup();
        fs::write(root.join("a"), b"1").unwrap();
        let snapshot = store.write_snapshot(&root, &["a"]).unwrap();

        assert_eq!(store.read_tree(&snapshot.tree).unwrap(), snapshot.entries);
    }

    #[test]
    fn test_strict_modes_option() {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions::default().with_strict_modes(true);
        let store = Store::with_options(temp_dir.path().join("repo"), options);
        assert!(store.options().strict_modes);

        let blob = store.write_bytes(ObjectKind::Blob, b"ok").unwrap();
        let tree = raw_tree(&store, &[format!("'100600' '{}' 'f'", blob.hash)]);
        let restore = store
            .restore_snapshot(&tree, &temp_dir.path().join("out"))
            .unwrap();
        assert_eq!(restore.paths, ["f"]);
    }

    fn deny_mode(_path: &Path, _mode: FileMode) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "mode denied"))
    }

    #[test]
    fn test_mode_failure_is_reported() {
        let (temp_dir, store, _root) = setup();
        let blob = store.write_bytes(ObjectKind::Blob, b"body").unwrap();
        let tree = raw_tree(
            &store,
            &[
                format!("'100755' '{}' 'bin/run'", blob.hash),
                format!("'100644' '{}' 'notes'", blob.hash),
            ],
        );

        let dest = temp_dir.path().join("out");
        let restore = store.restore_with(&tree, &dest, deny_mode).unwrap();

        assert_eq!(restore.paths, ["bin/run", "notes"]);
        assert_eq!(restore.bytes_restored, 8);
        assert_eq!(fs::read(dest.join("bin/run")).unwrap(), b"body");
        assert_eq!(fs::read(dest.join("notes")).unwrap(), b"body");

        assert_eq!(restore.mode_failures.len(), 2);
        assert_eq!(restore.mode_failures[0].path, "bin/run");
        assert_eq!(restore.mode_failures[0].mode, 0o100755);
        assert!(restore.mode_failures[0].error.contains("mode denied"));
        assert_eq!(restore.mode_failures[1].path, "notes");
        assert_eq!(restore.mode_failures[1].mode, 0o100644);
    }

    #[test]
    fn test_strict_modes_abort_on_mode_failure() {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions::default().with_strict_modes(true);
        let store = Store::with_options(temp_dir.path().join("repo"), options);

        let blob = store.write_bytes(ObjectKind::Blob, b"body").unwrap();
        let tree = raw_tree(
            &store,
            &[
                format!("'100755' '{}' 'first'", blob.hash),
                format!("'100644' '{}' 'second'", blob.hash),
            ],
        );

        let dest = temp_dir.path().join("out");
        let mut calls = 0;
        let result = store.restore_with(&tree, &dest, |path, mode| {
            calls += 1;
            deny_mode(path, mode)
        });

        match result {
            Err(Error::Io { source }) => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
                assert!(source.to_string().contains("first"));
            }
            other => panic!("expected Io error, got {:?}", other),
        }
        assert_eq!(calls, 1);
        // The file whose mode failed was already in place.
        assert_eq!(fs::read(dest.join("first")).unwrap(), b"body");
        assert!(!dest.join("second").exists());
    }
}
