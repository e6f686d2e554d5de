//! Tree encoding.
//!
//! A tree is a flat snapshot listing: one line per file, each line three
//! single-quoted fields separated by a space,
//!
//! ```text
//! '<mode>' '<hash>' '<relative_path>'
//! ```
//!
//! joined by `\n`. `mode` is the file's `st_mode` in octal, `hash` is the blob
//! holding its content and `relative_path` uses `/` separators. Entries keep
//! insertion order.

use crate::error::{Error, Result};
use crate::hash::{HEX_LEN, Hash};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// File mode (POSIX `st_mode`, type and permission bits).
pub type FileMode = u32;

/// Common file modes.
pub mod file_modes {
    use super::FileMode;

    /// Regular file (non-executable).
    pub const REGULAR: FileMode = 0o100644;

    /// Executable file.
    pub const EXECUTABLE: FileMode = 0o100755;

    /// Permission bits of a mode, the part applied on restore.
    pub const PERMISSION_MASK: FileMode = 0o7777;
}

/// One file of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    /// POSIX file mode.
    pub mode: FileMode,
    /// Hash of the blob holding the file content.
    pub hash: Hash,
    /// Path relative to the snapshot root, `/`-separated.
    pub path: String,
}

impl TreeEntry {
    /// Create a new tree entry, validating the path.
    pub fn new(mode: FileMode, hash: Hash, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_relative_path(&path).map_err(|reason| Error::invalid_entry(path.as_str(), reason))?;
        Ok(Self { mode, hash, path })
    }

    /// Mode rendered as it appears in the tree payload.
    pub fn mode_octal(&self) -> String {
        format!("{:o}", self.mode)
    }
}

impl fmt::Display for TreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{:o}' '{}' '{}'", self.mode, self.hash, self.path)
    }
}

/// Check that `path` is a safe relative path.
///
/// Returns the reason on failure.
pub fn validate_relative_path(path: &str) -> std::result::Result<(), &'static str> {
    if path.is_empty() {
        return Err("path cannot be empty");
    }
    if path.starts_with('/') {
        return Err("path must be relative");
    }
    if path.contains('\\') {
        return Err("path must use '/' separators");
    }
    if path.contains('\n') || path.contains('\0') {
        return Err("path cannot contain newlines or null bytes");
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err("path has an empty segment"),
            "." | ".." => return Err("path cannot contain '.' or '..' segments"),
            _ => {}
        }
    }
    Ok(())
}

/// Encode entries as a tree payload, in the order given.
pub fn encode_tree(entries: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut lines = Vec::with_capacity(entries.len());

    for entry in entries {
        validate_relative_path(&entry.path)
            .map_err(|reason| Error::invalid_entry(entry.path.as_str(), reason))?;
        if !seen.insert(entry.path.as_str()) {
            return Err(Error::invalid_entry(
                entry.path.as_str(),
                "duplicate path in tree",
            ));
        }
        lines.push(entry.to_string());
    }

    Ok(lines.join("\n").into_bytes())
}

/// Decode a tree payload.
///
/// Only the grammar is checked here. Paths are taken verbatim; whether they
/// are safe to materialize is decided at restore time.
pub fn decode_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    if data.is_empty() {
        return Ok(Vec::new());
    }

    data.split(|&b| b == b'\n')
        .enumerate()
        .map(|(index, line)| decode_line(index + 1, line))
        .collect()
}

fn decode_line(line_no: usize, line: &[u8]) -> Result<TreeEntry> {
    let malformed = |reason: &str| Error::malformed_tree(line_no, reason);

    let line = std::str::from_utf8(line).map_err(|_| malformed("line is not UTF-8"))?;
    let inner = line
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| malformed("expected three quoted fields"))?;

    let (mode, rest) = inner
        .split_once("' '")
        .ok_or_else(|| malformed("expected three quoted fields"))?;
    let (hash, path) = rest
        .split_once("' '")
        .ok_or_else(|| malformed("expected three quoted fields"))?;

    if mode.is_empty() || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(malformed(&format!("invalid mode {:?}", mode)));
    }
    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| malformed(&format!("mode {:?} out of range", mode)))?;

    if hash.len() != HEX_LEN {
        return Err(malformed(&format!(
            "hash must be {} hex characters, got {:?}",
            HEX_LEN, hash
        )));
    }
    let hash = Hash::from_hex(hash).map_err(|_| malformed(&format!("invalid hash {:?}", hash)))?;

    if path.is_empty() {
        return Err(malformed("empty path"));
    }

    Ok(TreeEntry {
        mode,
        hash,
        path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mode: FileMode, content: &[u8], path: &str) -> TreeEntry {
        TreeEntry::new(mode, Hash::digest(content), path).unwrap()
    }

    #[test]
    fn test_encode_line_format() {
        let hash = Hash::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        let entries = vec![TreeEntry::new(file_modes::REGULAR, hash, "x.txt").unwrap()];

        let encoded = encode_tree(&entries).unwrap();
        assert_eq!(
            encoded,
            b"'100644' 'e69de29bb2d1d6434b8b29ae775ad8c2e48c5391' 'x.txt'"
        );
    }

    #[test]
    fn test_encode_decode_keeps_order() {
        let entries = vec![
            entry(file_modes::REGULAR, b"b", "b.txt"),
            entry(file_modes::EXECUTABLE, b"a", "bin/run.sh"),
            entry(file_modes::REGULAR, b"a", "a.txt"),
        ];

        let encoded = encode_tree(&entries).unwrap();
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 2);
        assert_eq!(decode_tree(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_empty_tree() {
        let encoded = encode_tree(&[]).unwrap();
        assert!(encoded.is_empty());
        assert!(decode_tree(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let entries = vec![entry(file_modes::REGULAR, b"x", "x")];
        let mut encoded = encode_tree(&entries).unwrap();
        encoded.push(b'\n');
        assert_eq!(decode_tree(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_path_with_quotes_and_spaces() {
        let entries = vec![entry(file_modes::REGULAR, b"q", "it's a ' 'file")];
        let encoded = encode_tree(&entries).unwrap();
        assert_eq!(decode_tree(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_encode_rejects_duplicate_path() {
        let entries = vec![
            entry(file_modes::REGULAR, b"1", "same.txt"),
            entry(file_modes::REGULAR, b"2", "same.txt"),
        ];
        assert!(matches!(
            encode_tree(&entries),
            Err(Error::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_unsafe_paths() {
        for path in ["/etc/passwd", "../up", "a/../b", "a//b", "./a", "a\\b", "a\nb", ""] {
            let unchecked = TreeEntry {
                mode: file_modes::REGULAR,
                hash: Hash::digest(b"x"),
                path: path.to_string(),
            };
            assert!(
                matches!(encode_tree(&[unchecked]), Err(Error::InvalidEntry { .. })),
                "accepted {:?}",
                path
            );
            assert!(TreeEntry::new(file_modes::REGULAR, Hash::digest(b"x"), path).is_err());
        }
    }

    #[test]
    fn test_decode_keeps_unsafe_path_verbatim() {
        let line = b"'100644' 'e69de29bb2d1d6434b8b29ae775ad8c2e48c5391' '../escape'";
        let entries = decode_tree(line).unwrap();
        assert_eq!(entries[0].path, "../escape");
    }

    #[test]
    fn test_decode_rejects_bad_grammar() {
        let hash = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
        let cases = [
            "garbage".to_string(),
            "'".to_string(),
            format!("'100644' '{}'", hash),
            format!("100644 {} x.txt", hash),
            format!("'' '{}' 'x'", hash),
            format!("'100648' '{}' 'x'", hash),
            format!("'644' '{}' 'x'", &hash[..39]),
            format!("'644' '{}zz' 'x'", &hash[..38]),
            format!("'644' '{}' ''", hash),
            format!("'77777777777777' '{}' 'x'", hash),
        ];
        for case in &cases {
            assert!(
                matches!(decode_tree(case.as_bytes()), Err(Error::MalformedTree { .. })),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn test_decode_reports_line_number() {
        let good = "'100644' 'e69de29bb2d1d6434b8b29ae775ad8c2e48c5391' 'a'";
        let data = format!("{}\n{}\nbroken", good, good);
        match decode_tree(data.as_bytes()) {
            Err(Error::MalformedTree { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected MalformedTree, got {:?}", other),
        }
    }

    // Property-based tests
    use proptest::prelude::*;

    // Relative paths of 1-4 segments, no '.' or '..'
    fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec(
            "[a-zA-Z0-9 ._'-]{1,12}".prop_filter("no dot segments", |s| s != "." && s != ".."),
            1..5,
        )
        .prop_map(|segments| segments.join("/"))
    }

    // Entry lists with distinct paths
    fn arb_entries() -> impl Strategy<Value = Vec<TreeEntry>> {
        prop::collection::vec(
            (any::<u32>(), prop::array::uniform20(any::<u8>()), arb_path()),
            0..20,
        )
        .prop_map(|raw| {
            let mut seen = HashSet::new();
            raw.into_iter()
                .filter(|(_, _, path)| seen.insert(path.clone()))
                .map(|(mode, bytes, path)| TreeEntry::new(mode, Hash::from_bytes(bytes), path).unwrap())
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Encoding then decoding preserves entries and their order
        #[test]
        fn prop_tree_roundtrip(entries in arb_entries()) {
            let encoded = encode_tree(&entries)?;
            prop_assert_eq!(decode_tree(&encoded)?, entries);
        }

        /// Repeating any entry's path is rejected
        #[test]
        fn prop_duplicate_rejected(entries in arb_entries(), pick in any::<prop::sample::Index>()) {
            prop_assume!(!entries.is_empty());
            let mut with_dup = entries.clone();
            with_dup.push(entries[pick.index(entries.len())].clone());
            prop_assert!(encode_tree(&with_dup).is_err());
        }

        /// Decoding arbitrary bytes never panics
        #[test]
        fn prop_decode_arbitrary(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_tree(&data);
        }
    }
}
