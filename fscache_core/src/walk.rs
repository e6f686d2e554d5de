//! Directory walking for snapshots.

use crate::error::Result;
use crate::snapshot::{Snapshot, normalize_path};
use crate::store::Store;
use std::path::{Path, PathBuf};

/// List files under `root`, recursively, as paths relative to `root`.
///
/// Hidden files are included, `.gitignore` rules are honored and `.git`
/// directories are skipped. `exclude`, if it lies under `root`, is pruned
/// with everything below it. The result is sorted.
pub fn collect_files(root: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>> {
    let root = normalize_path(root)?;
    let exclude = exclude.map(normalize_path).transpose()?;

    // Use ignore crate to respect .gitignore
    let walker = ignore::WalkBuilder::new(&root)
        .hidden(false) // Include hidden files
        .git_ignore(true) // Respect .gitignore
        .require_git(false)
        .git_global(false)
        .filter_entry(move |entry| {
            entry.file_name() != ".git" && exclude.as_deref() != Some(entry.path())
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(&root) {
            files.push(relative.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

impl Store {
    /// Snapshot every file under `root`, leaving out the store itself.
    pub fn snapshot_dir(&self, root: &Path) -> Result<Snapshot> {
        let files = collect_files(root, Some(self.root()))?;
        self.write_snapshot(root, &files)
    }
}
