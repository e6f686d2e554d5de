//! Error types for fscache_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using fscache_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Object kind is not one of blob, tree or commit.
    #[error("Invalid object kind: {kind:?}")]
    InvalidObjectKind { kind: String },

    /// Object header is missing its NUL terminator or has a bad field.
    #[error("Malformed object header: {reason}")]
    MalformedHeader { reason: String },

    /// Compressed object data is invalid, truncated or has trailing bytes.
    #[error("Corrupt object data for {hash}: {reason}")]
    CorruptObjectData { hash: String, reason: String },

    /// Object not found in store.
    #[error("Object not found: {hash}")]
    ObjectNotFound { hash: String },

    /// Object exists but has a different kind than the caller needs.
    #[error("Wrong object kind for {hash}: expected {expected}, got {got}")]
    WrongObjectKind {
        hash: String,
        expected: String,
        got: String,
    },

    /// Tree payload does not follow the three-quoted-field grammar.
    #[error("Malformed tree at line {line}: {reason}")]
    MalformedTree { line: usize, reason: String },

    /// Tree entry cannot be encoded.
    #[error("Invalid tree entry {path:?}: {reason}")]
    InvalidEntry { path: String, reason: String },

    /// A path resolves outside of the root it must stay within.
    #[error("Path {path} escapes root {root}")]
    PathEscapesRoot { path: PathBuf, root: PathBuf },

    /// Payload source length cannot be determined.
    #[error("Unmeasurable payload source: {reason}")]
    UnmeasurableSource { reason: String },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },
}

impl Error {
    /// Create an InvalidObjectKind error.
    pub fn invalid_object_kind(kind: impl Into<String>) -> Self {
        Error::InvalidObjectKind { kind: kind.into() }
    }

    /// Create a MalformedHeader error.
    pub fn malformed_header(reason: impl Into<String>) -> Self {
        Error::MalformedHeader {
            reason: reason.into(),
        }
    }

    /// Create a CorruptObjectData error.
    pub fn corrupt_object_data(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptObjectData {
            hash: hash.into(),
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(hash: impl Into<String>) -> Self {
        Error::ObjectNotFound { hash: hash.into() }
    }

    /// Create a WrongObjectKind error.
    pub fn wrong_object_kind(
        hash: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Error::WrongObjectKind {
            hash: hash.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a MalformedTree error.
    pub fn malformed_tree(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedTree {
            line,
            reason: reason.into(),
        }
    }

    /// Create an InvalidEntry error.
    pub fn invalid_entry(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Error::PathEscapesRoot {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Create an UnmeasurableSource error.
    pub fn unmeasurable_source(reason: impl Into<String>) -> Self {
        Error::UnmeasurableSource {
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = Error::object_not_found("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert!(err.to_string().contains("da39a3ee5e6b4b0d3255bfef95601890afd80709"));

        let err = Error::path_escapes_root("/a/c", "/a/b");
        let msg = err.to_string();
        assert!(msg.contains("/a/c"));
        assert!(msg.contains("/a/b"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io { .. }));
    }
}
