//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use fscache_core::{Hash, ModeFailure, ObjectKind, TreeEntry, WriteStats};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// `data` carries `success` and `result_code` like every DTO below.
    /// `text_fn` only runs in text mode.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error to stderr, as JSON with `success: false` in JSON mode.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `hash-object`.
#[derive(Debug, Serialize)]
pub struct HashObjectOutput {
    pub success: bool,
    pub result_code: u8,
    pub hash: Hash,
    pub kind: ObjectKind,
    pub length: u64,
    pub written: bool,
}

/// Output for `cat-file` in JSON mode, which reports the header only.
#[derive(Debug, Serialize)]
pub struct CatFileOutput {
    pub success: bool,
    pub result_code: u8,
    pub hash: Hash,
    pub kind: ObjectKind,
    pub length: u64,
}

/// One line of `ls-tree`.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntryInfo {
    pub mode: String,
    pub hash: Hash,
    pub path: String,
}

impl From<&TreeEntry> for TreeEntryInfo {
    fn from(entry: &TreeEntry) -> Self {
        Self {
            mode: entry.mode_octal(),
            hash: entry.hash,
            path: entry.path.clone(),
        }
    }
}

/// Output for `ls-tree`.
#[derive(Debug, Serialize)]
pub struct LsTreeOutput {
    pub success: bool,
    pub result_code: u8,
    pub hash: Hash,
    pub entries: Vec<TreeEntryInfo>,
}

/// Output for `write-tree`.
#[derive(Debug, Serialize)]
pub struct WriteTreeOutput {
    pub success: bool,
    pub result_code: u8,
    pub tree: Hash,
    pub entries: Vec<TreeEntryInfo>,
    pub stats: WriteStats,
}

/// Output for `restore`.
#[derive(Debug, Serialize)]
pub struct RestoreOutput {
    pub success: bool,
    pub result_code: u8,
    pub tree: Hash,
    pub destination: String,
    pub paths: Vec<String>,
    pub bytes_restored: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mode_failures: Vec<ModeFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fscache_core::file_modes;

    #[test]
    fn test_error_output_shape() {
        let output = ErrorOutput {
            success: false,
            result_code: 2,
            error: "Object not found: abc".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&output).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["result_code"], 2);
    }

    #[test]
    fn test_tree_entry_info_uses_octal_mode() {
        let entry = TreeEntry::new(file_modes::EXECUTABLE, Hash::digest(b"x"), "bin/run").unwrap();
        let info = TreeEntryInfo::from(&entry);
        assert_eq!(info.mode, "100755");

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["hash"], entry.hash.to_hex());
        assert_eq!(json["path"], "bin/run");
    }

    #[test]
    fn test_restore_output_omits_empty_mode_failures() {
        let output = RestoreOutput {
            success: true,
            result_code: 0,
            tree: Hash::digest(b"t"),
            destination: "out".to_string(),
            paths: vec!["a".to_string()],
            bytes_restored: 1,
            mode_failures: Vec::new(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert!(json.get("mode_failures").is_none());
        assert_eq!(json["paths"][0], "a");
    }
}
