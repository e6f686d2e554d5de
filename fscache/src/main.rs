mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fscache_core::{DEFAULT_BLOCK_SIZE, Error, Hash, ObjectKind, Store, StoreOptions};
use output::{
    CatFileOutput, HashObjectOutput, LsTreeOutput, OutputWriter, RestoreOutput, TreeEntryInfo,
    WriteTreeOutput,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// fscache - A content-addressed filesystem snapshot cache
#[derive(Parser)]
#[command(name = "fscache")]
#[command(about = "Snapshot files into a loose-object store and restore them", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository directory (defaults to FSCACHE_REPO env var or ./.fscache)
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    /// Chunk size for streaming I/O
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// zlib compression level (0-9)
    #[arg(long, global = true, default_value_t = 6,
          value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Fail a restore when a file mode cannot be applied
    #[arg(long, global = true)]
    strict_modes: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the hash of a file as an object, optionally storing it
    HashObject {
        /// Object kind
        #[arg(short = 't', long = "type", default_value = "blob")]
        kind: String,

        /// Write the object into the repository
        #[arg(short, long)]
        write: bool,

        /// File to hash
        file: PathBuf,
    },

    /// Print an object's payload, kind or size
    CatFile {
        /// Print the object kind only
        #[arg(short = 't', conflicts_with = "size")]
        kind: bool,

        /// Print the payload size only
        #[arg(short = 's')]
        size: bool,

        /// Hash of the object
        hash: String,
    },

    /// List the entries of a tree
    LsTree {
        /// Hash of the tree
        hash: String,
    },

    /// Snapshot files under a root into a tree
    WriteTree {
        /// Snapshot root
        root: PathBuf,

        /// Files to include, relative to the root (walks the root if omitted)
        paths: Vec<PathBuf>,
    },

    /// Restore a tree into a directory
    Restore {
        /// Hash of the tree
        tree: String,

        /// Destination directory
        dest: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);
    if let Err(err) = run(cli, &output) {
        let code = result_code(&err);
        output.write_error(&err, code);
        std::process::exit(i32::from(code));
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, output: &OutputWriter) -> Result<()> {
    // Determine repository: CLI arg > FSCACHE_REPO env var > ./.fscache default
    let repo = cli
        .repo
        .or_else(|| std::env::var("FSCACHE_REPO").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./.fscache"));

    let options = StoreOptions::default()
        .with_block_size(cli.block_size)
        .with_compression_level(cli.level)
        .with_strict_modes(cli.strict_modes);
    let store = Store::with_options(&repo, options);
    debug!(repo = %repo.display(), ?options, "opened repository");

    match cli.command {
        Commands::HashObject { kind, write, file } => {
            cmd_hash_object(&store, output, &kind, write, &file)
        }
        Commands::CatFile { kind, size, hash } => cmd_cat_file(&store, output, &hash, kind, size),
        Commands::LsTree { hash } => cmd_ls_tree(&store, output, &hash),
        Commands::WriteTree { root, paths } => cmd_write_tree(&store, output, &root, &paths),
        Commands::Restore { tree, dest } => cmd_restore(&store, output, &tree, &dest),
    }
}

/// Map an error to the process exit code.
fn result_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::ObjectNotFound { .. }) => 2,
        Some(Error::PathEscapesRoot { .. }) | Some(Error::InvalidEntry { .. }) => 3,
        Some(
            Error::CorruptObjectData { .. }
            | Error::MalformedHeader { .. }
            | Error::MalformedTree { .. },
        ) => 4,
        Some(Error::WrongObjectKind { .. }) => 5,
        _ => 1,
    }
}

fn parse_hash(hash_str: &str) -> Result<Hash> {
    Hash::from_hex(hash_str).with_context(|| format!("Invalid hash: {}", hash_str))
}

fn cmd_hash_object(
    store: &Store,
    output: &OutputWriter,
    kind: &str,
    write: bool,
    file: &Path,
) -> Result<()> {
    let kind = ObjectKind::parse(kind)?;

    let result = if write {
        store.write_file(kind, file)
    } else {
        store.hash_file(kind, file)
    }
    .with_context(|| format!("Failed to hash {}", file.display()))?;

    output.write(
        &HashObjectOutput {
            success: true,
            result_code: 0,
            hash: result.hash,
            kind,
            length: result.length,
            written: result.written,
        },
        || format!("{}\n", result.hash),
    )
}

fn cmd_cat_file(
    store: &Store,
    output: &OutputWriter,
    hash_str: &str,
    kind_only: bool,
    size_only: bool,
) -> Result<()> {
    let hash = parse_hash(hash_str)?;
    let mut reader = store
        .read_object(&hash)
        .with_context(|| format!("Failed to read object {}", hash))?;

    if output.is_json() || kind_only || size_only {
        let (kind, length) = (reader.kind(), reader.length());
        return output.write(
            &CatFileOutput {
                success: true,
                result_code: 0,
                hash,
                kind,
                length,
            },
            || match (kind_only, size_only) {
                (true, _) => format!("{}\n", kind),
                (_, true) => format!("{}\n", length),
                _ => String::new(),
            },
        );
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    reader
        .copy_to(&mut handle)
        .with_context(|| format!("Failed to output object {}", hash))?;
    handle.flush()?;

    Ok(())
}

fn cmd_ls_tree(store: &Store, output: &OutputWriter, hash_str: &str) -> Result<()> {
    let hash = parse_hash(hash_str)?;
    let entries = store
        .read_tree(&hash)
        .with_context(|| format!("Failed to read tree {}", hash))?;

    output.write(
        &LsTreeOutput {
            success: true,
            result_code: 0,
            hash,
            entries: entries.iter().map(TreeEntryInfo::from).collect(),
        },
        || {
            entries
                .iter()
                .map(|e| format!("{} {} {}\n", e.mode_octal(), e.hash, e.path))
                .collect()
        },
    )
}

fn cmd_write_tree(
    store: &Store,
    output: &OutputWriter,
    root: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let snapshot = if paths.is_empty() {
        store.snapshot_dir(root)
    } else {
        store.write_snapshot(root, paths)
    }
    .with_context(|| format!("Failed to snapshot {}", root.display()))?;

    let stats = snapshot.stats;
    output.write(
        &WriteTreeOutput {
            success: true,
            result_code: 0,
            tree: snapshot.tree,
            entries: snapshot.entries.iter().map(TreeEntryInfo::from).collect(),
            stats,
        },
        || {
            format!(
                "{}\n{} bytes written ({} new objects, {} already present)\n",
                snapshot.tree, stats.bytes_written, stats.objects_written, stats.objects_skipped
            )
        },
    )
}

fn cmd_restore(store: &Store, output: &OutputWriter, tree_str: &str, dest: &Path) -> Result<()> {
    let tree = parse_hash(tree_str)?;
    let restore = store
        .restore_snapshot(&tree, dest)
        .with_context(|| format!("Failed to restore {} to {}", tree, dest.display()))?;

    output.write(
        &RestoreOutput {
            success: true,
            result_code: 0,
            tree,
            destination: dest.display().to_string(),
            paths: restore.paths.clone(),
            bytes_restored: restore.bytes_restored,
            mode_failures: restore.mode_failures.clone(),
        },
        || {
            let mut text: String = restore.paths.iter().map(|p| format!("{}\n", p)).collect();
            for failure in &restore.mode_failures {
                text.push_str(&format!(
                    "warning: mode {:o} not applied to {}: {}\n",
                    failure.mode, failure.path, failure.error
                ));
            }
            text.push_str(&format!(
                "Restored {} files ({} bytes) to {}\n",
                restore.paths.len(),
                restore.bytes_restored,
                dest.display()
            ));
            text
        },
    )
}
