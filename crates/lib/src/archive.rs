//! Source archive packaging.
//!
//! Walks the source root, drops everything matched by the ignore rules and
//! writes the rest as a gzip-compressed tarball. The tarball is never written
//! to disk: compression runs on a blocking task that writes into one end of an
//! in-memory pipe while the upload reads from the other end, so memory use is
//! bounded by the pipe buffer rather than the size of the tree.
//!
//! Entry names are relative to the source root and emitted in sorted order.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::Stream;
use glob::{MatchOptions, Pattern};
use tar::HeaderMode;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::ignore::IgnoreRules;

/// Capacity of the in-memory pipe between compression and upload.
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// A stream of archive bytes, consumed by an object store upload.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// Errors that can occur while packaging sources.
#[derive(Debug, Error)]
pub enum ArchiveError {
  /// An ignore pattern is not a valid glob.
  #[error("invalid ignore pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  /// Walking the source tree failed.
  #[error("failed to walk source tree: {0}")]
  Walk(#[from] walkdir::Error),

  /// Reading a source file or writing the archive failed.
  #[error("archive io error: {0}")]
  Io(#[from] io::Error),

  /// The packaging task panicked or was cancelled.
  #[error("archive task failed: {0}")]
  Task(String),
}

/// Compiled form of [`IgnoreRules`].
#[derive(Debug)]
pub struct Exclusions {
  patterns: Vec<Exclusion>,
}

#[derive(Debug)]
struct Exclusion {
  pattern: Pattern,
  dir_only: bool,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

impl Exclusions {
  /// Compile ignore rules into glob patterns.
  ///
  /// A trailing `/` restricts a pattern to directories and a leading `/` is
  /// dropped since every pattern is already anchored at the source root.
  pub fn compile(rules: &IgnoreRules) -> Result<Self, ArchiveError> {
    let mut patterns = Vec::with_capacity(rules.len());
    for raw in rules.patterns() {
      let dir_only = raw.ends_with('/');
      let trimmed = raw.trim_end_matches('/').trim_start_matches('/');
      if trimmed.is_empty() {
        continue;
      }
      let pattern = Pattern::new(trimmed).map_err(|source| ArchiveError::InvalidPattern {
        pattern: raw.clone(),
        source,
      })?;
      patterns.push(Exclusion { pattern, dir_only });
    }
    Ok(Self { patterns })
  }

  /// Whether a root-relative path (using `/` separators) is excluded.
  pub fn is_excluded(&self, relative: &str, is_dir: bool) -> bool {
    self
      .patterns
      .iter()
      .any(|p| (is_dir || !p.dir_only) && p.pattern.matches_with(relative, MATCH_OPTIONS))
  }
}

/// Render a relative path with `/` separators regardless of platform.
fn slash_path(relative: &Path) -> String {
  relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// List every file under `root` that survives the ignore rules.
///
/// Returned paths are relative to `root` and sorted. An excluded directory
/// prunes its whole subtree.
pub fn collect_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<PathBuf>, ArchiveError> {
  let exclusions = Exclusions::compile(rules)?;

  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| {
      let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
      !exclusions.is_excluded(&slash_path(relative), entry.file_type().is_dir())
    });

  let mut files = Vec::new();
  for entry in walker {
    let entry = entry?;
    if entry.file_type().is_dir() {
      continue;
    }
    if let Ok(relative) = entry.path().strip_prefix(root) {
      files.push(relative.to_path_buf());
    }
  }

  files.sort();
  debug!(root = %root.display(), count = files.len(), "collected source files");
  Ok(files)
}

/// Summary of a finished archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
  pub files: usize,
}

/// Write a gzip-compressed tarball of `files` (relative to `root`) into `writer`.
pub fn write_archive<W: Write>(writer: W, root: &Path, files: &[PathBuf]) -> Result<ArchiveSummary, ArchiveError> {
  let encoder = GzEncoder::new(writer, Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.mode(HeaderMode::Deterministic);
  // Links are stored as links; a dangling one must not fail the archive.
  builder.follow_symlinks(false);

  for relative in files {
    builder.append_path_with_name(root.join(relative), relative)?;
  }

  let encoder = builder.into_inner()?;
  let mut writer = encoder.finish()?;
  writer.flush()?;

  Ok(ArchiveSummary { files: files.len() })
}

/// Handle on the background compression task.
pub struct PackTask {
  handle: JoinHandle<Result<ArchiveSummary, ArchiveError>>,
}

impl PackTask {
  /// Wait for compression to finish and report its outcome.
  pub async fn finish(self) -> Result<ArchiveSummary, ArchiveError> {
    self.handle.await.map_err(|e| ArchiveError::Task(e.to_string()))?
  }
}

/// Start packaging `files` on a blocking task.
///
/// Returns the readable end of the pipe and a handle to the writer task. The
/// stream ends once the archive is complete or the task fails; callers check
/// [`PackTask::finish`] after consuming the stream.
pub fn spawn_archive(root: PathBuf, files: Vec<PathBuf>) -> (ByteStream, PackTask) {
  let (writer, reader) = tokio::io::duplex(PIPE_BUFFER_SIZE);
  let bridge = SyncIoBridge::new(writer);

  let handle = tokio::task::spawn_blocking(move || {
    let summary = write_archive(bridge, &root, &files)?;
    info!(files = summary.files, "source archive complete");
    Ok(summary)
  });

  (Box::pin(ReaderStream::new(reader)), PackTask { handle })
}
