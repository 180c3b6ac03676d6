//! Ignore rules for source packaging.
//!
//! Reads the `.gcloudignore` file from the root of the source tree. Each
//! remaining line is a glob pattern; blank lines and `#` comments are dropped.
//! Patterns are not validated here, the archive packager compiles them.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::IGNORE_FILE;

/// Errors that can occur while loading ignore rules.
#[derive(Debug, Error)]
pub enum IgnoreError {
  /// The ignore file exists but could not be read.
  #[error("failed to read ignore file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Ordered set of glob exclusion patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules(Vec<String>);

impl IgnoreRules {
  /// Parse the contents of an ignore file.
  pub fn parse(contents: &str) -> Self {
    let patterns = contents
      .lines()
      .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
      .map(str::to_string)
      .collect();
    Self(patterns)
  }

  pub fn patterns(&self) -> &[String] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }
}

impl From<Vec<String>> for IgnoreRules {
  fn from(patterns: Vec<String>) -> Self {
    Self(patterns)
  }
}

/// Path of the ignore file for a given source root.
pub fn ignore_file_path(source_root: &Path) -> PathBuf {
  source_root.join(IGNORE_FILE)
}

/// Load ignore rules from `source_root`.
///
/// A missing ignore file yields an empty rule set.
pub fn load_rules(source_root: &Path) -> Result<IgnoreRules, IgnoreError> {
  let path = ignore_file_path(source_root);
  match std::fs::read_to_string(&path) {
    Ok(contents) => {
      let rules = IgnoreRules::parse(&contents);
      debug!(path = %path.display(), count = rules.len(), "loaded ignore rules");
      Ok(rules)
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "no ignore file");
      Ok(IgnoreRules::default())
    }
    Err(source) => Err(IgnoreError::Read { path, source }),
  }
}
