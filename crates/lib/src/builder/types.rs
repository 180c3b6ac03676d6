//! Results and errors of a build invocation.

use serde::Serialize;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::auth::AuthError;
use crate::ignore::IgnoreError;
use crate::service::ServiceError;
use crate::spec::{Build, ConfigError, OverrideError};
use crate::storage::StoreError;
use crate::storage::staging::StagingError;

use super::logs::LogError;

/// Build snapshot returned alongside the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildMetadata {
  pub build: Build,
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildHandle {
  /// Operation name of the submitted build.
  pub name: String,
  pub metadata: BuildMetadata,
  /// Full build log. Set once the build reached a terminal state.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log: Option<String>,
}

impl BuildHandle {
  pub fn id(&self) -> Option<&str> {
    self.metadata.build.id.as_deref()
  }

  pub fn logs_bucket(&self) -> Option<&str> {
    self.metadata.build.logs_bucket.as_deref()
  }
}

/// A build that reached a terminal state other than success.
///
/// `log` is `None` when the log could not be fetched, never an empty
/// placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct BuildFailure {
  pub message: String,
  pub build_id: String,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed_step: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub suggestion: Option<String>,
  /// Structured error reported by the build service, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cause: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log: Option<String>,
}

impl BuildFailure {
  /// Describe the failure of `build`.
  pub fn from_build(build: Option<&Build>, cause: Option<String>) -> Self {
    let build_id = build
      .and_then(|b| b.id.clone())
      .unwrap_or_else(|| "unknown".to_string());
    let status = build
      .and_then(|b| b.status)
      .map(|s| s.to_string())
      .unwrap_or_else(|| "UNKNOWN".to_string());
    let failed_step = build.and_then(|b| b.failed_step()).map(|s| s.name.clone());

    let mut message = format!("Build {build_id} failed with status: {status}");
    if let Some(step) = &failed_step {
      message.push_str(&format!(" at step \"{step}\""));
    }
    let suggestion = failed_step
      .as_ref()
      .map(|step| format!("Check logs for step \"{step}\" to diagnose the issue."));

    Self {
      message,
      build_id,
      status,
      failed_step,
      suggestion,
      cause,
      log: None,
    }
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Override(#[from] OverrideError),

  #[error(transparent)]
  Ignore(#[from] IgnoreError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Auth(#[from] AuthError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Service(#[from] ServiceError),

  #[error(transparent)]
  Log(#[from] LogError),

  #[error(transparent)]
  Failed(Box<BuildFailure>),
}

impl From<StagingError> for BuildError {
  fn from(e: StagingError) -> Self {
    match e {
      StagingError::Store(e) => BuildError::Store(e),
      StagingError::Archive(e) => BuildError::Archive(e),
    }
  }
}

impl From<BuildFailure> for BuildError {
  fn from(failure: BuildFailure) -> Self {
    BuildError::Failed(Box::new(failure))
  }
}

impl BuildError {
  /// The enriched job failure, when the remote build itself failed.
  pub fn failure(&self) -> Option<&BuildFailure> {
    match self {
      BuildError::Failed(f) => Some(f),
      _ => None,
    }
  }
}
