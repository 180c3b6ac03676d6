//! Build resource types shared by the config loader and the build service.
//!
//! Field names follow the build service's JSON representation (camelCase).
//! Fields this crate does not interpret are kept in `extra` so a config can
//! use any option the service understands.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declarative build definition, as loaded from `cloudbuild.yaml`/`.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<BuildStep>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub images: Vec<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub substitutions: BTreeMap<String, String>,

  /// Execution timeout in the service's duration format, e.g. `"1200s"`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<ExecutionOptions>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<Source>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A single execution step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
  /// Container image the step runs in.
  pub name: String,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dir: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entrypoint: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub wait_for: Vec<String>,

  /// Reported by the service, never set in configs.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<BuildStatus>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub machine_type: Option<String>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
  pub storage_source: StorageSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSource {
  pub bucket: String,
  pub object: String,
}

/// Status of a build or of one of its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
  StatusUnknown,
  Pending,
  Queued,
  Working,
  Success,
  Failure,
  InternalError,
  Timeout,
  Cancelled,
  Expired,
  #[serde(other)]
  Unknown,
}

impl BuildStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuildStatus::StatusUnknown => "STATUS_UNKNOWN",
      BuildStatus::Pending => "PENDING",
      BuildStatus::Queued => "QUEUED",
      BuildStatus::Working => "WORKING",
      BuildStatus::Success => "SUCCESS",
      BuildStatus::Failure => "FAILURE",
      BuildStatus::InternalError => "INTERNAL_ERROR",
      BuildStatus::Timeout => "TIMEOUT",
      BuildStatus::Cancelled => "CANCELLED",
      BuildStatus::Expired => "EXPIRED",
      BuildStatus::Unknown => "UNKNOWN",
    }
  }

  /// Terminal states that did not succeed.
  pub fn is_failure(&self) -> bool {
    matches!(
      self,
      BuildStatus::Failure
        | BuildStatus::InternalError
        | BuildStatus::Timeout
        | BuildStatus::Cancelled
        | BuildStatus::Expired
    )
  }

  pub fn is_terminal(&self) -> bool {
    *self == BuildStatus::Success || self.is_failure()
  }
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A build as reported by the build service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<BuildStatus>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status_detail: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<BuildStep>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub images: Vec<String>,

  /// Bucket holding the build log, e.g. `gs://123.cloudbuild-logs.googleusercontent.com`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub logs_bucket: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub log_url: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub create_time: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finish_time: Option<String>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Build {
  /// First step the service reported as failed.
  pub fn failed_step(&self) -> Option<&BuildStep> {
    self.steps.iter().find(|s| s.status == Some(BuildStatus::Failure))
  }
}
