//! Remote build service.
//!
//! [`BuildService`] is the contract the engine needs from the build API:
//! submit a build as a long-running operation, poll that operation, and
//! list, get or cancel builds. [`CloudBuildClient`] implements it over REST.

pub mod cloudbuild;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::AuthError;
use crate::spec::{Build, BuildSpec};

pub use cloudbuild::CloudBuildClient;

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("invalid build service endpoint '{0}'")]
  InvalidEndpoint(String),

  #[error("authentication failed: {0}")]
  Auth(#[from] AuthError),

  #[error("build service request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("build service error ({status}): {message}")]
  Api { status: u16, message: String },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("unexpected response from build service: {0}")]
  Decode(String),
}

/// `google.rpc.Status` carried by a failed operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcStatus {
  #[serde(default)]
  pub code: i32,

  #[serde(default)]
  pub message: String,
}

impl std::fmt::Display for RpcStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} (code {})", self.message, self.code)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build: Option<Build>,
}

/// Long-running operation as returned by the build service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
  pub name: String,

  #[serde(default)]
  pub done: bool,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcStatus>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<OperationMetadata>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response: Option<Value>,
}

impl Operation {
  /// Build snapshot attached to the operation metadata.
  pub fn build(&self) -> Option<&Build> {
    self.metadata.as_ref().and_then(|m| m.build.as_ref())
  }

  /// Classify this operation for the completion tracker.
  pub fn state(&self) -> OperationState {
    let build = self.build().cloned();
    match (&self.error, self.done) {
      (Some(error), _) => OperationState::Failed {
        error: error.clone(),
        build,
      },
      (None, true) => OperationState::Done(build),
      (None, false) => OperationState::Running(build),
    }
  }
}

/// Observed state of a submitted build operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
  Running(Option<Build>),
  Done(Option<Build>),
  Failed { error: RpcStatus, build: Option<Build> },
}

/// One page of builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPage {
  #[serde(default)]
  pub builds: Vec<Build>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_page_token: Option<String>,
}

/// Parameters for [`BuildService::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
  /// Service-side filter expression, e.g. `status="FAILURE"`.
  pub filter: Option<String>,
  pub page_size: Option<u32>,
  pub page_token: Option<String>,
}

#[async_trait]
pub trait BuildService: Send + Sync {
  /// Submit `spec` and return the created operation.
  async fn submit(&self, project_id: &str, spec: BuildSpec) -> Result<Operation, ServiceError>;

  /// Fetch the current state of the operation `name`.
  async fn poll(&self, name: &str) -> Result<OperationState, ServiceError>;

  async fn list(&self, project_id: &str, request: &ListRequest) -> Result<BuildPage, ServiceError>;

  async fn get(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError>;

  /// Request cancellation of a build and return its updated state.
  async fn cancel(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError>;
}
