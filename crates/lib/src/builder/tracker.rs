//! Completion tracking for submitted builds.
//!
//! The operation is polled at a fixed interval until it is done, reports an
//! error, or carries a build in a failed terminal state. There is no local
//! deadline: the build's own timeout bounds the wait. Dropping the future
//! stops polling.
//!
//! When a poll carries no build snapshot, the snapshot returned at submission
//! is reported instead.

use std::time::Duration;

use tracing::{debug, info};

use crate::service::{BuildService, Operation, OperationState, ServiceError};
use crate::spec::{Build, BuildStatus};

use super::types::BuildFailure;

/// Terminal outcome of a build.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
  Success(Option<Build>),
  Failure { failure: BuildFailure, build: Option<Build> },
}

fn failed_status(build: &Option<Build>) -> Option<BuildStatus> {
  build.as_ref().and_then(|b| b.status).filter(BuildStatus::is_failure)
}

fn failure(build: Option<Build>, cause: Option<String>) -> Completion {
  Completion::Failure {
    failure: BuildFailure::from_build(build.as_ref(), cause),
    build,
  }
}

/// Poll `operation` every `interval` until it is terminal.
///
/// Transport errors while polling end the wait and are returned unchanged.
pub async fn wait_for_completion(
  service: &dyn BuildService,
  operation: &Operation,
  interval: Duration,
) -> Result<Completion, ServiceError> {
  let name = operation.name.as_str();
  let submitted = || operation.build().cloned();
  let mut polls: u64 = 0;
  loop {
    polls += 1;
    let state = match service.poll(name).await? {
      OperationState::Running(build) => OperationState::Running(build.or_else(submitted)),
      OperationState::Done(build) => OperationState::Done(build.or_else(submitted)),
      OperationState::Failed { error, build } => OperationState::Failed {
        error,
        build: build.or_else(submitted),
      },
    };
    match state {
      OperationState::Failed { error, build } => {
        info!(operation = %name, code = error.code, "build operation reported an error");
        return Ok(failure(build, Some(error.message)));
      }
      OperationState::Done(build) | OperationState::Running(build) if failed_status(&build).is_some() => {
        info!(operation = %name, status = ?failed_status(&build), "build failed");
        return Ok(failure(build, None));
      }
      OperationState::Done(build) => {
        info!(operation = %name, polls, "build finished");
        return Ok(Completion::Success(build));
      }
      OperationState::Running(build) => {
        let status = build.as_ref().and_then(|b| b.status);
        debug!(operation = %name, ?status, polls, "build still running");
      }
    }
    tokio::time::sleep(interval).await;
  }
}
