//! Build orchestration.
//!
//! A [`Builder`] runs one build end to end: resolve the project, load and
//! override the build config, stage the sources, submit, wait for the build
//! to finish and attach its log. Progress is published on the builder's own
//! [`EventBus`]:
//!
//! ```text
//! [CREATING_BUCKET] -> UPLOADING -> BUILDING -> LOG -> COMPLETE
//! ```
//!
//! A failed build ends with [`BuildError::Failed`] instead of `COMPLETE`.
//! Its log is attached when it can be fetched; a failed fetch leaves the
//! log unset and is only logged.

pub mod logs;
pub mod tracker;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::IdentityProvider;
use crate::consts::{CLOUD_PLATFORM_SCOPE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REGISTRY};
use crate::events::{EventBus, ProgressEvent};
use crate::ignore::load_rules;
use crate::service::{BuildService, CloudBuildClient, ListRequest, ServiceError};
use crate::settings::Settings;
use crate::spec::{Build, BuildOverrides, ConfigRequest, attach_source, load_config};
use crate::storage::{GcsClient, ObjectStore, StagingStore};

pub use logs::{LogError, LogRetriever};
pub use tracker::{Completion, wait_for_completion};
pub use types::{BuildError, BuildFailure, BuildHandle, BuildMetadata};

/// Remote collaborators used by a [`Builder`].
#[derive(Clone)]
pub struct Services {
  pub identity: Arc<dyn IdentityProvider>,
  pub store: Arc<dyn ObjectStore>,
  pub service: Arc<dyn BuildService>,
}

impl Services {
  /// REST clients for the endpoints in `settings`.
  pub fn from_settings(settings: &Settings, identity: Arc<dyn IdentityProvider>) -> Result<Self, BuildError> {
    let store = GcsClient::new(&settings.storage_endpoint, identity.clone())?;
    let service = CloudBuildClient::new(&settings.cloudbuild_endpoint, identity.clone())?;
    Ok(Self {
      identity,
      store: Arc::new(store),
      service: Arc::new(service),
    })
  }
}

/// What to build and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
  pub source_path: PathBuf,
  /// Explicit config file. Searched for in `source_path` when unset.
  pub config_path: Option<PathBuf>,
  pub overrides: BuildOverrides,
  pub poll_interval: Duration,
  /// Registry for images built from a bare Dockerfile.
  pub registry: String,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      source_path: PathBuf::from("."),
      config_path: None,
      overrides: BuildOverrides::default(),
      poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
      registry: DEFAULT_REGISTRY.to_string(),
    }
  }
}

impl BuildOptions {
  pub fn new(source_path: impl Into<PathBuf>) -> Self {
    Self {
      source_path: source_path.into(),
      ..Default::default()
    }
  }

  /// Take the polling cadence and registry from `settings`.
  pub fn with_settings(mut self, settings: &Settings) -> Self {
    self.poll_interval = settings.poll_interval;
    self.registry = settings.registry.clone();
    self
  }
}

pub struct Builder {
  services: Services,
  options: BuildOptions,
  events: EventBus,
}

impl Builder {
  pub fn new(services: Services, options: BuildOptions) -> Self {
    Self {
      services,
      options,
      events: EventBus::new(),
    }
  }

  /// Listen for progress of this builder's builds.
  pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
    self.events.subscribe()
  }

  fn logs(&self) -> LogRetriever {
    LogRetriever::new(self.services.store.clone(), self.events.clone())
  }

  /// Stage the sources, run the build and wait for it to finish.
  pub async fn build(&self) -> Result<BuildHandle, BuildError> {
    let options = &self.options;
    let project_id = self.services.identity.project_id().await?;

    let mut spec = load_config(&ConfigRequest {
      source_path: &options.source_path,
      config_path: options.config_path.as_deref(),
      project_id: &project_id,
      tag: options.overrides.tag.as_deref(),
      registry: &options.registry,
    })?;
    options.overrides.apply(&mut spec)?;
    let rules = load_rules(&options.source_path)?;

    // Surface credential problems before anything is created remotely.
    self.services.identity.access_token(&[CLOUD_PLATFORM_SCOPE]).await?;

    let staging = StagingStore::new(self.services.store.clone(), self.events.clone());
    let bucket = staging.ensure_container(&project_id).await?;

    self.events.emit(ProgressEvent::Uploading);
    let staged = staging.upload(&bucket, &options.source_path, rules).await?;
    attach_source(&mut spec, &staged.bucket, &staged.object);

    self.events.emit(ProgressEvent::Building);
    let operation = self.services.service.submit(&project_id, spec).await?;
    info!(operation = %operation.name, project = %project_id, "waiting for build");

    match wait_for_completion(self.services.service.as_ref(), &operation, options.poll_interval).await? {
      Completion::Success(build) => {
        let build = build.unwrap_or_default();
        let log = self.logs().fetch_build_log(&build).await?;
        let handle = BuildHandle {
          name: operation.name,
          metadata: BuildMetadata { build },
          log: Some(log),
        };
        info!(build = ?handle.id(), "build succeeded");
        self.events.emit(ProgressEvent::Complete);
        Ok(handle)
      }
      Completion::Failure { mut failure, build } => {
        if let Some(build) = &build {
          match self.logs().fetch_build_log(build).await {
            Ok(log) => failure.log = Some(log),
            Err(e) => warn!(build = %failure.build_id, error = %e, "could not fetch log of failed build"),
          }
        }
        Err(failure.into())
      }
    }
  }

  /// List recent builds of the current project.
  pub async fn list_builds(&self, filter: Option<&str>, page_size: Option<u32>) -> Result<Vec<Build>, BuildError> {
    let project_id = self.services.identity.project_id().await?;
    let request = ListRequest {
      filter: filter.map(str::to_string),
      page_size,
      page_token: None,
    };
    let page = self.services.service.list(&project_id, &request).await?;
    Ok(page.builds)
  }

  pub async fn get_build(&self, build_id: &str) -> Result<Build, BuildError> {
    let project_id = self.services.identity.project_id().await?;
    Ok(self.services.service.get(&project_id, build_id).await?)
  }

  /// Cancel a build.
  ///
  /// Cancelling a build that already finished returns its current state
  /// instead of an error.
  pub async fn cancel_build(&self, build_id: &str) -> Result<Build, BuildError> {
    let project_id = self.services.identity.project_id().await?;
    match self.services.service.cancel(&project_id, build_id).await {
      Ok(build) => Ok(build),
      Err(err @ ServiceError::Api { status: 400 | 409 | 412, .. }) => {
        let build = self.services.service.get(&project_id, build_id).await?;
        if build.status.is_some_and(|s| s.is_terminal()) {
          info!(build = %build_id, status = ?build.status, "build already finished");
          Ok(build)
        } else {
          Err(err.into())
        }
      }
      Err(err) => Err(err.into()),
    }
  }

  /// Fetch the stored log of a finished build.
  pub async fn fetch_log(&self, build_id: &str) -> Result<String, BuildError> {
    let build = self.get_build(build_id).await?;
    Ok(self.logs().fetch_build_log(&build).await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::StaticIdentity;
  use crate::events::drain;
  use crate::service::{Operation, OperationMetadata, OperationState, RpcStatus};
  use crate::spec::{BuildStatus, BuildStep, ConfigError, OverrideError};
  use crate::util::testutil::{FakeBuildService, FakeStore, ServiceCall, StoreCall};
  use std::path::Path;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  const CONFIG: &str = "steps:\n- name: gcr.io/cloud-builders/docker\n  args: ['build', '.']\n";

  fn source_tree(config_name: &str, contents: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(config_name), contents).unwrap();
    std::fs::write(temp.path().join("index.js"), "console.log('hi')\n").unwrap();
    temp
  }

  fn remote_build(status: BuildStatus) -> Build {
    Build {
      id: Some("b-1".to_string()),
      status: Some(status),
      logs_bucket: Some("gs://logs".to_string()),
      ..Default::default()
    }
  }

  fn operation() -> Operation {
    Operation {
      name: "operations/build/el-gato/op-1".to_string(),
      metadata: Some(OperationMetadata {
        build: Some(remote_build(BuildStatus::Queued)),
      }),
      ..Default::default()
    }
  }

  fn builder(source: &Path, store: Arc<FakeStore>, service: Arc<FakeBuildService>) -> Builder {
    let services = Services {
      identity: Arc::new(StaticIdentity::new("el-gato", "t0ken")),
      store,
      service,
    };
    let mut options = BuildOptions::new(source);
    options.poll_interval = Duration::from_millis(1);
    Builder::new(services, options)
  }

  fn kinds(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(ProgressEvent::kind).collect()
  }

  #[tokio::test]
  async fn successful_build_attaches_log_then_completes() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new().with_object("logs", "log-b-1.txt", "🌳"));
    let service = Arc::new(FakeBuildService::new(operation()).with_polls(vec![
      OperationState::Running(None),
      OperationState::Done(Some(remote_build(BuildStatus::Success))),
    ]));
    let builder = builder(temp.path(), store.clone(), service.clone());
    let mut rx = builder.subscribe();

    let handle = builder.build().await.unwrap();
    assert_eq!(handle.log.as_deref(), Some("🌳"));
    assert_eq!(handle.id(), Some("b-1"));
    assert_eq!(handle.name, "operations/build/el-gato/op-1");

    let events = drain(&mut rx);
    assert_eq!(
      kinds(&events),
      vec!["CREATING_BUCKET", "UPLOADING", "BUILDING", "LOG", "COMPLETE"]
    );
    assert_eq!(events[0], ProgressEvent::CreatingBucket("el-gato-gcb-staging-bbq".to_string()));
    assert_eq!(service.poll_count(), 2);
  }

  #[tokio::test]
  async fn submitted_spec_references_uploaded_object() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new().with_object("logs", "log-b-1.txt", "ok"));
    let service = Arc::new(
      FakeBuildService::new(operation()).with_polls(vec![OperationState::Done(Some(remote_build(BuildStatus::Success)))]),
    );
    let mut builder = builder(temp.path(), store.clone(), service.clone());
    builder.options.overrides = BuildOverrides {
      timeout: Some("20m".to_string()),
      machine_type: Some("E2_HIGHCPU_8".to_string()),
      substitutions: [("_ENV".to_string(), "prod".to_string())].into(),
      ..Default::default()
    };

    builder.build().await.unwrap();

    let uploaded = store
      .calls()
      .into_iter()
      .find_map(|c| match c {
        StoreCall::WriteStream { bucket, object, content_type } => Some((bucket, object, content_type)),
        _ => None,
      })
      .unwrap();
    assert_eq!(uploaded.0, "el-gato-gcb-staging-bbq");
    assert_eq!(uploaded.2, "application/gzip");

    let spec = service
      .calls()
      .into_iter()
      .find_map(|c| match c {
        ServiceCall::Submit { project, spec } => {
          assert_eq!(project, "el-gato");
          Some(spec)
        }
        _ => None,
      })
      .unwrap();
    let source = spec.source.unwrap().storage_source;
    assert_eq!(source.bucket, uploaded.0);
    assert_eq!(source.object, uploaded.1);
    assert_eq!(spec.timeout.as_deref(), Some("1200s"));
    assert_eq!(spec.options.unwrap().machine_type.as_deref(), Some("E2_HIGHCPU_8"));
    assert_eq!(spec.substitutions.get("_ENV").map(String::as_str), Some("prod"));
  }

  #[tokio::test]
  async fn failed_build_carries_log_and_never_completes() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new().with_object("logs", "log-b-1.txt", "step 0 exploded"));
    let mut failed = remote_build(BuildStatus::Failure);
    failed.steps = vec![BuildStep {
      name: "gcr.io/cloud-builders/docker".to_string(),
      status: Some(BuildStatus::Failure),
      ..Default::default()
    }];
    let service = Arc::new(FakeBuildService::new(operation()).with_polls(vec![OperationState::Failed {
      error: RpcStatus {
        code: 2,
        message: "Build failed; check build logs for details".to_string(),
      },
      build: Some(failed),
    }]));
    let builder = builder(temp.path(), store, service);
    let mut rx = builder.subscribe();

    let err = builder.build().await.unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(
      failure.message,
      "Build b-1 failed with status: FAILURE at step \"gcr.io/cloud-builders/docker\""
    );
    assert_eq!(failure.log.as_deref(), Some("step 0 exploded"));
    assert_eq!(failure.cause.as_deref(), Some("Build failed; check build logs for details"));
    assert!(!drain(&mut rx).contains(&ProgressEvent::Complete));
  }

  #[tokio::test]
  #[traced_test]
  async fn failed_log_fetch_leaves_log_unset() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new().fail_reads());
    let service = Arc::new(
      FakeBuildService::new(operation()).with_polls(vec![OperationState::Done(Some(remote_build(BuildStatus::Timeout)))]),
    );
    let builder = builder(temp.path(), store, service);
    let mut rx = builder.subscribe();

    let err = builder.build().await.unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.status, "TIMEOUT");
    assert!(failure.log.is_none());
    assert!(!drain(&mut rx).contains(&ProgressEvent::Complete));
    assert!(logs_contain("could not fetch log of failed build"));
  }

  #[tokio::test]
  async fn unsupported_config_extension_stops_before_any_call() {
    let temp = source_tree("cloudbuild.js", "module.exports = {}");
    let store = Arc::new(FakeStore::new());
    let service = Arc::new(FakeBuildService::new(operation()));
    let mut builder = builder(temp.path(), store.clone(), service.clone());
    builder.options.config_path = Some(temp.path().join("cloudbuild.js"));

    let err = builder.build().await.unwrap_err();
    assert!(matches!(err, BuildError::Config(ConfigError::UnsupportedExtension { .. })));
    assert!(err.to_string().contains("extension is not supported"));
    assert!(store.calls().is_empty());
    assert!(service.calls().is_empty());
  }

  #[tokio::test]
  async fn missing_config_stops_before_any_call() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::new());
    let service = Arc::new(FakeBuildService::new(operation()));
    let builder = builder(temp.path(), store.clone(), service.clone());

    let err = builder.build().await.unwrap_err();
    assert!(err.to_string().starts_with("Unable to find configuration file"));
    assert!(store.calls().is_empty());
    assert!(service.calls().is_empty());
  }

  #[tokio::test]
  async fn invalid_timeout_stops_before_upload() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new());
    let service = Arc::new(FakeBuildService::new(operation()));
    let mut builder = builder(temp.path(), store.clone(), service.clone());
    builder.options.overrides.timeout = Some("20".to_string());

    let err = builder.build().await.unwrap_err();
    assert!(matches!(
      err,
      BuildError::Override(OverrideError::InvalidTimeout(ref t)) if t == "20"
    ));
    assert!(store.calls().is_empty());
    assert!(service.calls().is_empty());
  }

  #[tokio::test]
  async fn submission_errors_pass_through() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let store = Arc::new(FakeStore::new().with_bucket("el-gato-gcb-staging-bbq"));
    let service = Arc::new(FakeBuildService::new(operation()).fail_submit_with(|| ServiceError::Api {
      status: 403,
      message: "permission denied".to_string(),
    }));
    let builder = builder(temp.path(), store, service.clone());
    let mut rx = builder.subscribe();

    let err = builder.build().await.unwrap_err();
    assert!(matches!(err, BuildError::Service(ServiceError::Api { status: 403, .. })));
    assert_eq!(kinds(&drain(&mut rx)), vec!["UPLOADING", "BUILDING"]);
    assert_eq!(service.poll_count(), 0);
  }

  #[tokio::test]
  async fn builders_do_not_share_events() {
    let temp = source_tree("cloudbuild.yaml", CONFIG);
    let service = Arc::new(
      FakeBuildService::new(operation()).with_polls(vec![OperationState::Done(Some(remote_build(BuildStatus::Success)))]),
    );
    let store = || Arc::new(FakeStore::new().with_object("logs", "log-b-1.txt", "ok"));
    let first = builder(temp.path(), store(), service.clone());
    let second = builder(temp.path(), store(), service);
    let mut first_rx = first.subscribe();
    let mut second_rx = second.subscribe();

    first.build().await.unwrap();
    assert_eq!(drain(&mut first_rx).last(), Some(&ProgressEvent::Complete));
    assert!(drain(&mut second_rx).is_empty());
  }

  #[tokio::test]
  async fn cancel_of_finished_build_returns_it() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(
      FakeBuildService::new(operation())
        .with_build(remote_build(BuildStatus::Success))
        .fail_cancel_with(|| ServiceError::Api {
          status: 400,
          message: "build is not running".to_string(),
        }),
    );
    let builder = builder(temp.path(), Arc::new(FakeStore::new()), service);

    let build = builder.cancel_build("b-1").await.unwrap();
    assert_eq!(build.status, Some(BuildStatus::Success));
  }

  #[tokio::test]
  async fn cancel_rejection_of_running_build_is_an_error() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(
      FakeBuildService::new(operation())
        .with_build(remote_build(BuildStatus::Working))
        .fail_cancel_with(|| ServiceError::Api {
          status: 409,
          message: "conflict".to_string(),
        }),
    );
    let builder = builder(temp.path(), Arc::new(FakeStore::new()), service);

    let err = builder.cancel_build("b-1").await.unwrap_err();
    assert!(matches!(err, BuildError::Service(ServiceError::Api { status: 409, .. })));
  }

  #[tokio::test]
  async fn cancel_running_build() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(FakeBuildService::new(operation()).with_build(remote_build(BuildStatus::Working)));
    let builder = builder(temp.path(), Arc::new(FakeStore::new()), service);
    assert_eq!(
      builder.cancel_build("b-1").await.unwrap().status,
      Some(BuildStatus::Cancelled)
    );
  }

  #[tokio::test]
  async fn admin_operations_use_current_project() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::new().with_object("logs", "log-b-1.txt", "done"));
    let service = Arc::new(FakeBuildService::new(operation()).with_build(remote_build(BuildStatus::Success)));
    let builder = builder(temp.path(), store, service.clone());

    let builds = builder.list_builds(Some("status=\"SUCCESS\""), Some(10)).await.unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builder.get_build("b-1").await.unwrap().id.as_deref(), Some("b-1"));
    assert_eq!(builder.fetch_log("b-1").await.unwrap(), "done");
    assert!(matches!(
      builder.get_build("missing").await,
      Err(BuildError::Service(ServiceError::NotFound(_)))
    ));

    assert!(service.calls().contains(&ServiceCall::List {
      project: "el-gato".to_string(),
      request: ListRequest {
        filter: Some("status=\"SUCCESS\"".to_string()),
        page_size: Some(10),
        page_token: None,
      },
    }));
  }
}
