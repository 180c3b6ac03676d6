//! In-memory fakes for the storage and build service seams.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::archive::ByteStream;
use crate::events::{ProgressEvent, drain};
use crate::service::{BuildPage, BuildService, ListRequest, Operation, OperationState, ServiceError};
use crate::spec::{Build, BuildSpec, BuildStatus};
use crate::storage::{LifecyclePolicy, ObjectStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
  BucketExists(String),
  CreateBucket {
    project: String,
    bucket: String,
    lifecycle: LifecyclePolicy,
  },
  WriteStream {
    bucket: String,
    object: String,
    content_type: String,
  },
  ReadAll {
    bucket: String,
    object: String,
  },
}

type ErrFn = Box<dyn Fn() -> StoreError + Send + Sync>;
type NamedErrFn = Box<dyn Fn(&str) -> StoreError + Send + Sync>;

/// [`ObjectStore`] that keeps buckets and objects in memory.
#[derive(Default)]
pub struct FakeStore {
  buckets: Mutex<BTreeSet<String>>,
  objects: Mutex<BTreeMap<(String, String), (String, Vec<u8>)>>,
  calls: Mutex<Vec<StoreCall>>,
  exists_error: Option<ErrFn>,
  create_error: Option<NamedErrFn>,
  fail_writes: bool,
  fail_reads: bool,
  observer: Mutex<Option<broadcast::Receiver<ProgressEvent>>>,
  seen_at_create: Mutex<Vec<ProgressEvent>>,
}

impl FakeStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_bucket(self, bucket: &str) -> Self {
    self.buckets.lock().unwrap().insert(bucket.to_string());
    self
  }

  pub fn with_object(self, bucket: &str, object: &str, contents: &str) -> Self {
    self.objects.lock().unwrap().insert(
      (bucket.to_string(), object.to_string()),
      ("text/plain".to_string(), contents.as_bytes().to_vec()),
    );
    self
  }

  pub fn fail_exists_with(mut self, f: impl Fn() -> StoreError + Send + Sync + 'static) -> Self {
    self.exists_error = Some(Box::new(f));
    self
  }

  pub fn fail_create_with(mut self, f: impl Fn(&str) -> StoreError + Send + Sync + 'static) -> Self {
    self.create_error = Some(Box::new(f));
    self
  }

  pub fn fail_writes(mut self) -> Self {
    self.fail_writes = true;
    self
  }

  pub fn fail_reads(mut self) -> Self {
    self.fail_reads = true;
    self
  }

  /// Record which events had been emitted when `create_bucket` runs.
  pub fn observe_events_on_create(&self, rx: broadcast::Receiver<ProgressEvent>) {
    *self.observer.lock().unwrap() = Some(rx);
  }

  pub fn events_seen_at_create(&self) -> Vec<ProgressEvent> {
    self.seen_at_create.lock().unwrap().clone()
  }

  pub fn calls(&self) -> Vec<StoreCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn object(&self, bucket: &str, object: &str) -> Option<(String, Vec<u8>)> {
    self
      .objects
      .lock()
      .unwrap()
      .get(&(bucket.to_string(), object.to_string()))
      .cloned()
  }

  fn record(&self, call: StoreCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl ObjectStore for FakeStore {
  async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
    self.record(StoreCall::BucketExists(bucket.to_string()));
    if let Some(f) = &self.exists_error {
      return Err(f());
    }
    Ok(self.buckets.lock().unwrap().contains(bucket))
  }

  async fn create_bucket(&self, project: &str, bucket: &str, lifecycle: LifecyclePolicy) -> Result<(), StoreError> {
    self.record(StoreCall::CreateBucket {
      project: project.to_string(),
      bucket: bucket.to_string(),
      lifecycle,
    });
    if let Some(rx) = self.observer.lock().unwrap().as_mut() {
      self.seen_at_create.lock().unwrap().extend(drain(rx));
    }
    if let Some(f) = &self.create_error {
      return Err(f(bucket));
    }
    self.buckets.lock().unwrap().insert(bucket.to_string());
    Ok(())
  }

  async fn write_stream(&self, bucket: &str, object: &str, content_type: &str, mut body: ByteStream) -> Result<(), StoreError> {
    self.record(StoreCall::WriteStream {
      bucket: bucket.to_string(),
      object: object.to_string(),
      content_type: content_type.to_string(),
    });
    if self.fail_writes {
      return Err(StoreError::Io(std::io::Error::other("write refused")));
    }
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
      data.extend_from_slice(&chunk?);
    }
    self
      .objects
      .lock()
      .unwrap()
      .insert((bucket.to_string(), object.to_string()), (content_type.to_string(), data));
    Ok(())
  }

  async fn read_all(&self, bucket: &str, object: &str) -> Result<Bytes, StoreError> {
    self.record(StoreCall::ReadAll {
      bucket: bucket.to_string(),
      object: object.to_string(),
    });
    if self.fail_reads {
      return Err(StoreError::Api {
        status: 403,
        message: "read refused".to_string(),
      });
    }
    self
      .object(bucket, object)
      .map(|(_, data)| Bytes::from(data))
      .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{object}")))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
  Submit { project: String, spec: BuildSpec },
  Poll(String),
  List { project: String, request: ListRequest },
  Get { project: String, id: String },
  Cancel { project: String, id: String },
}

type ServiceErrFn = Box<dyn Fn() -> ServiceError + Send + Sync>;

/// [`BuildService`] that replays scripted operation states.
///
/// Polls return the scripted states in order; the last one repeats.
pub struct FakeBuildService {
  operation: Operation,
  polls: Mutex<VecDeque<OperationState>>,
  builds: Mutex<BTreeMap<String, Build>>,
  calls: Mutex<Vec<ServiceCall>>,
  submit_error: Option<ServiceErrFn>,
  poll_error: Option<ServiceErrFn>,
  cancel_error: Option<ServiceErrFn>,
}

impl FakeBuildService {
  /// `operation` is what `submit` returns.
  pub fn new(operation: Operation) -> Self {
    Self {
      operation,
      polls: Mutex::new(VecDeque::from([OperationState::Done(None)])),
      builds: Mutex::new(BTreeMap::new()),
      calls: Mutex::new(Vec::new()),
      submit_error: None,
      poll_error: None,
      cancel_error: None,
    }
  }

  pub fn with_polls(self, states: Vec<OperationState>) -> Self {
    *self.polls.lock().unwrap() = states.into();
    self
  }

  pub fn with_build(self, build: Build) -> Self {
    let id = build.id.clone().unwrap_or_default();
    self.builds.lock().unwrap().insert(id, build);
    self
  }

  pub fn fail_submit_with(mut self, f: impl Fn() -> ServiceError + Send + Sync + 'static) -> Self {
    self.submit_error = Some(Box::new(f));
    self
  }

  pub fn fail_poll_with(mut self, f: impl Fn() -> ServiceError + Send + Sync + 'static) -> Self {
    self.poll_error = Some(Box::new(f));
    self
  }

  pub fn fail_cancel_with(mut self, f: impl Fn() -> ServiceError + Send + Sync + 'static) -> Self {
    self.cancel_error = Some(Box::new(f));
    self
  }

  pub fn calls(&self) -> Vec<ServiceCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn poll_count(&self) -> usize {
    self.calls().iter().filter(|c| matches!(c, ServiceCall::Poll(_))).count()
  }

  fn record(&self, call: ServiceCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl BuildService for FakeBuildService {
  async fn submit(&self, project_id: &str, spec: BuildSpec) -> Result<Operation, ServiceError> {
    self.record(ServiceCall::Submit {
      project: project_id.to_string(),
      spec,
    });
    if let Some(f) = &self.submit_error {
      return Err(f());
    }
    Ok(self.operation.clone())
  }

  async fn poll(&self, name: &str) -> Result<OperationState, ServiceError> {
    self.record(ServiceCall::Poll(name.to_string()));
    if let Some(f) = &self.poll_error {
      return Err(f());
    }
    let mut polls = self.polls.lock().unwrap();
    let state = if polls.len() > 1 { polls.pop_front() } else { polls.front().cloned() };
    state.ok_or_else(|| ServiceError::Decode("no scripted poll state".to_string()))
  }

  async fn list(&self, project_id: &str, request: &ListRequest) -> Result<BuildPage, ServiceError> {
    self.record(ServiceCall::List {
      project: project_id.to_string(),
      request: request.clone(),
    });
    let builds: Vec<Build> = self.builds.lock().unwrap().values().cloned().collect();
    let limit = request.page_size.map(|n| n as usize).unwrap_or(builds.len());
    Ok(BuildPage {
      builds: builds.into_iter().take(limit).collect(),
      next_page_token: None,
    })
  }

  async fn get(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError> {
    self.record(ServiceCall::Get {
      project: project_id.to_string(),
      id: build_id.to_string(),
    });
    self
      .builds
      .lock()
      .unwrap()
      .get(build_id)
      .cloned()
      .ok_or_else(|| ServiceError::NotFound(build_id.to_string()))
  }

  async fn cancel(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError> {
    self.record(ServiceCall::Cancel {
      project: project_id.to_string(),
      id: build_id.to_string(),
    });
    if let Some(f) = &self.cancel_error {
      return Err(f());
    }
    let mut builds = self.builds.lock().unwrap();
    let build = builds
      .get_mut(build_id)
      .ok_or_else(|| ServiceError::NotFound(build_id.to_string()))?;
    build.status = Some(BuildStatus::Cancelled);
    Ok(build.clone())
  }
}
