//! Staging bucket management.
//!
//! Sources are uploaded to a per-project scratch bucket named
//! `{project}-gcb-staging-bbq`. The bucket is created on first use with a
//! lifecycle rule that deletes objects after a day, so nothing uploaded here
//! is kept around and partial uploads are never cleaned up explicitly.
//!
//! Object names are the upload time in milliseconds. Two uploads for the same
//! project in the same millisecond would collide; for a single-operator CLI
//! that is accepted rather than guarded against.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveError, collect_files, spawn_archive};
use crate::consts::{ARCHIVE_CONTENT_TYPE, STAGING_BUCKET_SUFFIX, STAGING_RETENTION_DAYS};
use crate::events::{EventBus, ProgressEvent};
use crate::ignore::IgnoreRules;

use super::{LifecyclePolicy, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum StagingError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),
}

/// Location of an uploaded source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingReference {
  pub bucket: String,
  pub object: String,
}

pub fn staging_bucket_name(project_id: &str) -> String {
  format!("{project_id}{STAGING_BUCKET_SUFFIX}")
}

pub fn staging_object_name(now: SystemTime) -> String {
  let millis = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
  format!("{millis}.tar.gz")
}

/// Staging bucket operations for one build.
#[derive(Clone)]
pub struct StagingStore {
  store: Arc<dyn ObjectStore>,
  events: EventBus,
}

impl StagingStore {
  pub fn new(store: Arc<dyn ObjectStore>, events: EventBus) -> Self {
    Self { store, events }
  }

  /// Make sure the project's staging bucket exists and return its name.
  ///
  /// Losing a creation race to another invocation counts as success.
  pub async fn ensure_container(&self, project_id: &str) -> Result<String, StoreError> {
    let bucket = staging_bucket_name(project_id);

    if self.store.bucket_exists(&bucket).await? {
      debug!(bucket = %bucket, "staging bucket exists");
      return Ok(bucket);
    }

    self.events.emit(ProgressEvent::CreatingBucket(bucket.clone()));
    let lifecycle = LifecyclePolicy {
      delete_after_days: STAGING_RETENTION_DAYS,
    };
    match self.store.create_bucket(project_id, &bucket, lifecycle).await {
      Ok(()) => info!(bucket = %bucket, "created staging bucket"),
      Err(StoreError::AlreadyExists(_)) => debug!(bucket = %bucket, "staging bucket created concurrently"),
      Err(e) => return Err(e),
    }
    Ok(bucket)
  }

  /// Package `source_root` and stream it into a new object in `bucket`.
  pub async fn upload(
    &self,
    bucket: &str,
    source_root: &Path,
    rules: IgnoreRules,
  ) -> Result<StagingReference, StagingError> {
    let root: PathBuf = source_root.to_path_buf();
    let files = {
      let root = root.clone();
      tokio::task::spawn_blocking(move || collect_files(&root, &rules))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))??
    };

    let object = staging_object_name(SystemTime::now());
    info!(bucket = %bucket, object = %object, files = files.len(), "uploading sources");

    let (body, pack) = spawn_archive(root, files);
    self
      .store
      .write_stream(bucket, &object, ARCHIVE_CONTENT_TYPE, body)
      .await?;
    let summary = pack.finish().await?;
    debug!(files = summary.files, "upload complete");

    Ok(StagingReference {
      bucket: bucket.to_string(),
      object,
    })
  }
}
