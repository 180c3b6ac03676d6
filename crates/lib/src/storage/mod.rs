//! Object storage.
//!
//! [`ObjectStore`] is the contract the build engine needs from a blob store.
//! [`gcs::GcsClient`] implements it against the Cloud Storage JSON API and
//! [`staging`] builds the staging-bucket workflow on top of it.

pub mod gcs;
pub mod staging;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::archive::ByteStream;
use crate::auth::AuthError;

pub use gcs::GcsClient;
pub use staging::{StagingReference, StagingStore, staging_bucket_name, staging_object_name};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("invalid storage endpoint '{0}'")]
  InvalidEndpoint(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("authentication failed: {0}")]
  Auth(#[from] AuthError),

  #[error("storage request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("storage API error ({status}): {message}")]
  Api { status: u16, message: String },

  /// The upload body could not be produced or sent.
  #[error("upload stream failed: {0}")]
  Io(#[from] std::io::Error),
}

/// Object lifecycle configuration applied to a new bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
  /// Delete objects once they are this many days old.
  pub delete_after_days: u32,
}

/// Blob store operations used by the build engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// Whether `bucket` exists. A missing bucket is `Ok(false)`.
  async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

  /// Create `bucket` in `project`. Fails with [`StoreError::AlreadyExists`]
  /// when someone else created it first.
  async fn create_bucket(&self, project: &str, bucket: &str, lifecycle: LifecyclePolicy) -> Result<(), StoreError>;

  /// Stream `body` into a new object.
  async fn write_stream(&self, bucket: &str, object: &str, content_type: &str, body: ByteStream) -> Result<(), StoreError>;

  /// Download an entire object.
  async fn read_all(&self, bucket: &str, object: &str) -> Result<Bytes, StoreError>;
}
