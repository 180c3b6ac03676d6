//! Build log retrieval.
//!
//! The build service writes the complete log of a build to
//! `{logsBucket}/log-{id}.txt` once the build finishes. Logs are fetched as a
//! single object after the build is terminal; there is no live tail.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::consts::GCS_SCHEME;
use crate::events::{EventBus, ProgressEvent};
use crate::spec::Build;
use crate::storage::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum LogError {
  #[error("build {build_id} has no log location")]
  MissingLocation { build_id: String },

  #[error("build has no id")]
  MissingId,

  #[error("failed to fetch build log: {0}")]
  Store(#[from] StoreError),
}

/// Split a `gs://bucket[/prefix]` location into bucket and object prefix.
pub fn parse_log_location(location: &str) -> Option<(String, Option<String>)> {
  let bare = location.strip_prefix(GCS_SCHEME).unwrap_or(location);
  let bare = bare.trim_matches('/');
  let (bucket, prefix) = match bare.split_once('/') {
    Some((bucket, prefix)) => (bucket, Some(prefix.trim_end_matches('/').to_string())),
    None => (bare, None),
  };
  if bucket.is_empty() {
    return None;
  }
  Some((bucket.to_string(), prefix.filter(|p| !p.is_empty())))
}

pub fn log_object_name(build_id: &str) -> String {
  format!("log-{build_id}.txt")
}

/// Fetches build logs and announces them on the event bus.
#[derive(Clone)]
pub struct LogRetriever {
  store: Arc<dyn ObjectStore>,
  events: EventBus,
}

impl LogRetriever {
  pub fn new(store: Arc<dyn ObjectStore>, events: EventBus) -> Self {
    Self { store, events }
  }

  /// Download the full log of `build_id` from `location` and emit it as a
  /// `LOG` event.
  pub async fn fetch(&self, location: Option<&str>, build_id: &str) -> Result<String, LogError> {
    let missing = || LogError::MissingLocation {
      build_id: build_id.to_string(),
    };
    let (bucket, prefix) = location.and_then(parse_log_location).ok_or_else(missing)?;
    let object = match prefix {
      Some(prefix) => format!("{prefix}/{}", log_object_name(build_id)),
      None => log_object_name(build_id),
    };

    debug!(bucket = %bucket, object = %object, "fetching build log");
    let bytes = self.store.read_all(&bucket, &object).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    self.events.emit(ProgressEvent::Log(text.clone()));
    Ok(text)
  }

  /// Fetch the log of `build` from the location it reports.
  pub async fn fetch_build_log(&self, build: &Build) -> Result<String, LogError> {
    let id = build.id.as_deref().ok_or(LogError::MissingId)?;
    self.fetch(build.logs_bucket.as_deref(), id).await
  }
}
