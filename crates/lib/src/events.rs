//! Build progress notifications.
//!
//! Each [`Builder`](crate::builder::Builder) owns its own [`EventBus`], so two
//! builds in one process never observe each other's events. Delivery is
//! fire-and-forget: emitting with no subscribers is not an error, and a slow
//! subscriber that falls behind the channel capacity loses the oldest events.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered events per subscriber.
pub const EVENT_CAPACITY: usize = 64;

/// A lifecycle transition of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
  /// The staging bucket is about to be created.
  CreatingBucket(String),
  /// The source archive is being uploaded.
  Uploading,
  /// The build has been handed to the build service.
  Building,
  /// The build log has been fetched.
  Log(String),
  /// The build finished successfully and its log is attached.
  Complete,
}

impl ProgressEvent {
  /// Stable upper-case name of the event kind.
  pub fn kind(&self) -> &'static str {
    match self {
      ProgressEvent::CreatingBucket(_) => "CREATING_BUCKET",
      ProgressEvent::Uploading => "UPLOADING",
      ProgressEvent::Building => "BUILDING",
      ProgressEvent::Log(_) => "LOG",
      ProgressEvent::Complete => "COMPLETE",
    }
  }
}

impl fmt::Display for ProgressEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProgressEvent::CreatingBucket(name) => write!(f, "{}({})", self.kind(), name),
      ProgressEvent::Log(text) => write!(f, "{}({} bytes)", self.kind(), text.len()),
      _ => f.write_str(self.kind()),
    }
  }
}

/// Publish/subscribe handle for [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::with_capacity(EVENT_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Register a new listener. Only events emitted after this call are seen.
  pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
    self.tx.subscribe()
  }

  pub fn emit(&self, event: ProgressEvent) {
    debug!(event = %event, "progress");
    // No listeners is fine.
    let _ = self.tx.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

/// Drain every event currently buffered for `rx`.
pub fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
  let mut events = Vec::new();
  loop {
    match rx.try_recv() {
      Ok(event) => events.push(event),
      Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
      Err(_) => break,
    }
  }
  events
}
