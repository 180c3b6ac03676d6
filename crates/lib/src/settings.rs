//! Service endpoints and polling cadence.
//!
//! Every value has a default and can be overridden from the environment:
//!
//! | Variable                  | Default                             |
//! |---------------------------|-------------------------------------|
//! | `GCB_STORAGE_ENDPOINT`    | `https://storage.googleapis.com`    |
//! | `GCB_CLOUDBUILD_ENDPOINT` | `https://cloudbuild.googleapis.com` |
//! | `GCB_POLL_INTERVAL`       | `3s`                                |
//! | `GCB_REGISTRY`            | `gcr.io`                            |

use std::time::Duration;

use thiserror::Error;

use crate::consts::{DEFAULT_CLOUDBUILD_ENDPOINT, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REGISTRY, DEFAULT_STORAGE_ENDPOINT};

pub const STORAGE_ENDPOINT_ENV: &str = "GCB_STORAGE_ENDPOINT";
pub const CLOUDBUILD_ENDPOINT_ENV: &str = "GCB_CLOUDBUILD_ENDPOINT";
pub const POLL_INTERVAL_ENV: &str = "GCB_POLL_INTERVAL";
pub const REGISTRY_ENV: &str = "GCB_REGISTRY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
  #[error("invalid {name} value '{value}': {reason}")]
  Invalid {
    name: &'static str,
    value: String,
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
  pub storage_endpoint: String,
  pub cloudbuild_endpoint: String,
  pub poll_interval: Duration,
  pub registry: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
      cloudbuild_endpoint: DEFAULT_CLOUDBUILD_ENDPOINT.to_string(),
      poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
      registry: DEFAULT_REGISTRY.to_string(),
    }
  }
}

fn env_value(name: &str) -> Option<String> {
  std::env::var(name)
    .ok()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

impl Settings {
  /// Defaults overlaid with any `GCB_*` environment variables.
  pub fn from_env() -> Result<Self, SettingsError> {
    let mut settings = Self::default();
    if let Some(endpoint) = env_value(STORAGE_ENDPOINT_ENV) {
      settings.storage_endpoint = endpoint;
    }
    if let Some(endpoint) = env_value(CLOUDBUILD_ENDPOINT_ENV) {
      settings.cloudbuild_endpoint = endpoint;
    }
    if let Some(registry) = env_value(REGISTRY_ENV) {
      settings.registry = registry;
    }
    if let Some(raw) = env_value(POLL_INTERVAL_ENV) {
      let interval = humantime::parse_duration(&raw).map_err(|e| SettingsError::Invalid {
        name: POLL_INTERVAL_ENV,
        value: raw.clone(),
        reason: e.to_string(),
      })?;
      if interval.is_zero() {
        return Err(SettingsError::Invalid {
          name: POLL_INTERVAL_ENV,
          value: raw,
          reason: "must be greater than zero".to_string(),
        });
      }
      settings.poll_interval = interval;
    }
    Ok(settings)
  }
}
