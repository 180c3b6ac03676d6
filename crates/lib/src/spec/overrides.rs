//! Command-line overrides applied on top of a loaded build spec.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::{BuildSpec, ExecutionOptions, Source, StorageSource};

static TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[smh]$").expect("static regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverrideError {
  /// The timeout is not a whole number followed by `s`, `m` or `h`.
  #[error("invalid timeout format '{0}': expected a whole number followed by s, m or h (e.g. 20m)")]
  InvalidTimeout(String),
}

/// Values supplied by the caller that win over the loaded config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOverrides {
  /// Image tag for Dockerfile builds.
  pub tag: Option<String>,
  pub substitutions: BTreeMap<String, String>,
  /// Timeout such as `20m`, `1200s` or `1h`.
  pub timeout: Option<String>,
  pub machine_type: Option<String>,
}

impl BuildOverrides {
  /// Apply the overrides to `spec`.
  ///
  /// Validation happens before any field is touched, so a rejected override
  /// leaves `spec` unchanged.
  pub fn apply(&self, spec: &mut BuildSpec) -> Result<(), OverrideError> {
    let timeout = self.timeout.as_deref().map(parse_timeout).transpose()?;

    spec
      .substitutions
      .extend(self.substitutions.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(secs) = timeout {
      spec.timeout = Some(format!("{secs}s"));
    }

    if let Some(machine_type) = &self.machine_type {
      spec
        .options
        .get_or_insert_with(ExecutionOptions::default)
        .machine_type = Some(machine_type.clone());
    }

    Ok(())
  }
}

/// Parse a timeout like `20m` into seconds.
pub fn parse_timeout(value: &str) -> Result<u64, OverrideError> {
  let invalid = || OverrideError::InvalidTimeout(value.to_string());
  if !TIMEOUT_RE.is_match(value) {
    return Err(invalid());
  }

  let (digits, unit) = value.split_at(value.len() - 1);
  let amount: u64 = digits.parse().map_err(|_| invalid())?;
  let multiplier = match unit {
    "s" => 1,
    "m" => 60,
    "h" => 3600,
    _ => return Err(invalid()),
  };
  amount.checked_mul(multiplier).ok_or_else(invalid)
}

/// Point `spec` at an uploaded source archive.
pub fn attach_source(spec: &mut BuildSpec, bucket: &str, object: &str) {
  spec.source = Some(Source {
    storage_source: StorageSource {
      bucket: bucket.to_string(),
      object: object.to_string(),
    },
  });
}
