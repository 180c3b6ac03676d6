//! Build config discovery and parsing.
//!
//! Without an explicit path, the source root is searched in order for
//! `cloudbuild.yaml`, `cloudbuild.json` and `Dockerfile`. A Dockerfile is
//! turned into a one-step docker build that tags and pushes a single image.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::DOCKER_BUILDER_IMAGE;

use super::types::{BuildSpec, BuildStep};

/// Candidate config files, in search order.
pub const CONFIG_CANDIDATES: [&str; 3] = ["cloudbuild.yaml", "cloudbuild.json", "Dockerfile"];

const DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error(
    "Unable to find configuration file. Please provide a cloudbuild.yaml, cloudbuild.json, or Dockerfile in the source directory '{dir}'."
  )]
  NotFound { dir: PathBuf },

  #[error("The {ext} extension is not supported.  Please pass yaml or json.")]
  UnsupportedExtension { ext: String },

  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse YAML config '{path}': {source}")]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("failed to parse JSON config '{path}': {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("cannot derive an image name from source path '{path}'; pass a tag")]
  MissingTag { path: PathBuf },
}

/// Inputs to [`load_config`].
#[derive(Debug, Clone)]
pub struct ConfigRequest<'a> {
  pub source_path: &'a Path,
  pub config_path: Option<&'a Path>,
  pub project_id: &'a str,
  pub tag: Option<&'a str>,
  /// Registry host used for Dockerfile images, e.g. `gcr.io`.
  pub registry: &'a str,
}

/// Find the config file to use, without reading it.
pub fn locate_config(source_path: &Path, config_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
  if let Some(explicit) = config_path {
    return Ok(explicit.to_path_buf());
  }

  CONFIG_CANDIDATES
    .iter()
    .map(|name| source_path.join(name))
    .find(|candidate| candidate.is_file())
    .ok_or_else(|| ConfigError::NotFound {
      dir: source_path.to_path_buf(),
    })
}

/// Load the build spec for a source tree.
pub fn load_config(request: &ConfigRequest<'_>) -> Result<BuildSpec, ConfigError> {
  let path = locate_config(request.source_path, request.config_path)?;
  info!(path = %path.display(), "using build config");

  if path.file_name().is_some_and(|name| name == DOCKERFILE) {
    return dockerfile_spec(request);
  }

  let ext = path
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default();
  if !matches!(ext.as_str(), ".yaml" | ".yml" | ".json") {
    return Err(ConfigError::UnsupportedExtension { ext });
  }

  let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
    path: path.clone(),
    source,
  })?;

  let spec = if ext == ".json" {
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json { path, source })?
  } else {
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml { path, source })?
  };
  Ok(spec)
}

fn dockerfile_spec(request: &ConfigRequest<'_>) -> Result<BuildSpec, ConfigError> {
  let tag = match request.tag {
    Some(tag) => tag.to_string(),
    None => directory_name(request.source_path).ok_or_else(|| ConfigError::MissingTag {
      path: request.source_path.to_path_buf(),
    })?,
  };

  let image = format!("{}/{}/{}", request.registry, request.project_id, tag);
  debug!(image = %image, "synthesized docker build");

  Ok(BuildSpec {
    steps: vec![BuildStep {
      name: DOCKER_BUILDER_IMAGE.to_string(),
      args: vec!["build".to_string(), "-t".to_string(), image.clone(), ".".to_string()],
      ..Default::default()
    }],
    images: vec![image],
    ..Default::default()
  })
}

fn directory_name(path: &Path) -> Option<String> {
  let resolved = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
  resolved.file_name().map(|name| name.to_string_lossy().into_owned())
}
