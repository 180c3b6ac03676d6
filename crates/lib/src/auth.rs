//! Project identity and access tokens.
//!
//! [`GcloudIdentity`] follows the resolution order of the Cloud SDK:
//! environment variables first, then the `gcloud` CLI. Values are resolved at
//! most once and cached for the lifetime of the provider.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

pub const PROJECT_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];
pub const TOKEN_ENV_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Clone, Error)]
pub enum AuthError {
  #[error("no project configured: set GOOGLE_CLOUD_PROJECT or run `gcloud config set project`")]
  NoProject,

  #[error("failed to obtain access token: {0}")]
  Token(String),

  #[error("failed to run gcloud: {0}")]
  Gcloud(String),
}

/// Source of the authenticated project and credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
  async fn project_id(&self) -> Result<String, AuthError>;

  /// Bearer token valid for the given OAuth scopes.
  async fn access_token(&self, scopes: &[&str]) -> Result<String, AuthError>;
}

/// Fixed project and token.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
  project_id: String,
  token: String,
}

impl StaticIdentity {
  pub fn new(project_id: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      project_id: project_id.into(),
      token: token.into(),
    }
  }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
  async fn project_id(&self) -> Result<String, AuthError> {
    Ok(self.project_id.clone())
  }

  async fn access_token(&self, _scopes: &[&str]) -> Result<String, AuthError> {
    Ok(self.token.clone())
  }
}

/// Identity from the environment or the local `gcloud` installation.
#[derive(Debug, Default)]
pub struct GcloudIdentity {
  project: OnceCell<String>,
  token: OnceCell<String>,
}

impl GcloudIdentity {
  pub fn new() -> Self {
    Self::default()
  }
}

fn non_empty_env(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Project id from the environment, if any.
pub fn project_from_env() -> Option<String> {
  PROJECT_ENV_VARS.iter().find_map(|name| non_empty_env(name))
}

async fn gcloud(args: &[&str]) -> Result<String, AuthError> {
  debug!(?args, "running gcloud");
  let output = Command::new("gcloud")
    .args(args)
    .output()
    .await
    .map_err(|e| AuthError::Gcloud(e.to_string()))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(AuthError::Gcloud(stderr.trim().to_string()));
  }
  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl IdentityProvider for GcloudIdentity {
  async fn project_id(&self) -> Result<String, AuthError> {
    self
      .project
      .get_or_try_init(|| async {
        if let Some(project) = project_from_env() {
          return Ok(project);
        }
        let project = gcloud(&["config", "get-value", "project"]).await?;
        if project.is_empty() || project == "(unset)" {
          return Err(AuthError::NoProject);
        }
        Ok(project)
      })
      .await
      .cloned()
  }

  async fn access_token(&self, scopes: &[&str]) -> Result<String, AuthError> {
    self
      .token
      .get_or_try_init(|| async {
        if let Some(token) = non_empty_env(TOKEN_ENV_VAR) {
          return Ok(token);
        }
        debug!(?scopes, "requesting access token from gcloud");
        let token = gcloud(&["auth", "print-access-token"])
          .await
          .map_err(|e| AuthError::Token(e.to_string()))?;
        if token.is_empty() {
          return Err(AuthError::Token("gcloud returned an empty token".to_string()));
        }
        Ok(token)
      })
      .await
      .cloned()
  }
}
