//! Cloud Build v1 REST client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::auth::IdentityProvider;
use crate::consts::CLOUD_PLATFORM_SCOPE;
use crate::spec::{Build, BuildSpec};
use crate::util::http::{USER_AGENT_VALUE, api_error_message, join_segments, parse_endpoint};

use super::{BuildPage, BuildService, ListRequest, Operation, OperationState, ServiceError};

/// [`BuildService`] backed by the Cloud Build API.
#[derive(Clone)]
pub struct CloudBuildClient {
  http: reqwest::Client,
  endpoint: Url,
  identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for CloudBuildClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CloudBuildClient")
      .field("endpoint", &self.endpoint.as_str())
      .finish()
  }
}

impl CloudBuildClient {
  /// Create a client for `endpoint`, e.g. `https://cloudbuild.googleapis.com`.
  pub fn new(endpoint: &str, identity: Arc<dyn IdentityProvider>) -> Result<Self, ServiceError> {
    let endpoint = parse_endpoint(endpoint).ok_or_else(|| ServiceError::InvalidEndpoint(endpoint.to_string()))?;
    Ok(Self {
      http: reqwest::Client::new(),
      endpoint,
      identity,
    })
  }

  fn builds_url(&self, project_id: &str, rest: &[&str]) -> Url {
    let segments = ["v1", "projects", project_id, "builds"]
      .into_iter()
      .chain(rest.iter().copied());
    join_segments(&self.endpoint, segments)
  }

  async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, ServiceError> {
    debug!(%method, url = %url, "build service request");
    let token = self.identity.access_token(&[CLOUD_PLATFORM_SCOPE]).await?;
    Ok(
      self
        .http
        .request(method, url)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(USER_AGENT, USER_AGENT_VALUE),
    )
  }
}

async fn decode<T: DeserializeOwned>(response: Response, subject: &str) -> Result<T, ServiceError> {
  let status = response.status();
  if status == StatusCode::NOT_FOUND {
    return Err(ServiceError::NotFound(subject.to_string()));
  }
  let body = response.text().await?;
  if !status.is_success() {
    return Err(ServiceError::Api {
      status: status.as_u16(),
      message: api_error_message(&body),
    });
  }
  serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))
}

#[async_trait]
impl BuildService for CloudBuildClient {
  async fn submit(&self, project_id: &str, spec: BuildSpec) -> Result<Operation, ServiceError> {
    let url = self.builds_url(project_id, &[]);
    let response = self.request(Method::POST, url).await?.json(&spec).send().await?;
    let operation: Operation = decode(response, project_id).await?;
    info!(operation = %operation.name, "build submitted");
    Ok(operation)
  }

  async fn poll(&self, name: &str) -> Result<OperationState, ServiceError> {
    let segments = std::iter::once("v1").chain(name.split('/').filter(|s| !s.is_empty()));
    let url = join_segments(&self.endpoint, segments);
    let response = self.request(Method::GET, url).await?.send().await?;
    let operation: Operation = decode(response, name).await?;
    Ok(operation.state())
  }

  async fn list(&self, project_id: &str, request: &ListRequest) -> Result<BuildPage, ServiceError> {
    let mut url = self.builds_url(project_id, &[]);
    {
      let mut query = url.query_pairs_mut();
      if let Some(filter) = &request.filter {
        query.append_pair("filter", filter);
      }
      if let Some(size) = request.page_size {
        query.append_pair("pageSize", &size.to_string());
      }
      if let Some(token) = &request.page_token {
        query.append_pair("pageToken", token);
      }
    }
    let response = self.request(Method::GET, url).await?.send().await?;
    decode(response, project_id).await
  }

  async fn get(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError> {
    let url = self.builds_url(project_id, &[build_id]);
    let response = self.request(Method::GET, url).await?.send().await?;
    decode(response, build_id).await
  }

  async fn cancel(&self, project_id: &str, build_id: &str) -> Result<Build, ServiceError> {
    let url = self.builds_url(project_id, &[&format!("{build_id}:cancel")]);
    let response = self
      .request(Method::POST, url)
      .await?
      .json(&serde_json::json!({ "projectId": project_id, "id": build_id }))
      .send()
      .await?;
    decode(response, build_id).await
  }
}
