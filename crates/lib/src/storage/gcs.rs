//! Cloud Storage JSON API client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::json;
use tracing::debug;

use crate::archive::ByteStream;
use crate::auth::IdentityProvider;
use crate::consts::{APP_NAME, CLOUD_PLATFORM_SCOPE};
use crate::util::http::{USER_AGENT_VALUE, api_error_message, join_segments, parse_endpoint};

use super::{LifecyclePolicy, ObjectStore, StoreError};

/// [`ObjectStore`] backed by Cloud Storage.
#[derive(Clone)]
pub struct GcsClient {
  http: reqwest::Client,
  endpoint: Url,
  identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for GcsClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GcsClient").field("endpoint", &self.endpoint.as_str()).finish()
  }
}

impl GcsClient {
  /// Create a client for `endpoint`, e.g. `https://storage.googleapis.com`.
  pub fn new(endpoint: &str, identity: Arc<dyn IdentityProvider>) -> Result<Self, StoreError> {
    let endpoint = parse_endpoint(endpoint).ok_or_else(|| StoreError::InvalidEndpoint(endpoint.to_string()))?;
    Ok(Self {
      http: reqwest::Client::new(),
      endpoint,
      identity,
    })
  }

  fn url(&self, segments: &[&str]) -> Url {
    join_segments(&self.endpoint, segments.iter().copied())
  }

  async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StoreError> {
    debug!(%method, url = %url, "storage request");
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

/// Map a non-success response onto a [`StoreError`].
async fn check(response: Response, subject: &str) -> Result<Response, StoreError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  match status {
    StatusCode::NOT_FOUND => Err(StoreError::NotFound(subject.to_string())),
    StatusCode::CONFLICT => Err(StoreError::AlreadyExists(subject.to_string())),
    _ => {
      let body = response.text().await.unwrap_or_default();
      Err(StoreError::Api {
        status: status.as_u16(),
        message: api_error_message(&body),
      })
    }
  }
}

#[async_trait]
impl ObjectStore for GcsClient {
  async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
    let url = self.url(&["storage", "v1", "b", bucket]);
    let response = self.request(Method::GET, url).await?.send().await?;
    match check(response, bucket).await {
      Ok(_) => Ok(true),
      Err(StoreError::NotFound(_)) => Ok(false),
      Err(e) => Err(e),
    }
  }

  async fn create_bucket(&self, project: &str, bucket: &str, lifecycle: LifecyclePolicy) -> Result<(), StoreError> {
    let mut url = self.url(&["storage", "v1", "b"]);
    url.query_pairs_mut().append_pair("project", project);

    let body = json!({
      "name": bucket,
      "labels": { "created-by": APP_NAME },
      "lifecycle": {
        "rule": [{
          "action": { "type": "Delete" },
          "condition": { "age": lifecycle.delete_after_days },
        }],
      },
    });

    let response = self.request(Method::POST, url).await?.json(&body).send().await?;
    check(response, bucket).await?;
    Ok(())
  }

  async fn write_stream(&self, bucket: &str, object: &str, content_type: &str, body: ByteStream) -> Result<(), StoreError> {
    let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"]);
    url
      .query_pairs_mut()
      .append_pair("uploadType", "media")
      .append_pair("name", object);

    let response = self
      .request(Method::POST, url)
      .await?
      .header(CONTENT_TYPE, content_type)
      .body(Body::wrap_stream(body))
      .send()
      .await?;
    check(response, object).await?;
    Ok(())
  }

  async fn read_all(&self, bucket: &str, object: &str) -> Result<Bytes, StoreError> {
    let mut url = self.url(&["storage", "v1", "b", bucket, "o", object]);
    url.query_pairs_mut().append_pair("alt", "media");

    let response = self.request(Method::GET, url).await?.send().await?;
    let response = check(response, &format!("{bucket}/{object}")).await?;
    Ok(response.bytes().await?)
  }
}
