//! Helpers shared by the REST clients.

use reqwest::Url;

/// User agent sent with every API request.
pub const USER_AGENT_VALUE: &str = concat!("gcbuild/", env!("CARGO_PKG_VERSION"));

/// Parse a base URL that path segments can be appended to.
pub fn parse_endpoint(endpoint: &str) -> Option<Url> {
  Url::parse(endpoint).ok().filter(|url| !url.cannot_be_a_base())
}

/// Append `segments` to `base`, percent-encoding each one.
pub fn join_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Url {
  let mut url = base.clone();
  if let Ok(mut path) = url.path_segments_mut() {
    path.pop_if_empty().extend(segments);
  }
  url
}

/// Extract `error.message` from a Google API error body, falling back to the raw text.
pub fn api_error_message(body: &str) -> String {
  serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
    .unwrap_or_else(|| body.trim().to_string())
}
