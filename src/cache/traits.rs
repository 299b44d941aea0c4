//! Core traits and types for the resource cache.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use url::Url;

/// A response as stored in (or served from) a cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  /// HTTP status code
  pub status: u16,
  /// Response headers in the order they were received
  pub headers: Vec<(String, String)>,
  /// Raw response body
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Hex SHA-256 of the body.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&self.body);
    hex::encode(hasher.finalize())
  }
}

/// Network seam used by the cache controller.
///
/// Implementations issue exactly one request per call and never consult the cache.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, url: &Url) -> impl Future<Output = Result<StoredResponse>> + Send;
}

/// Result of handling a fetch, including where the response came from.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub response: StoredResponse,
  pub source: FetchSource,
}

impl FetchResult {
  pub fn from_cache(response: StoredResponse) -> Self {
    Self {
      response,
      source: FetchSource::Cache,
    }
  }

  pub fn from_network(response: StoredResponse) -> Self {
    Self {
      response,
      source: FetchSource::Network,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Served from the active generation's store
  Cache,
  /// Passed through to the network
  Network,
}

impl std::fmt::Display for FetchSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Cache => write!(f, "cache"),
      Self::Network => write!(f, "network"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = StoredResponse::new(
      200,
      vec![("Content-Type".to_string(), "text/css".to_string())],
      b"body{}".to_vec(),
    );
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_success_range() {
    assert!(StoredResponse::new(204, vec![], vec![]).is_success());
    assert!(!StoredResponse::new(304, vec![], vec![]).is_success());
    assert!(!StoredResponse::new(404, vec![], vec![]).is_success());
  }

  #[test]
  fn test_digest_of_empty_body() {
    let response = StoredResponse::new(200, vec![], vec![]);
    assert_eq!(
      response.digest(),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }
}
