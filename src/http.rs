//! Request and response model for the cache gateway.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How a request reached the gateway.
///
/// Navigation requests are full page loads; they are eligible for the
/// configured fallback document when offline. Everything else is a
/// sub-resource fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  Resource,
  Navigation,
}

/// An outbound request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl ProxyRequest {
  pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
    Self { method, url, mode }
  }

  /// A plain GET for a sub-resource.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::Resource)
  }

  /// A GET representing a full page load.
  pub fn navigation(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::Navigation)
  }

  /// Whether this request is an idempotent read.
  ///
  /// Only reads are ever intercepted or cached; mutating methods pass
  /// straight through to the network.
  pub fn is_read(&self) -> bool {
    self.method == Method::GET || self.method == Method::HEAD
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigation
  }

  /// Normalized identity of this request: method + URL, hashed for a
  /// stable, fixed-length store key. URL parsing already normalizes the
  /// textual form (default ports dropped, paths canonicalized), so two
  /// spellings of the same resource share an identity.
  pub fn identity(&self) -> String {
    let input = format!("{} {}", self.method, self.url);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A fully-read response snapshot, the unit stored in the cache.
///
/// Only responses whose body was read to completion are ever constructed;
/// a fetch that cannot complete fails instead of producing a partial one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// Look up a header value by case-insensitive name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
