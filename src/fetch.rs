//! Network edge: issuing requests and collecting complete responses.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{ProxyRequest, StoredResponse};

/// Something that can perform a network fetch.
///
/// Implementations must read the body to completion: a response that cannot
/// be fully read is a failed fetch, not a partial success.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &ProxyRequest) -> Result<StoredResponse>;
}

/// Reqwest-backed fetcher.
///
/// Deliberately carries no overall timeout: a request that never resolves
/// stays pending, and the next request for the same resource is the retry.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &ProxyRequest) -> Result<StoredResponse> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();

    // Header values that are not valid UTF-8 are dropped rather than
    // failing the whole response.
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(StoredResponse {
      status,
      headers,
      body,
    })
  }
}
