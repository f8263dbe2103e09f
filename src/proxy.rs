//! The offline cache proxy: lifecycle handling and the
//! stale-while-revalidate request path.
//!
//! The proxy is driven by three external signals. Install bulk-populates a
//! fresh generation from the precache manifest, activate deletes every other
//! generation, and each intercepted read request is answered from cache when
//! possible while a detached network refresh keeps the entry warm. Mutating
//! requests bypass the cache entirely.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::fetch::Fetch;
use crate::http::{ProxyRequest, RequestMode, StoredResponse};

/// Long-lived proxy service; one instance per origin.
pub struct CacheProxy<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  origin: Url,
  /// Tag of the current generation. Everything else is stale.
  generation: String,
  manifest: Vec<String>,
  /// Precomputed request for the offline navigation fallback document.
  fallback: ProxyRequest,
}

impl<S, F> CacheProxy<S, F>
where
  S: CacheStore + 'static,
  F: Fetch + 'static,
{
  pub fn new(store: Arc<S>, fetcher: Arc<F>, config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin URL {}: {}", config.origin, e))?;

    let fallback_url = origin
      .join(&config.fallback)
      .map_err(|e| eyre!("Invalid fallback path {}: {}", config.fallback, e))?;

    Ok(Self {
      store,
      fetcher,
      origin,
      generation: config.cache.name.clone(),
      manifest: config.precache.clone(),
      fallback: ProxyRequest::get(fallback_url),
    })
  }

  /// Tag of the generation this proxy reads from and writes to.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Build a GET request for `path` resolved against the origin.
  pub fn request_for(&self, path: &str, mode: RequestMode) -> Result<ProxyRequest> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;

    Ok(ProxyRequest::new(reqwest::Method::GET, url, mode))
  }

  /// Install: populate the current generation from the precache manifest.
  ///
  /// Fetches run concurrently. A single failure fails the whole install;
  /// re-running it is the recovery path.
  pub async fn install(&self) -> Result<()> {
    try_join_all(self.manifest.iter().map(|path| self.precache_one(path))).await?;

    info!(
      generation = %self.generation,
      paths = self.manifest.len(),
      "precache complete"
    );
    Ok(())
  }

  async fn precache_one(&self, path: &str) -> Result<()> {
    let request = self.request_for(path, RequestMode::Resource)?;
    let response = self.fetcher.fetch(&request).await?;
    self
      .store
      .put(&self.generation, &request.identity(), response)
      .await?;

    debug!(%path, "precached");
    Ok(())
  }

  /// Activate: delete every generation other than the current one.
  ///
  /// This is the only point at which cache data is ever removed.
  pub async fn activate(&self) -> Result<()> {
    for tag in self.store.list_generations().await? {
      if tag != self.generation {
        self.store.delete(&tag).await?;
        info!(generation = %tag, "removed stale generation");
      }
    }
    Ok(())
  }

  /// Synchronous interception decision: read requests only.
  pub fn intercepts(&self, request: &ProxyRequest) -> bool {
    request.is_read()
  }

  /// Answer one request.
  ///
  /// Mutating requests go straight to the network and never touch the
  /// cache. For reads the policy is stale-while-revalidate: the network
  /// fetch starts immediately, but a cached entry, when present, is
  /// returned without waiting for it and the fetch only refreshes storage.
  /// On a miss the caller gets the network result, falling back to the
  /// stored navigation fallback document when the network is down.
  pub async fn respond(&self, request: ProxyRequest) -> Result<StoredResponse> {
    if !self.intercepts(&request) {
      return self.fetcher.fetch(&request).await;
    }

    let identity = request.identity();
    let refresh = self.spawn_refresh(request.clone(), identity.clone());

    let cached = match self.store.get(&self.generation, &identity).await {
      Ok(entry) => entry,
      Err(error) => {
        // A broken store must not make a reachable origin unreachable;
        // treat the lookup as a miss.
        warn!(url = %request.url, "cache lookup failed: {error:#}");
        None
      }
    };

    if let Some(entry) = cached {
      debug!(
        url = %request.url,
        stored_at = %entry.stored_at,
        "serving cached copy, refresh continues in background"
      );
      // Dropping the handle detaches the refresh; its outcome only
      // matters for the next request.
      drop(refresh);
      return Ok(entry.response);
    }

    match refresh.await {
      Ok(Ok(fresh)) => Ok(fresh),
      Ok(Err(network_error)) => {
        if request.is_navigation() {
          if let Ok(Some(entry)) = self
            .store
            .get(&self.generation, &self.fallback.identity())
            .await
          {
            info!(url = %request.url, "offline, serving navigation fallback");
            return Ok(entry.response);
          }
        }
        Err(network_error)
      }
      Err(join_error) => Err(eyre!("Refresh task failed: {}", join_error)),
    }
  }

  /// Start the network fetch for `request` with its cache-update side
  /// effect. The entry is overwritten on success in completion order
  /// (last write wins); a store failure never invalidates the response.
  fn spawn_refresh(
    &self,
    request: ProxyRequest,
    identity: String,
  ) -> JoinHandle<Result<StoredResponse>> {
    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);
    let generation = self.generation.clone();

    tokio::spawn(async move {
      let fresh = match fetcher.fetch(&request).await {
        Ok(fresh) => fresh,
        Err(error) => {
          debug!(url = %request.url, "network fetch failed: {error:#}");
          return Err(error);
        }
      };

      if let Err(error) = store.put(&generation, &identity, fresh.clone()).await {
        warn!(url = %request.url, "cache write failed: {error:#}");
      }

      Ok(fresh)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CachedEntry, MemoryStore};
  use crate::config::CacheConfig;
  use async_trait::async_trait;
  use reqwest::Method;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;
  use tokio::time::timeout;

  use crate::http::RequestMode;

  /// Programmable fake network: routes keyed by full URL.
  struct FakeFetcher {
    routes: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
  }

  impl FakeFetcher {
    fn new() -> Self {
      Self {
        routes: Mutex::new(HashMap::new()),
        offline: AtomicBool::new(false),
        delay: Mutex::new(None),
        calls: AtomicU32::new(0),
      }
    }

    fn serve(&self, url: &str, body: &str) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), body.to_string());
    }

    fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
      *self.delay.lock().unwrap() = Some(delay);
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetch for FakeFetcher {
    async fn fetch(&self, request: &ProxyRequest) -> Result<StoredResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }

      let body = self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("no route for {}", request.url))?;

      Ok(StoredResponse {
        status: 200,
        headers: vec![("content-type".to_string(), "text/html".to_string())],
        body: body.into_bytes(),
      })
    }
  }

  /// Store whose reads and writes always fail.
  struct FailingStore;

  #[async_trait]
  impl CacheStore for FailingStore {
    async fn get(&self, _generation: &str, _identity: &str) -> Result<Option<CachedEntry>> {
      Err(eyre!("storage unavailable"))
    }

    async fn put(
      &self,
      _generation: &str,
      _identity: &str,
      _response: StoredResponse,
    ) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    async fn delete(&self, _generation: &str) -> Result<()> {
      Err(eyre!("storage unavailable"))
    }

    async fn list_generations(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }
  }

  fn test_config() -> Config {
    Config {
      origin: "https://example.org".to_string(),
      cache: CacheConfig {
        name: "static-v1".to_string(),
        db_path: None,
      },
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/css/style.css".to_string(),
      ],
      fallback: "/index.html".to_string(),
    }
  }

  fn fixture() -> (
    Arc<MemoryStore>,
    Arc<FakeFetcher>,
    CacheProxy<MemoryStore, FakeFetcher>,
  ) {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.serve("https://example.org/", "root");
    fetcher.serve("https://example.org/index.html", "index");
    fetcher.serve("https://example.org/css/style.css", "styles");

    let proxy = CacheProxy::new(Arc::clone(&store), Arc::clone(&fetcher), &test_config()).unwrap();
    (store, fetcher, proxy)
  }

  fn get(path: &str) -> ProxyRequest {
    ProxyRequest::get(Url::parse("https://example.org").unwrap().join(path).unwrap())
  }

  fn navigate(path: &str) -> ProxyRequest {
    ProxyRequest::navigation(Url::parse("https://example.org").unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_install_populates_manifest() {
    let (store, _fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    for path in ["/", "/index.html", "/css/style.css"] {
      let entry = store
        .get("static-v1", &get(path).identity())
        .await
        .unwrap();
      assert!(entry.is_some(), "missing precache entry for {path}");
    }
  }

  #[tokio::test]
  async fn test_install_failure_propagates() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::new());
    // Two of the three manifest paths resolve; the third fails the install.
    fetcher.serve("https://example.org/", "root");
    fetcher.serve("https://example.org/index.html", "index");

    let proxy = CacheProxy::new(Arc::clone(&store), fetcher, &test_config()).unwrap();
    assert!(proxy.install().await.is_err());
  }

  #[tokio::test]
  async fn test_repeated_install_is_idempotent() {
    let (store, _fetcher, proxy) = fixture();
    proxy.install().await.unwrap();
    proxy.install().await.unwrap();

    assert_eq!(store.list_generations().await.unwrap(), vec!["static-v1"]);
  }

  #[tokio::test]
  async fn test_activate_removes_stale_generations() {
    let (store, _fetcher, proxy) = fixture();
    store
      .put(
        "static-v0",
        &get("/old.js").identity(),
        StoredResponse {
          status: 200,
          headers: Vec::new(),
          body: b"obsolete".to_vec(),
        },
      )
      .await
      .unwrap();

    proxy.install().await.unwrap();
    proxy.activate().await.unwrap();

    assert_eq!(store.list_generations().await.unwrap(), vec!["static-v1"]);
  }

  #[tokio::test]
  async fn test_cached_entry_served_without_waiting_on_network() {
    let (_store, fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    // A slow network must not delay a cached answer.
    fetcher.set_delay(Duration::from_secs(5));

    let response = timeout(Duration::from_millis(250), proxy.respond(get("/index.html")))
      .await
      .expect("cached response should not block on the network")
      .unwrap();

    assert_eq!(response.body, b"index");
  }

  #[tokio::test]
  async fn test_miss_fetches_network_then_caches() {
    let (_store, fetcher, proxy) = fixture();
    fetcher.serve("https://example.org/about.html", "about");

    let response = proxy.respond(get("/about.html")).await.unwrap();
    assert_eq!(response.body, b"about");
    assert_eq!(fetcher.calls(), 1);

    // Even with the network gone, the copy just stored answers.
    fetcher.set_offline(true);
    let response = proxy.respond(get("/about.html")).await.unwrap();
    assert_eq!(response.body, b"about");
  }

  #[tokio::test]
  async fn test_background_refresh_overwrites_entry() {
    let (store, fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    fetcher.serve("https://example.org/index.html", "index v2");

    // Caller still sees the cached copy.
    let response = proxy.respond(get("/index.html")).await.unwrap();
    assert_eq!(response.body, b"index");

    // Let the detached refresh land, then observe the overwrite.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let entry = store
      .get("static-v1", &get("/index.html").identity())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body, b"index v2");
  }

  #[tokio::test]
  async fn test_failed_refresh_leaves_entry_intact() {
    let (store, fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    fetcher.set_offline(true);
    let response = proxy.respond(get("/index.html")).await.unwrap();
    assert_eq!(response.body, b"index");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let entry = store
      .get("static-v1", &get("/index.html").identity())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body, b"index");
  }

  #[tokio::test]
  async fn test_mutating_request_passes_through_uncached() {
    let (store, fetcher, proxy) = fixture();
    fetcher.serve("https://example.org/api/posts", "created");

    let request = ProxyRequest::new(
      Method::POST,
      Url::parse("https://example.org/api/posts").unwrap(),
      RequestMode::Resource,
    );
    assert!(!proxy.intercepts(&request));

    let response = proxy.respond(request.clone()).await.unwrap();
    assert_eq!(response.body, b"created");

    // Nothing was written: no generation ever came into existence.
    assert!(store.list_generations().await.unwrap().is_empty());
    assert!(store
      .get("static-v1", &request.identity())
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_root_document() {
    let (_store, fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    fetcher.set_offline(true);

    // Not precached, never visited: only the navigation fallback can answer.
    let response = proxy.respond(navigate("/about.html")).await.unwrap();
    assert_eq!(response.body, b"index");
  }

  #[tokio::test]
  async fn test_offline_resource_does_not_use_fallback() {
    let (_store, fetcher, proxy) = fixture();
    proxy.install().await.unwrap();

    fetcher.set_offline(true);

    let result = proxy.respond(get("/js/missing.js")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_offline_navigation_without_fallback_fails() {
    let (_store, fetcher, proxy) = fixture();
    // No install: the fallback document was never stored.
    fetcher.set_offline(true);

    let result = proxy.respond(navigate("/about.html")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_store_failure_does_not_block_response() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.serve("https://example.org/index.html", "index");

    let proxy =
      CacheProxy::new(Arc::new(FailingStore), Arc::clone(&fetcher), &test_config()).unwrap();

    // Lookup fails (degrades to a miss), the write fails (best effort);
    // the caller still gets the network response.
    let response = proxy.respond(get("/index.html")).await.unwrap();
    assert_eq!(response.body, b"index");
  }
}
