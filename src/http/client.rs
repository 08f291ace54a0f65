use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

use super::cache::Freshness;
use super::{
    CacheConfig, ConcurrencyGate, HttpError, HttpResponse, HttpTransport, RateLimitConfig,
    RateLimiter, ResponseCache, TransportConfig,
};

struct Inner {
    name: String,
    base_url: String,
    limiter: Option<RateLimiter>,
    gate: Option<ConcurrencyGate>,
    transport: HttpTransport,
    cache: Option<ResponseCache>,
    auth_headers: HeaderMap,
    default_headers: HeaderMap,
}

/// Base client for metadata services. Every outbound call runs the same
/// pipeline: rate acquire, concurrency acquire, cache-or-transport, release.
/// Per-service constructors hardcode base URL, rate, and cache filename so
/// user configuration only carries credentials; adapters must not reach
/// around this type to the transport.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<Inner>,
}

pub struct ServiceClientBuilder {
    name: String,
    base_url: String,
    transport: TransportConfig,
    rate_limit: Option<RateLimitConfig>,
    max_concurrent: Option<usize>,
    cache: Option<CacheConfig>,
    auth_headers: Vec<(String, String)>,
    default_headers: Vec<(String, String)>,
}

impl ServiceClientBuilder {
    pub fn new<S: Into<String>, U: Into<String>>(name: S, base_url: U) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            transport: TransportConfig::default(),
            rate_limit: None,
            max_concurrent: None,
            cache: None,
            auth_headers: Vec::new(),
            default_headers: Vec::new(),
        }
    }

    pub fn transport(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub fn concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Auth headers are sent with every request and participate in the
    /// cache key.
    pub fn auth_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.auth_headers.push((name.into(), value.into()));
        self
    }

    /// Plain default headers (Accept, User-Agent); not part of the cache key.
    pub fn default_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub async fn build(self) -> Result<ServiceClient, HttpError> {
        let limiter = self
            .rate_limit
            .as_ref()
            .map(RateLimiter::new)
            .transpose()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        let gate = self.max_concurrent.map(ConcurrencyGate::new);
        let transport = HttpTransport::new(&self.transport)?;

        let cache = match self.cache {
            Some(config) => Some(ResponseCache::open(config).await?),
            None => None,
        };

        Ok(ServiceClient {
            inner: Arc::new(Inner {
                name: self.name,
                base_url: self.base_url,
                limiter,
                gate,
                transport,
                cache,
                auth_headers: header_map(&self.auth_headers)?,
                default_headers: header_map(&self.default_headers)?,
            }),
        })
    }
}

impl ServiceClient {
    pub fn builder<S: Into<String>, U: Into<String>>(name: S, base_url: U) -> ServiceClientBuilder {
        ServiceClientBuilder::new(name, base_url)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<HttpResponse, HttpError> {
        self.request(Method::GET, path, None, cancel).await
    }

    pub async fn post(
        &self,
        path: &str,
        json: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.request(Method::POST, path, json, cancel).await
    }

    pub async fn put(
        &self,
        path: &str,
        json: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.request(Method::PUT, path, json, cancel).await
    }

    pub async fn patch(
        &self,
        path: &str,
        json: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.request(Method::PATCH, path, json, cancel).await
    }

    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<HttpResponse, HttpError> {
        self.request(Method::DELETE, path, None, cancel).await
    }

    /// The pipeline entry point for every verb.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        json: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        let url = self.url_for(path);

        let body = json
            .map(|value| serde_json::to_vec(value).map(Bytes::from))
            .transpose()
            .map_err(|e| HttpError::Build(format!("serializing request body: {e}")))?;

        if let Some(limiter) = &self.inner.limiter {
            limiter.acquire(cancel).await?;
        }

        let _permit = match &self.inner.gate {
            Some(gate) => Some(gate.acquire(cancel).await?),
            None => None,
        };

        self.send_with_cache(method, &url, body, cancel).await
    }

    async fn send_with_cache(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        let Some(cache) = &self.inner.cache else {
            return self.transport_send(&method, url, body, cancel).await;
        };

        if !cache.is_enabled() || !cache.is_cacheable_method(&method) || body.is_some() {
            return self.transport_send(&method, url, body, cancel).await;
        }

        let key = ResponseCache::cache_key(&method, url, &self.inner.auth_headers);

        if let Some(hit) = cache.lookup(&key).await? {
            if hit.freshness == Freshness::Stale {
                self.spawn_refresh(key, method, url.to_string());
            }
            return Ok(hit.response);
        }

        // Miss: coalesce concurrent fetches of the same key.
        let lock = cache.key_lock(&key).await;
        let _guard = lock.lock().await;

        if let Some(hit) = cache.lookup(&key).await? {
            return Ok(hit.response);
        }

        let response = self.transport_send(&method, url, None, cancel).await?;
        if cache.is_cacheable_status(response.status) {
            cache.store(&key, &response).await?;
        }

        Ok(response)
    }

    fn spawn_refresh(&self, key: String, method: Method, url: String) {
        let Some(cache) = &self.inner.cache else { return };
        if !cache.begin_refresh(&key) {
            return;
        }

        let client = self.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let Some(cache) = &client.inner.cache else { return };

            match client.transport_send(&method, &url, None, &cancel).await {
                Ok(response) if cache.is_cacheable_status(response.status) => {
                    if let Err(error) = cache.store(&key, &response).await {
                        log::warn!("[{}] background refresh store failed: {error}", client.inner.name);
                    }
                }
                Ok(response) => {
                    log::warn!(
                        "[{}] background refresh of {url} got status {}; keeping cached entry",
                        client.inner.name,
                        response.status
                    );
                }
                Err(error) => {
                    log::warn!(
                        "[{}] background refresh of {url} failed: {error}; keeping cached entry",
                        client.inner.name
                    );
                }
            }

            cache.end_refresh(&key);
        });
    }

    async fn transport_send(
        &self,
        method: &Method,
        url: &str,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        let mut headers = self.inner.default_headers.clone();
        for (name, value) in self.inner.auth_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        self.inner
            .transport
            .send(method.clone(), url, &headers, body, cancel)
            .await
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        format!(
            "{}/{}",
            self.inner.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    #[cfg(test)]
    pub(crate) fn cache_for_tests(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::with_capacity(pairs.len());

    for (name, value) in pairs {
        let name = HeaderName::from_str(name).map_err(|_| HttpError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| HttpError::InvalidHeader(name.as_str().to_string()))?;
        headers.append(name, value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use httpmock::prelude::*;

    use super::*;

    async fn plain_client(server: &MockServer) -> ServiceClient {
        ServiceClient::builder("testsvc", server.base_url())
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn auth_and_default_headers_ride_every_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/videos")
                    .header("authorization", "Bearer sekrit")
                    .header("accept", "application/json");
                then.status(200).body("[]");
            })
            .await;

        let client = ServiceClient::builder("testsvc", server.base_url())
            .auth_header("Authorization", "Bearer sekrit")
            .default_header("Accept", "application/json")
            .build()
            .await
            .unwrap();

        let response = client.get("/v1/videos", &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 200);
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn fresh_cache_hits_skip_the_upstream() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/artist");
                then.status(200).body("{\"name\":\"Nirvana\"}");
            })
            .await;

        let client = ServiceClient::builder("testsvc", server.base_url())
            .cache(CacheConfig::default())
            .build()
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let first = client.get("/v1/artist", &cancel).await.unwrap();
        let second = client.get("/v1/artist", &cancel).await.unwrap();

        assert_eq!(first.text(), second.text());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn stale_entry_serves_immediately_and_refreshes_in_background() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/feed");
                then.status(200).body("payload");
            })
            .await;

        let config = CacheConfig {
            default_ttl: Duration::from_secs(100),
            stale_while_revalidate: Duration::from_secs(1000),
            ..CacheConfig::default()
        };
        let client = ServiceClient::builder("testsvc", server.base_url())
            .cache(config)
            .build()
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        client.get("/v1/feed", &cancel).await.unwrap();

        let url = format!("{}/v1/feed", server.base_url());
        let key = ResponseCache::cache_key(&reqwest::Method::GET, &url, &HeaderMap::new());
        client.cache_for_tests().unwrap().backdate(&key, 150).await;

        // served from cache without waiting on the upstream
        let stale = client.get("/v1/feed", &cancel).await.unwrap();
        assert_eq!(stale.text(), "payload");

        // let the background refresh land
        tokio::time::sleep(Duration::from_millis(300)).await;
        mock.assert_hits_async(2).await;

        let refreshed = client.cache_for_tests().unwrap().lookup(&key).await.unwrap().unwrap();
        assert_eq!(refreshed.freshness, super::Freshness::Fresh);
    }

    #[tokio::test]
    async fn post_bypasses_the_cache() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/items");
                then.status(201).body("done");
            })
            .await;

        let client = ServiceClient::builder("testsvc", server.base_url())
            .cache(CacheConfig::default())
            .build()
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let body = serde_json::json!({"title": "Sabotage"});
        client.post("/v1/items", Some(&body), &cancel).await.unwrap();
        client.post("/v1/items", Some(&body), &cancel).await.unwrap();

        mock.assert_hits_async(2).await;
    }

    // Scenario: 1 req/sec with burst 1, three concurrent requests. None
    // fail, and completions come out strictly paced.
    #[tokio::test]
    async fn rate_limited_burst_is_paced_and_ordered() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/search");
                then.status(200).body("hits");
            })
            .await;

        let client = ServiceClient::builder("testsvc", server.base_url())
            .rate_limit(RateLimitConfig::per_second(5.0).with_burst(1))
            .build()
            .await
            .unwrap();

        let started = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let response = client.get("/v1/search", &cancel).await.unwrap();
                (response.status, started.elapsed())
            }));
        }

        let mut completions = Vec::new();
        for task in tasks {
            let (status, elapsed) = task.await.unwrap();
            assert_eq!(status, 200);
            completions.push(elapsed);
        }
        completions.sort();

        // at 5/sec with burst 1, requests 2 and 3 wait ~200ms and ~400ms
        assert!(completions[1] >= Duration::from_millis(150), "{completions:?}");
        assert!(completions[2] >= Duration::from_millis(350), "{completions:?}");
    }

    #[tokio::test]
    async fn concurrency_gate_serializes_in_flight_requests() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/slow");
                then.status(200).body("ok").delay(Duration::from_millis(150));
            })
            .await;

        let client = ServiceClient::builder("testsvc", server.base_url())
            .concurrency(1)
            .build()
            .await
            .unwrap();

        let started = Instant::now();
        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.get("/v1/slow", &CancellationToken::new()).await })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.get("/v1/slow", &CancellationToken::new()).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // with a gate of 1 the two 150ms responses cannot overlap
        assert!(started.elapsed() >= Duration::from_millis(280), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn cancelled_call_returns_promptly() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/slow");
                then.status(200).delay(Duration::from_secs(10));
            })
            .await;

        let client = plain_client(&server).await;

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let started = Instant::now();
        let result = client.get("/v1/slow", &cancel).await;
        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
