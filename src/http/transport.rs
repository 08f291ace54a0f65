use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, redirect};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::HttpError;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total underlying attempts per logical request.
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub verify_tls: bool,
    pub max_keepalive_connections: usize,
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            verify_tls: true,
            max_keepalive_connections: 20,
            retry: RetryConfig::default(),
        }
    }
}

/// A fully-materialized response. Bodies are read eagerly so the cache can
/// persist them and callers can inspect non-2xx payloads.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Connection pool plus the conditional retry loop. An attempt is retried
/// on network-class failures and on the configured status set; anything
/// else comes back as a normal response for the caller to inspect.
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(!config.verify_tls)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut request = self.client.request(method.clone(), url).headers(headers.clone());
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let outcome = tokio::select! {
                outcome = request.send() => outcome,
                _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            };

            match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if !self.retry.retryable_statuses.contains(&status) {
                        let headers = response.headers().clone();
                        let body = tokio::select! {
                            body = response.bytes() => body.map_err(|source| HttpError::Network {
                                attempts: attempt,
                                source,
                            })?,
                            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
                        };

                        return Ok(HttpResponse { status, headers, body });
                    }

                    if attempt >= self.retry.max_attempts {
                        return Err(HttpError::RetryableStatusExhausted { status, attempts: attempt });
                    }

                    log::warn!("retryable status {status} from {url} (attempt {attempt})");
                }

                Err(source) if is_network_class(&source) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(HttpError::Network { attempts: attempt, source });
                    }

                    log::warn!("network failure for {url} (attempt {attempt}): {source}");
                }

                Err(source) => {
                    return Err(HttpError::Network { attempts: attempt, source });
                }
            }

            let wait = self.backoff(attempt);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.retry.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let wait = self.retry.min_wait.as_secs_f64() * factor;
        Duration::from_secs_f64(wait.clamp(
            self.retry.min_wait.as_secs_f64(),
            self.retry.max_wait.as_secs_f64(),
        ))
    }
}

fn is_network_class(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request() || error.is_body()
}
