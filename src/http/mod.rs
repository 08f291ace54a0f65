pub mod rate_limit;
pub mod gate;
pub mod transport;
pub mod cache;
pub mod client;

pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use gate::{ConcurrencyGate, GatePermit};
pub use transport::{HttpResponse, HttpTransport, RetryConfig, TransportConfig};
pub use cache::{CacheConfig, ResponseCache};
pub use client::{ServiceClient, ServiceClientBuilder};

/* Failures surfaced by the client substrate. Transient network failures are
   absorbed by the transport's retry loop first; what escapes here is final. */
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("Network failure after {attempts} attempt(s): {source}")]
    Network { attempts: u32, source: reqwest::Error },

    #[error("Upstream kept returning retryable status {status} for {attempts} attempt(s)")]
    RetryableStatusExhausted { status: u16, attempts: u32 },

    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header value for '{0}'")]
    InvalidHeader(String),

    #[error("Response cache error: {0}")]
    Cache(String),
}
