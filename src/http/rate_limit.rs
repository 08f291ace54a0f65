use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::HttpError;

#[derive(Debug, thiserror::Error)]
#[error("Rate limiter needs at least one of per_second, per_minute, per_hour.")]
pub struct InvalidRateLimit;

/// Requests-per-window rates. Windows compose as a logical AND: an acquire
/// waits until every configured bucket has a token.
#[derive(Clone, Debug, Default)]
pub struct RateLimitConfig {
    pub per_second: Option<f64>,
    pub per_minute: Option<f64>,
    pub per_hour: Option<f64>,
    /// Bucket capacity override. Defaults to the window's own request count.
    pub burst: Option<u32>,
}

impl RateLimitConfig {
    pub fn per_second(rate: f64) -> Self {
        Self { per_second: Some(rate), ..Self::default() }
    }

    pub fn per_minute(rate: f64) -> Self {
        Self { per_minute: Some(rate), ..Self::default() }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }
}

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(count: f64, window_secs: f64, burst: Option<u32>) -> Self {
        let capacity = burst.map(f64::from).unwrap_or(count).max(1.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: count / window_secs,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn wait_for_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }
}

/// Token-bucket limiter. Waiters are served in arrival order (the turn
/// mutex is FIFO); tokens are consumed only at the moment an acquire
/// succeeds, so a cancelled wait costs nothing.
pub struct RateLimiter {
    turn: tokio::sync::Mutex<()>,
    buckets: Mutex<Vec<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self, InvalidRateLimit> {
        let mut buckets = Vec::new();

        if let Some(rate) = config.per_second {
            buckets.push(Bucket::new(rate, 1.0, config.burst));
        }
        if let Some(rate) = config.per_minute {
            buckets.push(Bucket::new(rate, 60.0, config.burst));
        }
        if let Some(rate) = config.per_hour {
            buckets.push(Bucket::new(rate, 3600.0, config.burst));
        }

        if buckets.is_empty() {
            return Err(InvalidRateLimit);
        }

        Ok(Self {
            turn: tokio::sync::Mutex::new(()),
            buckets: Mutex::new(buckets),
        })
    }

    /// Blocks until every bucket has a token, then consumes one from each.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), HttpError> {
        let _turn = tokio::select! {
            guard = self.turn.lock() => guard,
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
        };

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().unwrap();
                let now = Instant::now();

                let mut longest = Duration::ZERO;
                for bucket in buckets.iter_mut() {
                    bucket.refill(now);
                    longest = longest.max(bucket.wait_for_token());
                }

                if longest.is_zero() {
                    for bucket in buckets.iter_mut() {
                        bucket.tokens -= 1.0;
                    }
                    return Ok(());
                }

                longest
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_at_least_one_window() {
        assert!(RateLimiter::new(&RateLimitConfig::default()).is_err());
        assert!(RateLimiter::new(&RateLimitConfig::per_second(1.0)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn one_per_second_burst_one_paces_acquires() {
        let limiter = RateLimiter::new(&RateLimitConfig::per_second(1.0).with_burst(1)).unwrap();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }

        // first is free (burst), the other two wait a second each
        assert!(start.elapsed() >= Duration::from_millis(1990), "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn windows_compose_as_logical_and() {
        // 10/sec but only 2/min: third acquire must wait on the minute bucket
        let config = RateLimitConfig {
            per_second: Some(10.0),
            per_minute: Some(2.0),
            burst: Some(2),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(&config).unwrap();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(29), "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_consumes_no_tokens() {
        let limiter = RateLimiter::new(&RateLimitConfig::per_second(1.0).with_burst(1)).unwrap();
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap(); // drain the bucket

        let doomed = CancellationToken::new();
        doomed.cancel();
        let result = limiter.acquire(&doomed).await;
        assert!(matches!(result, Err(HttpError::Cancelled)));

        // the cancelled wait above must not have eaten the refilling token
        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(1100), "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::per_second(1.0).with_burst(1)).unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for i in 0..3u32 {
            let limiter = Arc::clone(&limiter);
            let tx = tx.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                limiter.acquire(&cancel).await.unwrap();
                tx.send(i).unwrap();
            });
            // let the spawned task reach the turn queue before the next one
            tokio::task::yield_now().await;
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }
}
