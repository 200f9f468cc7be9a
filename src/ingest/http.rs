//! Upstream call envelope shared by the HTTP adapters: per-request timeout,
//! bounded exponential-backoff retries for transient failures, and a fair
//! concurrency gate for per-instrument fan-out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            // attempts are bounded by max_retries, not elapsed time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or retries run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                attempt += 1;
                warn!(target: "upstream", %label, attempt, error = %e, ?delay, "transient upstream failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fixed number of simultaneous in-flight calls; excess callers queue in
/// FIFO order (tokio's semaphore is fair).
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyGate {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, SourceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SourceError::unavailable("concurrency gate closed"))?;
        Ok(fut.await)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            retry: RetryPolicy::default(),
            max_concurrency: 4,
        }
    }
}

/// `reqwest` client with the common timeout/retry envelope.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    cfg: UpstreamConfig,
    gate: ConcurrencyGate,
}

impl UpstreamClient {
    pub fn new(cfg: UpstreamConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .user_agent("prediction-aggregator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| SourceError::rejected(format!("http client: {e}")))?;
        let gate = ConcurrencyGate::new(cfg.max_concurrency);
        Ok(Self { http, cfg, gate })
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// GET and decode JSON, retrying transient failures.
    pub async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        with_retry(&self.cfg.retry, url, || self.get_json_once(url)).await
    }

    async fn get_json_once(&self, url: &str) -> Result<Value, SourceError> {
        debug!(target: "upstream", %url, "GET");
        let send = self.http.get(url).send();
        let resp = match tokio::time::timeout(self.cfg.timeout, send).await {
            Err(_) => return Err(SourceError::Timeout(self.cfg.timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(SourceError::Timeout(self.cfg.timeout)),
            Ok(Err(e)) => return Err(SourceError::unavailable(transport_reason(&e))),
            Ok(Ok(r)) => r,
        };
        classify_status(resp.status().as_u16())?;
        resp.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.cfg.timeout)
            } else {
                SourceError::rejected("malformed body")
            }
        })
    }
}

/// Map an HTTP status onto the error taxonomy.
pub fn classify_status(status: u16) -> Result<(), SourceError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(SourceError::RateLimited),
        500..=599 => Err(SourceError::unavailable(format!("HTTP {status}"))),
        _ => Err(SourceError::rejected(format!("HTTP {status}"))),
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_connect() {
        "connection failed".to_string()
    } else {
        "transport error".to_string()
    }
}
