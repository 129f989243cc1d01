//! HTTP transport against the external snapshot API.
//!
//! One shared pooled client carries every call; in-flight concurrency is
//! capped by a semaphore (excess callers queue), and transient failures are
//! absorbed by an exponential-backoff retry loop before a terminal
//! classification reaches the caller.

use crate::domain::errors::TransportError;
use crate::domain::ports::{ApiResponse, ApiTransport, RequestTask};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.marketpulse.io/v1";

/// Backoff schedule for transient failures.
///
/// `max_retries` counts retries, not sends: 3 retries means up to 4 sends.
/// Each delay is `base_delay * 2^attempt` capped at `max_delay`, plus up to
/// one `base_delay` of uniform jitter. A server-supplied rate-limit wait hint
/// acts as a floor on the delay, never shortened by the cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` when the failure is terminal.
    /// `attempt` is zero-based: the attempt that just failed.
    pub fn next_delay(&self, attempt: u32, error: &TransportError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_retries {
            return None;
        }

        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = Duration::from_millis(
            rand::rng().random_range(0..=self.base_delay.as_millis() as u64),
        );
        let mut delay = backoff + jitter;

        if let TransportError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            delay = delay.max(Duration::from_secs(*secs));
        }

        Some(delay)
    }
}

/// Counters shared with the embedding process. All fields are atomics so
/// concurrent callers never observe a torn state.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    in_flight: AtomicUsize,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl TransportMetrics {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: Url,
    pub max_in_flight: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            max_in_flight: 100,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
    metrics: Arc<TransportMetrics>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        let client =
            HttpClientFactory::create_client(config.request_timeout, config.connect_timeout);

        Self {
            client,
            base_url: config.base_url,
            limiter: Arc::new(Semaphore::new(config.max_in_flight)),
            retry: config.retry,
            metrics: Arc::new(TransportMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<TransportMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One send. The semaphore permit is held only for the duration of the
    /// call itself, so a task sleeping out its backoff does not occupy an
    /// in-flight slot.
    async fn send_once(&self, task: &RequestTask) -> Result<(u16, serde_json::Value), TransportError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| TransportError::Network {
                detail: "transport limiter closed".to_string(),
            })?;

        self.metrics.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.dispatch(task).await;
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn dispatch(&self, task: &RequestTask) -> Result<(u16, serde_json::Value), TransportError> {
        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            task.path.trim_start_matches('/')
        );
        debug!("Transport: request {} -> GET {}", task.id, url);

        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&task.query)
            .bearer_auth(task.credential.token())
            .send()
            .await
            .map_err(|err| classify_send_error(err, started))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            let body = response
                .json::<serde_json::Value>()
                .await
                .map_err(|err| TransportError::Network {
                    detail: format!("invalid JSON body: {}", err),
                })?;
            return Ok((status, body));
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let detail = response.text().await.unwrap_or_default();

        Err(classify_failure(status, retry_after_secs, &detail))
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn execute(&self, task: RequestTask) -> Result<ApiResponse, TransportError> {
        run_with_retry(self.retry, &self.metrics, task.id, || self.send_once(&task)).await
    }
}

/// Drives `op` to a terminal state under `policy`. Kept free of any HTTP
/// machinery so the scheduling behavior is testable with scripted outcomes.
pub(crate) async fn run_with_retry<F, Fut>(
    policy: RetryPolicy,
    metrics: &TransportMetrics,
    request_id: Uuid,
    mut op: F,
) -> Result<ApiResponse, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(u16, serde_json::Value), TransportError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok((status, body)) => {
                return Ok(ApiResponse {
                    status,
                    body,
                    attempts: attempt + 1,
                });
            }
            Err(err) => match policy.next_delay(attempt, &err) {
                Some(delay) => {
                    metrics.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Transport: request {} attempt {} failed ({}), retrying in {:?}",
                        request_id,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    metrics.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Transport: request {} failed after {} attempts: {}",
                        request_id,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }
            },
        }
    }
}

fn classify_send_error(err: reqwest::Error, started: Instant) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    } else {
        TransportError::Network {
            detail: err.to_string(),
        }
    }
}

fn classify_failure(status: u16, retry_after_secs: Option<u64>, detail: &str) -> TransportError {
    match status {
        401 | 403 => TransportError::Auth { status },
        429 => TransportError::RateLimited { retry_after_secs },
        500..=599 => TransportError::Server { status },
        _ => TransportError::Network {
            detail: format!("unexpected HTTP {}: {}", status, detail),
        },
    }
}
