use reqwest::Client;
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates the shared HTTP client. Connections are pooled and reused
    /// across calls; per-request and connect timeouts are enforced by the
    /// client itself so every call has a hard upper bound.
    pub fn create_client(request_timeout: Duration, connect_timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}
