use crate::application::admission::rate_limiter::AdmissionConfig;
use crate::application::collection::batch_fetcher::BatchConfig;
use crate::application::collection::orchestrator::OrchestratorConfig;
use crate::domain::ports::{Credential, Source};
use crate::infrastructure::transport::{RetryPolicy, TransportConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: Url,
    pub api_token: String,
    pub sources: Vec<String>,
    pub symbols: Vec<String>,
    // Transport
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    // Batching
    pub batch_ceiling: usize,
    pub batch_concurrency: usize,
    // Orchestration
    pub per_task_timeout_secs: u64,
    pub overall_deadline_secs: u64,
    // History
    pub history_dir: PathBuf,
    pub history_retention: usize,
    // Admission
    pub admission_limit: usize,
    pub admission_window_secs: u64,
    pub trust_forwarded_header: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_base_url_str = env::var("MARKETPULSE_API_URL")
            .unwrap_or_else(|_| "https://api.marketpulse.io/v1".to_string());
        let api_base_url =
            Url::parse(&api_base_url_str).context("Invalid MARKETPULSE_API_URL")?;

        let api_token = env::var("MARKETPULSE_API_TOKEN").unwrap_or_default();

        let sources_str =
            env::var("MARKETPULSE_SOURCES").unwrap_or_else(|_| "alpaca".to_string());
        let sources: Vec<String> = sources_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let symbols_str = env::var("MARKETPULSE_SYMBOLS").unwrap_or_else(|_| "AAPL".to_string());
        let symbols: Vec<String> = symbols_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_in_flight = env::var("MARKETPULSE_MAX_IN_FLIGHT")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<usize>()
            .context("Failed to parse MARKETPULSE_MAX_IN_FLIGHT")?;

        let request_timeout_secs = env::var("MARKETPULSE_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_REQUEST_TIMEOUT_SECS")?;

        let connect_timeout_secs = env::var("MARKETPULSE_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_CONNECT_TIMEOUT_SECS")?;

        let max_retries = env::var("MARKETPULSE_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .context("Failed to parse MARKETPULSE_MAX_RETRIES")?;

        let backoff_base_ms = env::var("MARKETPULSE_BACKOFF_BASE_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_BACKOFF_BASE_MS")?;

        let backoff_max_secs = env::var("MARKETPULSE_BACKOFF_MAX_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_BACKOFF_MAX_SECS")?;

        let batch_ceiling = env::var("MARKETPULSE_BATCH_CEILING")
            .unwrap_or_else(|_| "200".to_string())
            .parse::<usize>()
            .context("Failed to parse MARKETPULSE_BATCH_CEILING")?;

        let batch_concurrency = env::var("MARKETPULSE_BATCH_CONCURRENCY")
            .unwrap_or_else(|_| "4".to_string())
            .parse::<usize>()
            .context("Failed to parse MARKETPULSE_BATCH_CONCURRENCY")?;

        let per_task_timeout_secs = env::var("MARKETPULSE_PER_TASK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_PER_TASK_TIMEOUT_SECS")?;

        let overall_deadline_secs = env::var("MARKETPULSE_OVERALL_DEADLINE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_OVERALL_DEADLINE_SECS")?;

        let history_dir = match env::var("MARKETPULSE_HISTORY_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = env::var("HOME").context("Could not find HOME directory")?;
                PathBuf::from(home).join(".marketpulse").join("history")
            }
        };

        let history_retention = env::var("MARKETPULSE_HISTORY_RETENTION")
            .unwrap_or_else(|_| "168".to_string())
            .parse::<usize>()
            .context("Failed to parse MARKETPULSE_HISTORY_RETENTION")?;

        let admission_limit = env::var("MARKETPULSE_ADMISSION_LIMIT")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<usize>()
            .context("Failed to parse MARKETPULSE_ADMISSION_LIMIT")?;

        let admission_window_secs = env::var("MARKETPULSE_ADMISSION_WINDOW_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .context("Failed to parse MARKETPULSE_ADMISSION_WINDOW_SECS")?;

        let trust_forwarded_header = env::var("MARKETPULSE_TRUST_FORWARDED_HEADER")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            api_base_url,
            api_token,
            sources,
            symbols,
            max_in_flight,
            request_timeout_secs,
            connect_timeout_secs,
            max_retries,
            backoff_base_ms,
            backoff_max_secs,
            batch_ceiling,
            batch_concurrency,
            per_task_timeout_secs,
            overall_deadline_secs,
            history_dir,
            history_retention,
            admission_limit,
            admission_window_secs,
            trust_forwarded_header,
        })
    }

    /// Sources with the shared credential resolved in.
    pub fn resolved_sources(&self) -> Vec<Source> {
        let credential = Credential::new(self.api_token.clone());
        self.sources
            .iter()
            .map(|name| Source::new(name.clone(), credential.clone()))
            .collect()
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.api_base_url.clone(),
            max_in_flight: self.max_in_flight,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_secs(self.backoff_max_secs),
            },
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            ceiling: self.batch_ceiling,
            concurrency: self.batch_concurrency,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            per_task_timeout: Duration::from_secs(self.per_task_timeout_secs),
            overall_deadline: Duration::from_secs(self.overall_deadline_secs),
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            limit: self.admission_limit,
            window: Duration::from_secs(self.admission_window_secs),
            trust_forwarded_header: self.trust_forwarded_header,
        }
    }
}
