use crate::domain::errors::TransportError;
use crate::domain::snapshot::Snapshot;
use serde::Serialize;
use std::time::Duration;

/// Classification attached to a failed collection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Auth,
    RateLimited,
    Server,
    Network,
    Timeout,
    Internal,
}

impl From<&TransportError> for FailureKind {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Auth { .. } => FailureKind::Auth,
            TransportError::RateLimited { .. } => FailureKind::RateLimited,
            TransportError::Server { .. } => FailureKind::Server,
            TransportError::Network { .. } => FailureKind::Network,
            TransportError::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Terminal state of one collection task. Immutable once created.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded { snapshot: Snapshot },
    Failed { kind: FailureKind, message: String },
    TimedOut,
}

/// Outcome of one (source, target) task.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub source: String,
    pub target: String,
    pub outcome: TaskOutcome,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl CollectionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }
}

/// Aggregate of one orchestration run. Entries are sorted by
/// (source, target) so identical inputs always produce identical ordering.
#[derive(Debug)]
pub struct CollectionReport {
    pub results: Vec<CollectionResult>,
    pub elapsed: Duration,
}

impl CollectionReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Failed tasks, timed-out ones included.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn timed_out(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::TimedOut))
            .count()
    }

    pub fn get(&self, source: &str, target: &str) -> Option<&CollectionResult> {
        self.results
            .iter()
            .find(|r| r.source == source && r.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(source: &str, target: &str, outcome: TaskOutcome) -> CollectionResult {
        CollectionResult {
            source: source.to_string(),
            target: target.to_string(),
            outcome,
            elapsed: Duration::from_millis(10),
            attempts: 1,
        }
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            FailureKind::from(&TransportError::Auth { status: 401 }),
            FailureKind::Auth
        );
        assert_eq!(
            FailureKind::from(&TransportError::RateLimited {
                retry_after_secs: Some(30)
            }),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from(&TransportError::Server { status: 502 }),
            FailureKind::Server
        );
    }

    #[test]
    fn test_report_counts_cover_every_task() {
        let report = CollectionReport {
            results: vec![
                result(
                    "alpaca",
                    "AAPL",
                    TaskOutcome::Succeeded {
                        snapshot: Snapshot::from_payload("AAPL", json!({})),
                    },
                ),
                result(
                    "alpaca",
                    "MSFT",
                    TaskOutcome::Failed {
                        kind: FailureKind::Server,
                        message: "server error (HTTP 503)".to_string(),
                    },
                ),
                result("alpaca", "NVDA", TaskOutcome::TimedOut),
            ],
            elapsed: Duration::from_secs(1),
        };

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.timed_out(), 1);
        assert_eq!(report.succeeded() + report.failed(), report.results.len());
    }

    #[test]
    fn test_report_lookup_by_key() {
        let report = CollectionReport {
            results: vec![result("alpaca", "AAPL", TaskOutcome::TimedOut)],
            elapsed: Duration::ZERO,
        };

        assert!(report.get("alpaca", "AAPL").is_some());
        assert!(report.get("alpaca", "MSFT").is_none());
        assert!(report.get("binance", "AAPL").is_none());
    }
}
