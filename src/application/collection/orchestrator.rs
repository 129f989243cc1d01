//! Fan-out/fan-in collection runs.
//!
//! One task per (source, target) pair, each bounded by its own timeout; an
//! overall deadline bounds the run without cancelling successes that already
//! landed. A task failure never touches its siblings, and every dispatched
//! pair appears in the final report exactly once.

use crate::domain::errors::{HistoryError, SetupError};
use crate::domain::ports::{ApiTransport, RequestTask, Source};
use crate::domain::report::{CollectionReport, CollectionResult, FailureKind, TaskOutcome};
use crate::domain::snapshot::{HistoryRecord, Snapshot, stream_id};
use crate::infrastructure::history_store::HistoryStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Budget for one (source, target) task.
    pub per_task_timeout: Duration,
    /// Budget for the whole run. Tasks still running when it expires are
    /// reported as timed out; their in-flight calls are abandoned.
    pub overall_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_task_timeout: Duration::from_secs(60),
            overall_deadline: Duration::from_secs(300),
        }
    }
}

pub struct CollectionOrchestrator<T: ApiTransport> {
    transport: Arc<T>,
    history: Option<Arc<HistoryStore>>,
    config: OrchestratorConfig,
}

impl<T: ApiTransport + 'static> CollectionOrchestrator<T> {
    pub fn new(transport: Arc<T>, config: OrchestratorConfig) -> Self {
        Self {
            transport,
            history: None,
            config,
        }
    }

    /// Successful snapshots will be appended to `history`, one stream per
    /// (source, target) pair.
    pub fn with_history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn run_all(
        &self,
        sources: &[Source],
        targets: &[String],
    ) -> Result<CollectionReport, SetupError> {
        if sources.is_empty() {
            return Err(SetupError::NoSources);
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.overall_deadline;

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, (String, String)> = HashMap::new();
        for source in sources {
            for target in targets {
                let handle = join_set.spawn(collect_one(
                    Arc::clone(&self.transport),
                    source.clone(),
                    target.clone(),
                    self.config.per_task_timeout,
                ));
                pending.insert(handle.id(), (source.name.clone(), target.clone()));
            }
        }

        info!(
            "Orchestrator: dispatched {} tasks ({} sources x {} targets)",
            pending.len(),
            sources.len(),
            targets.len()
        );

        let mut results: Vec<CollectionResult> = Vec::with_capacity(pending.len());
        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next_with_id()).await {
                Ok(Some(Ok((task_id, result)))) => {
                    pending.remove(&task_id);
                    results.push(result);
                }
                Ok(Some(Err(join_err))) => {
                    // A panicked task becomes its own Failed entry; siblings
                    // keep running.
                    if let Some((source, target)) = pending.remove(&join_err.id()) {
                        warn!(
                            "Orchestrator: task {}/{} aborted: {}",
                            source, target, join_err
                        );
                        results.push(CollectionResult {
                            source,
                            target,
                            outcome: TaskOutcome::Failed {
                                kind: FailureKind::Internal,
                                message: join_err.to_string(),
                            },
                            elapsed: started.elapsed(),
                            attempts: 0,
                        });
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    join_set.abort_all();
                    warn!(
                        "Orchestrator: overall deadline reached with {} tasks unfinished",
                        pending.len()
                    );
                    for (_, (source, target)) in pending.drain() {
                        results.push(CollectionResult {
                            source,
                            target,
                            outcome: TaskOutcome::TimedOut,
                            elapsed: started.elapsed(),
                            attempts: 0,
                        });
                    }
                    break;
                }
            }
        }

        results.sort_by(|a, b| {
            (a.source.as_str(), a.target.as_str()).cmp(&(b.source.as_str(), b.target.as_str()))
        });

        if let Some(history) = &self.history {
            self.persist_successes(history, &results);
        }

        let report = CollectionReport {
            results,
            elapsed: started.elapsed(),
        };
        info!(
            "Orchestrator: run complete in {:?} ({} succeeded, {} failed)",
            report.elapsed,
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    fn persist_successes(&self, history: &HistoryStore, results: &[CollectionResult]) {
        for result in results {
            let TaskOutcome::Succeeded { snapshot } = &result.outcome else {
                continue;
            };
            let stream = stream_id(&result.source, &result.target);
            match history.append(&stream, HistoryRecord::from(snapshot)) {
                Ok(()) => {}
                Err(HistoryError::StaleTimestamp { latest, .. }) => {
                    warn!(
                        "Orchestrator: skipped stale snapshot for {} (stream already at {})",
                        stream, latest
                    );
                }
                Err(err) => {
                    error!("Orchestrator: failed to persist snapshot for {}: {}", stream, err);
                }
            }
        }
    }
}

async fn collect_one<T: ApiTransport>(
    transport: Arc<T>,
    source: Source,
    target: String,
    per_task_timeout: Duration,
) -> CollectionResult {
    let task_started = Instant::now();
    let request = RequestTask::new(
        format!("sources/{}/snapshots/{}", source.name, target),
        source.credential.clone(),
    );

    let outcome = match tokio::time::timeout(per_task_timeout, transport.execute(request)).await {
        Ok(Ok(response)) => {
            let attempts = response.attempts;
            let snapshot = Snapshot::from_payload(target.clone(), response.body);
            return CollectionResult {
                source: source.name,
                target,
                outcome: TaskOutcome::Succeeded { snapshot },
                elapsed: task_started.elapsed(),
                attempts,
            };
        }
        Ok(Err(err)) => TaskOutcome::Failed {
            kind: FailureKind::from(&err),
            message: err.to_string(),
        },
        Err(_) => TaskOutcome::TimedOut,
    };

    CollectionResult {
        source: source.name,
        target,
        outcome,
        elapsed: task_started.elapsed(),
        attempts: 0,
    }
}
