//! Fetches large symbol sets within the API's per-call item ceiling.
//!
//! Input ids are deduplicated and partitioned into contiguous batches; up to
//! `concurrency` batches are in flight at once. A batch that fails
//! terminally contributes only its own ids to the failure set; sibling
//! batches continue on their own.

use crate::domain::errors::{SetupError, TransportError};
use crate::domain::ports::{ApiTransport, RequestTask, Source};
use crate::domain::snapshot::Snapshot;
use futures::StreamExt;
use futures::stream;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Most ids one API call may carry.
    pub ceiling: usize,
    /// Most batches in flight at once.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            ceiling: 200,
            concurrency: 4,
        }
    }
}

/// Result of one batched fetch. `snapshots` holds every id the API answered
/// for; `failed_ids` holds the rest, whether their batch failed or the API
/// skipped them inside a successful response.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub snapshots: Vec<Snapshot>,
    pub failed_ids: Vec<String>,
}

pub struct BatchFetcher<T: ApiTransport> {
    transport: Arc<T>,
    config: BatchConfig,
}

impl<T: ApiTransport> BatchFetcher<T> {
    pub fn new(transport: Arc<T>, config: BatchConfig) -> Result<Self, SetupError> {
        if config.ceiling == 0 {
            return Err(SetupError::InvalidBatchCeiling);
        }
        if config.concurrency == 0 {
            return Err(SetupError::InvalidBatchConcurrency);
        }
        Ok(Self { transport, config })
    }

    pub async fn fetch_batched(&self, source: &Source, ids: &[String]) -> BatchOutcome {
        let batches = partition_ids(ids, self.config.ceiling);
        if batches.is_empty() {
            return BatchOutcome::default();
        }

        debug!(
            "BatchFetcher: fetching {} ids from {} in {} batches",
            batches.iter().map(Vec::len).sum::<usize>(),
            source.name,
            batches.len()
        );

        let fetches = batches.iter().enumerate().map(|(index, batch)| {
            let batch = batch.as_slice();
            async move { (index, self.fetch_batch(source, batch).await) }
        });
        let mut completed: Vec<(usize, Result<Vec<Snapshot>, TransportError>)> =
            stream::iter(fetches)
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;
        // Completion order is arbitrary; batch index order keeps the
        // outcome deterministic.
        completed.sort_by_key(|(index, _)| *index);

        let mut outcome = BatchOutcome::default();
        for (index, result) in completed {
            let batch = &batches[index];
            match result {
                Ok(snapshots) => {
                    let answered: HashSet<&str> =
                        snapshots.iter().map(|s| s.target.as_str()).collect();
                    for id in batch {
                        if !answered.contains(id.as_str()) {
                            warn!(
                                "BatchFetcher: {} omitted {} from a successful response",
                                source.name, id
                            );
                            outcome.failed_ids.push(id.clone());
                        }
                    }
                    outcome.snapshots.extend(snapshots);
                }
                Err(err) => {
                    warn!(
                        "BatchFetcher: batch {} of {} ids failed terminally: {}",
                        index,
                        batch.len(),
                        err
                    );
                    outcome.failed_ids.extend(batch.iter().cloned());
                }
            }
        }
        outcome
    }

    async fn fetch_batch(
        &self,
        source: &Source,
        batch: &[String],
    ) -> Result<Vec<Snapshot>, TransportError> {
        let task = RequestTask::new(
            format!("sources/{}/snapshots", source.name),
            source.credential.clone(),
        )
        .with_query("symbols", batch.join(","));

        let response = self.transport.execute(task).await?;
        let snapshots = response
            .body
            .get("snapshots")
            .and_then(|v| v.as_object())
            .map(|entries| {
                entries
                    .iter()
                    .map(|(target, payload)| Snapshot::from_payload(target.as_str(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(snapshots)
    }
}

/// Deduplicates (first occurrence wins) and splits into contiguous chunks of
/// at most `ceiling` ids. The chunks partition the deduplicated input
/// exactly: no id twice, none dropped.
pub fn partition_ids(ids: &[String], ceiling: usize) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    let deduped: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    deduped
        .chunks(ceiling.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
