//! Durable per-stream snapshot history.
//!
//! Each stream is one JSON file holding an ordered array of records, oldest
//! first. Writers of a single stream are serialized through a per-stream
//! lock; independent streams proceed without coordination. Every write goes
//! to a temp file first and is published with an atomic rename, so a reader
//! never observes partial content.

use crate::domain::errors::HistoryError;
use crate::domain::snapshot::HistoryRecord;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct HistoryStore {
    root: PathBuf,
    retention: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    /// Opens (and creates if needed) a store rooted at `root`, keeping at
    /// most `retention` records per stream.
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Result<Self, HistoryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        info!(
            "HistoryStore: opened at {:?} (retention: {} records)",
            root, retention
        );
        Ok(Self {
            root,
            retention: retention.max(1),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Appends one record. A timestamp older than the stream's latest stored
    /// record is rejected; history is never silently reordered.
    pub fn append(&self, stream: &str, record: HistoryRecord) -> Result<(), HistoryError> {
        let lock = self.stream_lock(stream);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records = self.load(stream)?;
        if let Some(latest) = records.last() {
            if record.timestamp < latest.timestamp {
                return Err(HistoryError::StaleTimestamp {
                    stream: stream.to_string(),
                    rejected: record.timestamp,
                    latest: latest.timestamp,
                });
            }
        }

        records.push(record);
        if records.len() > self.retention {
            let excess = records.len() - self.retention;
            records.drain(..excess);
        }

        self.write_stream(stream, &records)?;
        debug!(
            "HistoryStore: appended to {} ({} records retained)",
            stream,
            records.len()
        );
        Ok(())
    }

    /// Drops records beyond `max_records`, oldest first.
    pub fn prune(&self, stream: &str, max_records: usize) -> Result<(), HistoryError> {
        let lock = self.stream_lock(stream);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records = self.load(stream)?;
        if records.len() <= max_records {
            return Ok(());
        }

        let excess = records.len() - max_records;
        records.drain(..excess);
        self.write_stream(stream, &records)?;
        info!(
            "HistoryStore: pruned {} records from {} ({} retained)",
            excess,
            stream,
            records.len()
        );
        Ok(())
    }

    /// Loads a stream, oldest record first. A missing stream is empty;
    /// malformed content is surfaced, never truncated or reinterpreted.
    pub fn load(&self, stream: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
        let path = self.stream_path(stream);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|err| HistoryError::Corrupt {
            stream: stream.to_string(),
            detail: err.to_string(),
        })
    }

    fn write_stream(&self, stream: &str, records: &[HistoryRecord]) -> Result<(), HistoryError> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let path = self.stream_path(stream);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn stream_path(&self, stream: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_stream_id(stream)))
    }

    fn stream_lock(&self, stream: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(stream.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Maps a stream id onto a filesystem-safe file stem.
fn sanitize_stream_id(stream: &str) -> String {
    stream
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn create_test_store(retention: usize) -> (HistoryStore, PathBuf) {
        let unique_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "marketpulse_test_{}_{}_history",
            std::process::id(),
            unique_id
        ));
        let store = HistoryStore::new(&temp_dir, retention).expect("Failed to create test store");
        (store, temp_dir)
    }

    fn cleanup_test_dir(temp_dir: PathBuf) {
        fs::remove_dir_all(temp_dir).ok();
    }

    fn record_at(offset_secs: i64, value: i64) -> HistoryRecord {
        let base = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        HistoryRecord {
            timestamp: base + ChronoDuration::seconds(offset_secs),
            payload: json!({ "price": value }),
        }
    }

    #[test]
    fn test_load_missing_stream_is_empty() {
        let (store, temp_dir) = create_test_store(10);
        assert!(store.load("alpaca/AAPL").unwrap().is_empty());
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_append_and_load_preserve_order() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(0, 1)).unwrap();
        store.append("alpaca/AAPL", record_at(60, 2)).unwrap();
        store.append("alpaca/AAPL", record_at(120, 3)).unwrap();

        let records = store.load("alpaca/AAPL").unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(records[0].payload, json!({ "price": 1 }));
        assert_eq!(records[2].payload, json!({ "price": 3 }));
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(60, 1)).unwrap();
        let result = store.append("alpaca/AAPL", record_at(0, 2));

        assert!(matches!(result, Err(HistoryError::StaleTimestamp { .. })));
        assert_eq!(store.load("alpaca/AAPL").unwrap().len(), 1);
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_equal_timestamp_is_accepted() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(60, 1)).unwrap();
        store.append("alpaca/AAPL", record_at(60, 2)).unwrap();

        assert_eq!(store.load("alpaca/AAPL").unwrap().len(), 2);
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_retention_keeps_most_recent() {
        let (store, temp_dir) = create_test_store(3);

        for i in 0..7 {
            store.append("alpaca/AAPL", record_at(i * 60, i)).unwrap();
        }

        let records = store.load("alpaca/AAPL").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, json!({ "price": 4 }));
        assert_eq!(records[2].payload, json!({ "price": 6 }));
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_fewer_appends_than_retention() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(0, 1)).unwrap();
        store.append("alpaca/AAPL", record_at(60, 2)).unwrap();

        assert_eq!(store.load("alpaca/AAPL").unwrap().len(), 2);
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_prune_drops_oldest_first() {
        let (store, temp_dir) = create_test_store(10);

        for i in 0..5 {
            store.append("alpaca/AAPL", record_at(i * 60, i)).unwrap();
        }
        store.prune("alpaca/AAPL", 2).unwrap();

        let records = store.load("alpaca/AAPL").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, json!({ "price": 3 }));
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_corrupt_stream_is_surfaced() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(0, 1)).unwrap();
        let path = temp_dir.join("alpaca_AAPL.json");
        fs::write(&path, "{ not json").unwrap();

        let result = store.load("alpaca/AAPL");
        assert!(matches!(result, Err(HistoryError::Corrupt { .. })));
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_independent_streams_do_not_interfere() {
        let (store, temp_dir) = create_test_store(10);

        store.append("alpaca/AAPL", record_at(0, 1)).unwrap();
        store.append("binance/BTC-USDT", record_at(0, 2)).unwrap();

        assert_eq!(store.load("alpaca/AAPL").unwrap().len(), 1);
        assert_eq!(store.load("binance/BTC-USDT").unwrap().len(), 1);
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let (store, temp_dir) = create_test_store(100);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        // A shared timestamp stays valid under any
                        // interleaving; equal-to-latest is accepted.
                        store.append("alpaca/AAPL", record_at(10_000, i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load("alpaca/AAPL").unwrap().len(), 40);
        cleanup_test_dir(temp_dir);
    }

    #[test]
    fn test_stream_id_sanitization() {
        assert_eq!(sanitize_stream_id("alpaca/AAPL"), "alpaca_AAPL");
        assert_eq!(sanitize_stream_id("binance/BTC-USDT"), "binance_BTC-USDT");
        assert_eq!(sanitize_stream_id("../escape"), ".._escape");
    }
}
