use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed data point for a (source, target) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub target: String,
    pub observed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Snapshot {
    /// Builds a snapshot from a raw API payload. Providers that stamp their
    /// payloads with an RFC 3339 `as_of` field keep that timestamp; anything
    /// else is stamped at observation time.
    pub fn from_payload(target: impl Into<String>, payload: serde_json::Value) -> Self {
        let observed_at = payload
            .get("as_of")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            target: target.into(),
            observed_at,
            payload,
        }
    }
}

/// A snapshot as persisted in a stream's history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<&Snapshot> for HistoryRecord {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            timestamp: snapshot.observed_at,
            payload: snapshot.payload.clone(),
        }
    }
}

/// Canonical stream id for a (source, target) pair.
pub fn stream_id(source: &str, target: &str) -> String {
    format!("{}/{}", source, target)
}
