use crate::domain::errors::TransportError;
use async_trait::async_trait;
use uuid::Uuid;

/// Resolved bearer credential for one source. `Debug` never reveals the
/// token, so request logging cannot leak it.
#[derive(Clone)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// An external data provider: one scoped API surface with its own credential.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub credential: Credential,
}

impl Source {
    pub fn new(name: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            credential,
        }
    }
}

/// One unit of transport work: a single authenticated call against the
/// external API. Owned by the transport call that executes it and dropped
/// once a terminal state is reached.
#[derive(Debug, Clone)]
pub struct RequestTask {
    pub id: Uuid,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub credential: Credential,
}

impl RequestTask {
    pub fn new(path: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            query: Vec::new(),
            credential,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful transport outcome. `attempts` counts every send, the
/// successful one included.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub attempts: u32,
}

/// The transport seam. Production code talks to the external API through
/// `HttpTransport`; tests substitute a scripted implementation.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn execute(&self, task: RequestTask) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::new("sk-live-very-secret");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn test_request_task_builder() {
        let task = RequestTask::new("sources/alpaca/snapshots", Credential::new("t"))
            .with_query("symbols", "AAPL,MSFT");

        assert_eq!(task.path, "sources/alpaca/snapshots");
        assert_eq!(
            task.query,
            vec![("symbols".to_string(), "AAPL,MSFT".to_string())]
        );
    }

    #[test]
    fn test_request_task_ids_are_unique() {
        let a = RequestTask::new("a", Credential::new("t"));
        let b = RequestTask::new("a", Credential::new("t"));
        assert_ne!(a.id, b.id);
    }
}
