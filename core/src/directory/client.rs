//! Directory clients
//!
//! [`HttpDirectory`] talks to the deployed service over HTTPS. Its blocking
//! `ureq` calls run on the blocking pool. [`MemoryDirectory`] implements the
//! same contract in process and also backs the local directory server.

use super::protocol::{
    QueryRequest, QueryResponse, RegisterRequest, RegisterResponse, ReportRecord, CODE_INVALID_KEY,
    CODE_OK,
};
use crate::crypto::{KeyMaterial, KEY_MATERIAL_LEN};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Deployed directory endpoint
pub const DEFAULT_DIRECTORY_URL: &str = "https://bletracker.supportvector.com/ble";

/// Default HTTP timeout for directory calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
    #[error("Directory rejected request with code {0}")]
    Rejected(i32),
    #[error("Malformed directory response: {0}")]
    Malformed(String),
}

/// Where the directory lives and how long to wait for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DIRECTORY_URL.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl DirectoryConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Storage for `(public key, encrypted report)` pairs
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn register(&self, key: &KeyMaterial, content: &[u8]) -> Result<(), DirectoryError>;

    async fn query(&self, key: &KeyMaterial) -> Result<Vec<ReportRecord>, DirectoryError>;
}

/// HTTP client for the deployed directory
#[derive(Clone)]
pub struct HttpDirectory {
    config: DirectoryConfig,
    agent: ureq::Agent,
}

impl HttpDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, DirectoryError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let url = self.config.endpoint(path);
        let body =
            serde_json::to_string(body).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        let agent = self.agent.clone();
        debug!("POST {}", url);

        tokio::task::spawn_blocking(move || {
            let text = agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_string(&body)
                .map_err(|e| match e {
                    ureq::Error::Status(status, _) => {
                        DirectoryError::Unavailable(format!("HTTP {status}"))
                    }
                    other => DirectoryError::Unavailable(other.to_string()),
                })?
                .into_string()
                .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
            serde_json::from_str::<Resp>(&text).map_err(|e| DirectoryError::Malformed(e.to_string()))
        })
        .await
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectory {
    async fn register(&self, key: &KeyMaterial, content: &[u8]) -> Result<(), DirectoryError> {
        let request = RegisterRequest {
            key: key.as_bytes().to_vec(),
            content: content.to_vec(),
        };
        let response: RegisterResponse = self.post("register", &request).await?;
        match response.code {
            CODE_OK => Ok(()),
            code => Err(DirectoryError::Rejected(code)),
        }
    }

    async fn query(&self, key: &KeyMaterial) -> Result<Vec<ReportRecord>, DirectoryError> {
        let request = QueryRequest {
            key: key.as_bytes().to_vec(),
        };
        let response: QueryResponse = self.post("query", &request).await?;
        match response.code {
            CODE_OK => Ok(response.results),
            code => Err(DirectoryError::Rejected(code)),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// In-process directory keyed by raw key bytes
#[derive(Clone)]
pub struct MemoryDirectory {
    records: Arc<RwLock<HashMap<Vec<u8>, Vec<ReportRecord>>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the service going down (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &[u8], content: Vec<u8>, timestamp: i64) {
        self.records
            .write()
            .entry(key.to_vec())
            .or_default()
            .push(ReportRecord { content, timestamp });
    }

    pub fn lookup(&self, key: &[u8]) -> Vec<ReportRecord> {
        self.records.read().get(key).cloned().unwrap_or_default()
    }

    pub fn report_count(&self) -> usize {
        self.records.read().values().map(Vec::len).sum()
    }

    /// Apply a `/register` body the way the service does
    pub fn handle_register(&self, request: RegisterRequest) -> RegisterResponse {
        if request.key.len() != KEY_MATERIAL_LEN {
            return RegisterResponse {
                code: CODE_INVALID_KEY,
            };
        }
        self.insert(&request.key, request.content, now_millis());
        RegisterResponse { code: CODE_OK }
    }

    /// Apply a `/query` body; unknown keys yield no results
    pub fn handle_query(&self, request: QueryRequest) -> QueryResponse {
        QueryResponse {
            code: CODE_OK,
            results: self.lookup(&request.key),
        }
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn register(&self, key: &KeyMaterial, content: &[u8]) -> Result<(), DirectoryError> {
        self.check_available()?;
        let response = self.handle_register(RegisterRequest {
            key: key.as_bytes().to_vec(),
            content: content.to_vec(),
        });
        match response.code {
            CODE_OK => Ok(()),
            code => Err(DirectoryError::Rejected(code)),
        }
    }

    async fn query(&self, key: &KeyMaterial) -> Result<Vec<ReportRecord>, DirectoryError> {
        self.check_available()?;
        Ok(self
            .handle_query(QueryRequest {
                key: key.as_bytes().to_vec(),
            })
            .results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> KeyMaterial {
        KeyMaterial::from([byte; KEY_MATERIAL_LEN])
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = DirectoryConfig::default().with_base_url("http://localhost:8888/ble/");
        assert_eq!(config.endpoint("register"), "http://localhost:8888/ble/register");
        assert_eq!(
            DirectoryConfig::default().endpoint("query"),
            "https://bletracker.supportvector.com/ble/query"
        );
    }

    #[tokio::test]
    async fn test_memory_directory_register_then_query() {
        let dir = MemoryDirectory::new();
        dir.register(&key(1), b"one").await.expect("Register");
        dir.register(&key(1), b"two").await.expect("Register");
        dir.register(&key(2), b"other").await.expect("Register");

        let results = dir.query(&key(1)).await.expect("Query");
        let contents: Vec<&[u8]> = results.iter().map(|r| r.content.as_slice()).collect();
        assert_eq!(contents, vec![&b"one"[..], &b"two"[..]]);
        assert!(results.iter().all(|r| r.timestamp > 0));
        assert!(dir.query(&key(3)).await.expect("Query").is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_directory() {
        let dir = MemoryDirectory::new();
        dir.set_available(false);
        assert!(matches!(
            dir.register(&key(1), b"x").await,
            Err(DirectoryError::Unavailable(_))
        ));
        assert_eq!(dir.report_count(), 0);
    }

    #[test]
    fn test_register_rejects_short_key() {
        let dir = MemoryDirectory::new();
        let response = dir.handle_register(RegisterRequest {
            key: vec![1, 2, 3],
            content: vec![9],
        });
        assert_eq!(response.code, CODE_INVALID_KEY);
        assert_eq!(dir.report_count(), 0);
    }

    #[tokio::test]
    async fn test_http_directory_unreachable_is_unavailable() {
        // Port 9 (discard) on localhost is not expected to run an HTTP server
        let dir = HttpDirectory::new(
            DirectoryConfig::default()
                .with_base_url("http://127.0.0.1:9")
                .with_timeout(Duration::from_secs(2)),
        );
        assert!(matches!(
            dir.register(&key(1), b"x").await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
