//! Remote record store abstraction.
//!
//! The sync engine is format-agnostic about what the backend actually
//! speaks; it only needs per-record upload and per-collection download.
//! Uploads must be idempotent for CREATE/UPDATE given the same record id,
//! because at-least-once delivery means the same record can be retried.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tillpoint_types::{Operation, RecordId};
use tracing::debug;

/// The backend the engine synchronizes against.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Uploads one record write. Returns whether the remote accepted it.
    async fn upload_record(
        &self,
        table: &str,
        record_id: &RecordId,
        data: &Value,
        operation: Operation,
    ) -> SyncResult<bool>;

    /// Downloads the full contents of a collection.
    async fn download_collection(&self, table: &str) -> SyncResult<Vec<Value>>;
}

/// Configuration for the HTTP remote store.
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL of the backend API (e.g. `https://api.example.com`).
    pub base_url: String,
    /// Bearer token attached to every request, when set.
    pub bearer_token: Option<String>,
    /// Per-request timeout. Distinct from the monitor's probe timeouts.
    pub timeout: Duration,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Standard response envelope the backend wraps results in.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`RemoteStore`] against the TillPoint backend API.
pub struct HttpRemoteStore {
    config: HttpRemoteConfig,
    client: Client,
}

impl HttpRemoteStore {
    /// Creates a store for the given backend.
    pub fn new(config: HttpRemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url_for(&self, table: &str, record_id: Option<&RecordId>) -> String {
        let endpoint = endpoint_for_table(table);
        match record_id {
            Some(id) => format!("{}/api/{}/{}", self.config.base_url, endpoint, id),
            None => format!("{}/api/{}", self.config.base_url, endpoint),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn parse(&self, response: reqwest::Response) -> SyncResult<ApiResponse> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid response body: {e}")))?;
        Ok(body)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload_record(
        &self,
        table: &str,
        record_id: &RecordId,
        data: &Value,
        operation: Operation,
    ) -> SyncResult<bool> {
        debug!("uploading {} {}/{}", operation, table, record_id);

        let request = match operation {
            Operation::Create => self.client.post(self.url_for(table, None)).json(data),
            Operation::Update => self
                .client
                .put(self.url_for(table, Some(record_id)))
                .json(data),
            Operation::Delete => self.client.delete(self.url_for(table, Some(record_id))),
        };

        let response = self.authorize(request).send().await?;
        let body = self.parse(response).await?;
        if !body.success {
            debug!(
                "remote declined {}/{}: {}",
                table,
                record_id,
                body.error.as_deref().unwrap_or("no reason given")
            );
        }
        Ok(body.success)
    }

    async fn download_collection(&self, table: &str) -> SyncResult<Vec<Value>> {
        debug!("downloading collection {}", table);

        let request = self.client.get(self.url_for(table, None));
        let response = self.authorize(request).send().await?;
        let body = self.parse(response).await?;

        if !body.success {
            return Err(SyncError::Remote {
                status: 200,
                message: body
                    .error
                    .unwrap_or_else(|| format!("download of {table} rejected")),
            });
        }

        match body.data {
            Some(Value::Array(records)) => Ok(records),
            Some(other) => Err(SyncError::Network(format!(
                "expected an array for {table}, got {other}"
            ))),
            None => Ok(Vec::new()),
        }
    }
}

/// Maps a table name to its backend endpoint.
fn endpoint_for_table(table: &str) -> &str {
    match table {
        "categories" => "products/categories",
        // Order items travel inside their order.
        "order_items" => "orders",
        other => other,
    }
}

/// A scriptable in-memory remote for testing.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records uploads and serves canned collections; can be scripted to
    /// fail or decline.
    #[derive(Default)]
    pub struct MockRemoteStore {
        uploads: Mutex<Vec<(String, RecordId, Operation, Value)>>,
        collections: Mutex<HashMap<String, Vec<Value>>>,
        fail_next: AtomicU32,
        decline_next: AtomicU32,
        permanent_failure: Mutex<Option<u16>>,
    }

    impl MockRemoteStore {
        /// Creates a mock that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `n` calls fail with a transient network error.
        pub fn fail_next(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Makes the next `n` uploads return `Ok(false)`.
        pub fn decline_next(&self, n: u32) {
            self.decline_next.store(n, Ordering::SeqCst);
        }

        /// Makes every call fail with the given HTTP status.
        pub fn always_fail_with(&self, status: u16) {
            *self.permanent_failure.lock().unwrap() = Some(status);
        }

        /// Serves the given records for a collection download.
        pub fn set_collection(&self, table: impl Into<String>, records: Vec<Value>) {
            self.collections.lock().unwrap().insert(table.into(), records);
        }

        /// Uploads observed so far, in order.
        pub fn uploads(&self) -> Vec<(String, RecordId, Operation, Value)> {
            self.uploads.lock().unwrap().clone()
        }

        fn check_scripted_failure(&self) -> SyncResult<()> {
            if let Some(status) = *self.permanent_failure.lock().unwrap() {
                return Err(SyncError::Remote {
                    status,
                    message: "scripted failure".to_string(),
                });
            }
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SyncError::Network("scripted failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemoteStore {
        async fn upload_record(
            &self,
            table: &str,
            record_id: &RecordId,
            data: &Value,
            operation: Operation,
        ) -> SyncResult<bool> {
            self.check_scripted_failure()?;
            if self
                .decline_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(false);
            }
            self.uploads.lock().unwrap().push((
                table.to_string(),
                *record_id,
                operation,
                data.clone(),
            ));
            Ok(true)
        }

        async fn download_collection(&self, table: &str) -> SyncResult<Vec<Value>> {
            self.check_scripted_failure()?;
            Ok(self
                .collections
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default())
        }
    }
}
