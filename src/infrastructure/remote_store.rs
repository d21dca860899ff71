use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const CACHE_BUSTER_PARAM: &str = "_ts";

/// Whole-document access to the shared blob store.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// `Ok(None)` means the document does not exist yet.
    async fn fetch(&self, key: &str, cache_buster: &str) -> Result<Option<String>, InfraError>;

    async fn store(&self, key: &str, body: String) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestBlobTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestBlobTransport {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid remote base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "remote base url cannot be a base".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn document_endpoint(&self, key: &str) -> Result<Url, InfraError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(InfraError::InvalidInput("document key must not be empty".to_string()));
        }
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("remote base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push(key);
        }
        Ok(url)
    }

    fn status_error(status: StatusCode) -> InfraError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return InfraError::RateLimited;
        }
        InfraError::RemoteStatus {
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl BlobTransport for ReqwestBlobTransport {
    async fn fetch(&self, key: &str, cache_buster: &str) -> Result<Option<String>, InfraError> {
        let endpoint = self.document_endpoint(key)?;
        let response = self
            .client
            .get(endpoint)
            .query(&[(CACHE_BUSTER_PARAM, cache_buster)])
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|error| InfraError::Transport(format!("network error while fetching {key}: {error}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::status_error(status));
        }

        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Transport(format!("failed reading {key} response: {error}")))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(body))
    }

    async fn store(&self, key: &str, body: String) -> Result<(), InfraError> {
        let endpoint = self.document_endpoint(key)?;
        let response = self
            .client
            .put(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|error| InfraError::Transport(format!("network error while storing {key}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }
        Ok(())
    }
}

/// Stand-in used when no remote base URL is configured.
#[derive(Debug, Default)]
pub struct UnconfiguredBlobTransport;

#[async_trait]
impl BlobTransport for UnconfiguredBlobTransport {
    async fn fetch(&self, _key: &str, _cache_buster: &str) -> Result<Option<String>, InfraError> {
        Err(InfraError::Transport("no remote store configured".to_string()))
    }

    async fn store(&self, _key: &str, _body: String) -> Result<(), InfraError> {
        Err(InfraError::Transport("no remote store configured".to_string()))
    }
}

/// Process-local blob store. Several clients sharing one instance behave like
/// several devices sharing one remote.
#[derive(Debug)]
pub struct InMemoryBlobTransport {
    documents: Mutex<HashMap<String, String>>,
    online: AtomicBool,
    rate_limited_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    store_calls: AtomicUsize,
    cache_busters: Mutex<Vec<String>>,
}

impl Default for InMemoryBlobTransport {
    fn default() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            rate_limited_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            store_calls: AtomicUsize::new(0),
            cache_busters: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryBlobTransport {
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// The next `calls` requests answer with a rate-limit signal.
    pub fn rate_limit_next(&self, calls: usize) {
        self.rate_limited_calls.store(calls, Ordering::SeqCst);
    }

    pub fn document(&self, key: &str) -> Option<String> {
        self.documents.lock().ok()?.get(key).cloned()
    }

    pub fn put_document(&self, key: &str, body: impl Into<String>) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(key.to_string(), body.into());
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn cache_busters(&self) -> Vec<String> {
        self.cache_busters
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    fn gate(&self) -> Result<(), InfraError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(InfraError::Transport("network error: remote unreachable".to_string()));
        }
        let limited = self
            .rate_limited_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if limited {
            return Err(InfraError::RateLimited);
        }
        Ok(())
    }

    fn lock_documents(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, InfraError> {
        self.documents
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("in-memory remote: {error}")))
    }
}

#[async_trait]
impl BlobTransport for InMemoryBlobTransport {
    async fn fetch(&self, key: &str, cache_buster: &str) -> Result<Option<String>, InfraError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        if let Ok(mut busters) = self.cache_busters.lock() {
            busters.push(cache_buster.to_string());
        }
        Ok(self.lock_documents()?.get(key).cloned())
    }

    async fn store(&self, key: &str, body: String) -> Result<(), InfraError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.lock_documents()?.insert(key.to_string(), body);
        Ok(())
    }
}

/// Failure-absorbing client over a [`BlobTransport`].
///
/// `get_*` returns `None` when the remote could not be read and `Some(empty)`
/// when the document is simply absent. `put_*` returns `false` on any failure.
/// After a rate-limit signal every call short-circuits without I/O until the
/// cool-down window has passed; the first call after that clears the block.
pub struct RemoteStoreClient<T>
where
    T: BlobTransport + ?Sized,
{
    transport: Arc<T>,
    cooldown: chrono::Duration,
    blocked_until: Mutex<Option<DateTime<Utc>>>,
    request_sequence: AtomicU64,
    now_provider: NowProvider,
}

impl<T> RemoteStoreClient<T>
where
    T: BlobTransport + ?Sized,
{
    pub fn new(transport: Arc<T>, cooldown: std::time::Duration) -> Self {
        Self {
            transport,
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            blocked_until: Mutex::new(None),
            request_sequence: AtomicU64::new(0),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        self.blocked_until.lock().ok().and_then(|guard| *guard)
    }

    pub async fn get_collection<V>(&self, key: &str) -> Option<Vec<V>>
    where
        V: DeserializeOwned,
    {
        let body = self.fetch_raw(key).await?;
        let Some(body) = body else {
            return Some(Vec::new());
        };
        match serde_json::from_str::<Vec<V>>(&body) {
            Ok(items) => Some(items),
            Err(error) => {
                tracing::warn!(key, error = %error, "remote collection is not valid JSON; treating as unreachable");
                None
            }
        }
    }

    pub async fn put_collection<V>(&self, key: &str, items: &[V]) -> bool
    where
        V: Serialize + Sync,
    {
        match serde_json::to_string(items) {
            Ok(body) => self.store_raw(key, body).await,
            Err(error) => {
                tracing::warn!(key, error = %error, "failed to encode collection for upload");
                false
            }
        }
    }

    /// Absent documents come back as `V::default()`.
    pub async fn get_document<V>(&self, key: &str) -> Option<V>
    where
        V: DeserializeOwned + Default,
    {
        let body = self.fetch_raw(key).await?;
        let Some(body) = body else {
            return Some(V::default());
        };
        match serde_json::from_str::<V>(&body) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, error = %error, "remote document is not valid JSON; treating as unreachable");
                None
            }
        }
    }

    pub async fn put_document<V>(&self, key: &str, value: &V) -> bool
    where
        V: Serialize + Sync,
    {
        match serde_json::to_string(value) {
            Ok(body) => self.store_raw(key, body).await,
            Err(error) => {
                tracing::warn!(key, error = %error, "failed to encode document for upload");
                false
            }
        }
    }

    async fn fetch_raw(&self, key: &str) -> Option<Option<String>> {
        if !self.admit(key) {
            return None;
        }
        let cache_buster = self.next_cache_buster();
        match self.transport.fetch(key, &cache_buster).await {
            Ok(body) => Some(body),
            Err(error) => {
                self.record_failure(key, "get", &error);
                None
            }
        }
    }

    async fn store_raw(&self, key: &str, body: String) -> bool {
        if !self.admit(key) {
            return false;
        }
        match self.transport.store(key, body).await {
            Ok(()) => true,
            Err(error) => {
                self.record_failure(key, "put", &error);
                false
            }
        }
    }

    fn admit(&self, key: &str) -> bool {
        let Ok(mut blocked_until) = self.blocked_until.lock() else {
            return false;
        };
        let Some(until) = *blocked_until else {
            return true;
        };
        let now = (self.now_provider)();
        if now < until {
            tracing::debug!(key, %until, "remote call skipped during rate-limit cool-down");
            return false;
        }
        *blocked_until = None;
        true
    }

    fn record_failure(&self, key: &str, operation: &str, error: &InfraError) {
        if matches!(error, InfraError::RateLimited) {
            let until = (self.now_provider)() + self.cooldown;
            if let Ok(mut blocked_until) = self.blocked_until.lock() {
                *blocked_until = Some(until);
            }
            tracing::warn!(key, operation, %until, "remote store rate limited; cooling down");
            return;
        }
        tracing::warn!(key, operation, error = %error, "remote store call failed");
    }

    fn next_cache_buster(&self) -> String {
        let sequence = self.request_sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", (self.now_provider)().timestamp_millis())
    }
}
