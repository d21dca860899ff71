use crate::application::record_sync::RemoteWrite;
use crate::domain::models::{Record, WebhookConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCache, LocalStore};
use crate::infrastructure::remote_store::{BlobTransport, RemoteStoreClient};
use crate::infrastructure::webhook::WebhookNotifier;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

/// Mirrors newly created records to an externally configured URL. Delivery is
/// fire-and-forget and never feeds back into the sync state.
pub struct WebhookDispatcher<T, L>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
{
    notifier: Arc<dyn WebhookNotifier>,
    remote: Arc<RemoteStoreClient<T>>,
    cache: LocalCache<L>,
    config_key: String,
    /// Outer `None` means not resolved yet; `Some(None)` means no webhook.
    resolved_url: Mutex<Option<Option<String>>>,
}

impl<T, L> WebhookDispatcher<T, L>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
{
    pub fn new(
        notifier: Arc<dyn WebhookNotifier>,
        remote: Arc<RemoteStoreClient<T>>,
        cache: LocalCache<L>,
        config_key: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            remote,
            cache,
            config_key: config_key.into(),
            resolved_url: Mutex::new(None),
        }
    }

    /// Remote config first, then the locally remembered value. The answer,
    /// including "none configured", is kept for the lifetime of the
    /// dispatcher once the remote has responded.
    pub async fn resolve_url(&self) -> Option<String> {
        if let Some(resolved) = self.cached_url() {
            return resolved;
        }

        let remote_config = self
            .remote
            .get_document::<WebhookConfig>(&self.config_key)
            .await;
        let remote_answered = remote_config.is_some();
        let remote_url = remote_config
            .map(|config| config.google_sheet_url.trim().to_string())
            .filter(|url| !url.is_empty());

        let resolved = match remote_url {
            Some(url) => {
                if let Err(error) = self.cache.remember_webhook_url(&url) {
                    tracing::warn!(error = %error, "failed to remember webhook url locally");
                }
                Some(url)
            }
            None => self.cache.webhook_url(),
        };

        if remote_answered || resolved.is_some() {
            self.store_cached_url(resolved.clone());
        }
        resolved
    }

    /// An empty `url` clears the webhook on both tiers.
    pub async fn set_url(&self, url: &str) -> Result<RemoteWrite, InfraError> {
        let url = url.trim();
        if !url.is_empty() {
            Url::parse(url)
                .map_err(|error| InfraError::InvalidInput(format!("invalid webhook url: {error}")))?;
        }

        let document = WebhookConfig {
            google_sheet_url: url.to_string(),
        };
        let pushed = self.remote.put_document(&self.config_key, &document).await;
        self.cache.remember_webhook_url(url)?;
        self.store_cached_url((!url.is_empty()).then(|| url.to_string()));

        if pushed {
            Ok(RemoteWrite::Pushed)
        } else {
            tracing::warn!("webhook url saved locally; remote write deferred");
            Ok(RemoteWrite::Deferred)
        }
    }

    /// Resolves the URL and delivers on a spawned task, so the caller never
    /// waits on the remote. The handle lets a one-shot process wait before
    /// exiting; everyone else drops it.
    pub fn dispatch(self: &Arc<Self>, record: &Record) -> JoinHandle<()>
    where
        T: 'static,
        L: 'static,
    {
        let dispatcher = Arc::clone(self);
        let record = record.clone();
        tokio::spawn(async move {
            let Some(url) = dispatcher.resolve_url().await else {
                tracing::debug!(record_id = %record.id, "no webhook configured");
                return;
            };
            match dispatcher.notifier.notify(&url, &record).await {
                Ok(()) => tracing::debug!(record_id = %record.id, "webhook delivered"),
                Err(error) => {
                    tracing::warn!(record_id = %record.id, error = %error, "webhook delivery failed")
                }
            }
        })
    }

    fn cached_url(&self) -> Option<Option<String>> {
        self.resolved_url.lock().ok().and_then(|guard| guard.clone())
    }

    fn store_cached_url(&self, url: Option<String>) {
        if let Ok(mut guard) = self.resolved_url.lock() {
            *guard = Some(url);
        }
    }
}
