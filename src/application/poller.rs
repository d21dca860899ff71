use crate::application::record_sync::RecordSyncService;
use crate::infrastructure::local_cache::LocalStore;
use crate::infrastructure::remote_store::BlobTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic silent refresh. Lives from login until [`SyncPoller::stop`].
pub struct SyncPoller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncPoller {
    /// The first refresh fires one full `interval` after spawning; the login
    /// cycle covers the moment of login itself.
    pub fn spawn<T, L>(service: Arc<RecordSyncService<T, L>>, interval: Duration) -> Self
    where
        T: BlobTransport + ?Sized + 'static,
        L: LocalStore + ?Sized + 'static,
    {
        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.refresh().await {
                            Ok(true) => tracing::debug!("background refresh merged remote snapshot"),
                            Ok(false) => tracing::debug!("background refresh found remote unavailable"),
                            Err(error) => tracing::warn!(error = %error, "background refresh failed"),
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the task and waits for it, so no refresh runs after this
    /// returns. An in-flight refresh is allowed to finish first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.handle.await {
            tracing::warn!(error = %error, "sync poller task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RecordStatus;
    use crate::domain::models::fixtures::sample_record;
    use crate::infrastructure::local_cache::{InMemoryLocalStore, LocalCache};
    use crate::infrastructure::remote_store::{InMemoryBlobTransport, RemoteStoreClient};

    fn service(
        transport: &Arc<InMemoryBlobTransport>,
    ) -> Arc<RecordSyncService<InMemoryBlobTransport, InMemoryLocalStore>> {
        let remote = Arc::new(RemoteStoreClient::new(
            Arc::clone(transport),
            Duration::from_secs(30),
        ));
        Arc::new(RecordSyncService::new(
            remote,
            LocalCache::new(Arc::new(InMemoryLocalStore::default())),
            "records",
        ))
    }

    fn publish_remote(transport: &InMemoryBlobTransport, ids: &[&str]) {
        let records = ids
            .iter()
            .map(|id| sample_record(id, "2024-01-01T00:00:00Z", RecordStatus::Pending))
            .collect::<Vec<_>>();
        transport.put_document("records", serde_json::to_string(&records).expect("encode"));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_pulls_remote_changes_each_interval() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let service = service(&transport);
        let poller = SyncPoller::spawn(Arc::clone(&service), Duration::from_secs(15));

        publish_remote(&transport, &["a"]);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(service.records().expect("records").is_empty());
        assert_eq!(transport.fetch_calls(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(service.records().expect("records").len(), 1);

        publish_remote(&transport, &["a", "b"]);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(service.records().expect("records").len(), 2);
        assert_eq!(transport.store_calls(), 0);
        assert!(!service.is_syncing());

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_poller_never_refreshes_again() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let service = service(&transport);
        let poller = SyncPoller::spawn(Arc::clone(&service), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(16)).await;
        let calls_before_stop = transport.fetch_calls();
        assert_eq!(calls_before_stop, 1);

        poller.stop().await;
        publish_remote(&transport, &["late"]);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(transport.fetch_calls(), calls_before_stop);
        assert!(service.records().expect("records").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_remote_keeps_poller_alive() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        transport.set_online(false);
        let service = service(&transport);
        let poller = SyncPoller::spawn(Arc::clone(&service), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(poller.is_running());
        assert_eq!(transport.fetch_calls(), 2);

        transport.set_online(true);
        publish_remote(&transport, &["a"]);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(service.records().expect("records").len(), 1);

        poller.stop().await;
    }
}
