//! Read-merge-write cycles between the in-memory collection, the local cache
//! and the shared remote blob.
//!
//! None of the cycles are atomic. The remote offers whole-document GET/PUT
//! only, so between this device's fetch and its write another device may
//! write too, and the later write replaces the earlier one. Two overlapping
//! cycles on the same device behave the same way: no lock serializes them.

use crate::domain::merge::{merge, same_contents, sort_newest_first};
use crate::domain::models::{Record, RecordStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCache, LocalStore};
use crate::infrastructure::remote_store::{BlobTransport, RemoteStoreClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteWrite {
    Pushed,
    /// Remote already matched; nothing was written.
    NotNeeded,
    /// Kept locally only; a later cycle has to push it.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome<V> {
    pub value: V,
    pub remote_reachable: bool,
    pub write: RemoteWrite,
}

impl<V> CycleOutcome<V> {
    pub fn saved_locally_only(&self) -> bool {
        self.write == RemoteWrite::Deferred
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub last_synced: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub pending_push: bool,
    pub record_count: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    records: Vec<Record>,
    last_synced: Option<DateTime<Utc>>,
    pending_push: bool,
}

/// Sets the visible "syncing" flag for the lifetime of the guard, unless
/// another caller already holds it.
struct SyncIndicator<'a> {
    flag: &'a AtomicBool,
    owned: bool,
}

impl<'a> SyncIndicator<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        let owned = !flag.swap(true, Ordering::SeqCst);
        Self { flag, owned }
    }
}

impl Drop for SyncIndicator<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.flag.store(false, Ordering::SeqCst);
        }
    }
}

pub struct RecordSyncService<T, L>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
{
    remote: Arc<RemoteStoreClient<T>>,
    cache: LocalCache<L>,
    records_key: String,
    state: Mutex<SessionState>,
    syncing: AtomicBool,
    now_provider: NowProvider,
}

impl<T, L> RecordSyncService<T, L>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
{
    /// Seeds the in-memory collection from the local cache so callers can
    /// display something before the first remote fetch completes.
    pub fn new(
        remote: Arc<RemoteStoreClient<T>>,
        cache: LocalCache<L>,
        records_key: impl Into<String>,
    ) -> Self {
        let mut records = cache.load_records();
        sort_newest_first(&mut records);
        let last_synced = cache.last_synced();
        Self {
            remote,
            cache,
            records_key: records_key.into(),
            state: Mutex::new(SessionState {
                records,
                last_synced,
                pending_push: false,
            }),
            syncing: AtomicBool::new(false),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn records(&self) -> Result<Vec<Record>, InfraError> {
        Ok(self.lock_state()?.records.clone())
    }

    pub fn status(&self) -> Result<SyncStatus, InfraError> {
        let state = self.lock_state()?;
        Ok(SyncStatus {
            last_synced: state.last_synced,
            is_syncing: self.is_syncing(),
            pending_push: state.pending_push,
            record_count: state.records.len(),
        })
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Background variant: fetch, merge, cache. Never writes to the remote and
    /// never touches the visible syncing flag. Returns whether the remote was
    /// reachable.
    pub async fn refresh(&self) -> Result<bool, InfraError> {
        let Some(remote) = self.fetch_remote().await else {
            tracing::debug!("background refresh skipped; remote unavailable");
            return Ok(false);
        };
        let current = self.records()?;
        let merged = merge(remote, current);
        self.commit(merged, true)?;
        Ok(true)
    }

    /// Foreground variant used by "sync now" and right after login. Writes
    /// back only when the merged collection differs from the remote snapshot.
    pub async fn sync_now(&self) -> Result<CycleOutcome<Vec<Record>>, InfraError> {
        let _indicator = SyncIndicator::engage(&self.syncing);

        let Some(remote) = self.fetch_remote().await else {
            let state = self.lock_state()?;
            let write = if state.pending_push {
                RemoteWrite::Deferred
            } else {
                RemoteWrite::NotNeeded
            };
            return Ok(CycleOutcome {
                value: state.records.clone(),
                remote_reachable: false,
                write,
            });
        };

        let current = self.records()?;
        let merged = merge(remote.clone(), current);
        let pending = self.lock_state()?.pending_push;
        self.commit(merged.clone(), true)?;

        if !pending && same_contents(&merged, &remote) {
            return Ok(CycleOutcome {
                value: merged,
                remote_reachable: true,
                write: RemoteWrite::NotNeeded,
            });
        }

        let write = self.push(&merged).await?;
        Ok(CycleOutcome {
            value: merged,
            remote_reachable: true,
            write,
        })
    }

    pub async fn create_record(&self, record: Record) -> Result<CycleOutcome<Record>, InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        self.mutate("create_record", move |mut base| {
            if base.iter().any(|existing| existing.id == record.id) {
                return Err(InfraError::InvalidInput(format!(
                    "record id already exists: {}",
                    record.id
                )));
            }
            base.push(record.clone());
            Ok((base, record))
        })
        .await
    }

    /// `authorize` sees the freshest known copy of the record and may veto
    /// the change; a veto leaves every tier untouched.
    pub async fn update_status<A>(
        &self,
        record_id: &str,
        status: RecordStatus,
        authorize: A,
    ) -> Result<CycleOutcome<Record>, InfraError>
    where
        A: FnOnce(&Record) -> Result<(), InfraError> + Send,
    {
        let record_id = normalized_id(record_id)?;
        self.mutate("update_status", move |mut base| {
            let Some(target) = base.iter_mut().find(|record| record.id == record_id) else {
                return Err(InfraError::NotFound(format!("record {record_id}")));
            };
            authorize(target)?;
            target.status = status;
            let updated = target.clone();
            Ok((base, updated))
        })
        .await
    }

    pub async fn delete_record<A>(
        &self,
        record_id: &str,
        authorize: A,
    ) -> Result<CycleOutcome<Record>, InfraError>
    where
        A: FnOnce(&Record) -> Result<(), InfraError> + Send,
    {
        let record_id = normalized_id(record_id)?;
        self.mutate("delete_record", move |mut base| {
            let Some(position) = base.iter().position(|record| record.id == record_id) else {
                return Err(InfraError::NotFound(format!("record {record_id}")));
            };
            authorize(&base[position])?;
            let removed = base.remove(position);
            Ok((base, removed))
        })
        .await
    }

    /// Adds records from a pasted backup. Existing records always win over the
    /// backup's copies, so a stale backup cannot roll anything back. The whole
    /// payload is validated before any state changes.
    pub async fn import_records(&self, payload: &str) -> Result<CycleOutcome<usize>, InfraError> {
        let imported = parse_import(payload)?;
        self.mutate("import_records", move |base| {
            let before = base.len();
            let merged = merge(base, imported);
            let added = merged.len() - before;
            Ok((merged, added))
        })
        .await
    }

    pub fn export_records(&self) -> Result<String, InfraError> {
        let records = self.records()?;
        Ok(serde_json::to_string_pretty(&records)?)
    }

    async fn mutate<F, V>(&self, operation: &str, apply: F) -> Result<CycleOutcome<V>, InfraError>
    where
        F: FnOnce(Vec<Record>) -> Result<(Vec<Record>, V), InfraError>,
    {
        let remote = self.fetch_remote().await;
        let remote_reachable = remote.is_some();
        let current = self.records()?;
        let base = match remote {
            Some(remote) => merge(remote, current),
            None => current,
        };

        let (mut next, value) = apply(base)?;
        sort_newest_first(&mut next);
        self.commit(next.clone(), remote_reachable)?;

        let write = self.push(&next).await?;
        if write == RemoteWrite::Deferred {
            tracing::warn!(operation, "change saved locally; remote write deferred");
        } else {
            tracing::debug!(operation, records = next.len(), "change synchronized");
        }

        Ok(CycleOutcome {
            value,
            remote_reachable,
            write,
        })
    }

    async fn fetch_remote(&self) -> Option<Vec<Record>> {
        self.remote.get_collection::<Record>(&self.records_key).await
    }

    async fn push(&self, records: &[Record]) -> Result<RemoteWrite, InfraError> {
        let pushed = self.remote.put_collection(&self.records_key, records).await;
        let mut state = self.lock_state()?;
        state.pending_push = !pushed;
        if !pushed {
            return Ok(RemoteWrite::Deferred);
        }
        let now = (self.now_provider)();
        state.last_synced = Some(now);
        drop(state);
        self.persist_last_synced(now);
        Ok(RemoteWrite::Pushed)
    }

    /// Replaces the in-memory collection and writes it through to the cache.
    fn commit(&self, records: Vec<Record>, remote_seen: bool) -> Result<(), InfraError> {
        if let Err(error) = self.cache.save_records(&records) {
            tracing::warn!(error = %error, "failed to write local record cache");
        }
        let now = (self.now_provider)();
        {
            let mut state = self.lock_state()?;
            state.records = records;
            if remote_seen {
                state.last_synced = Some(now);
            }
        }
        if remote_seen {
            self.persist_last_synced(now);
        }
        Ok(())
    }

    fn persist_last_synced(&self, at: DateTime<Utc>) {
        if let Err(error) = self.cache.save_last_synced(at) {
            tracing::warn!(error = %error, "failed to persist last synced marker");
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("sync state: {error}")))
    }
}

fn normalized_id(record_id: &str) -> Result<String, InfraError> {
    let record_id = record_id.trim();
    if record_id.is_empty() {
        return Err(InfraError::InvalidInput("record id must not be empty".to_string()));
    }
    Ok(record_id.to_string())
}

pub fn parse_import(payload: &str) -> Result<Vec<Record>, InfraError> {
    if payload.trim().is_empty() {
        return Err(InfraError::InvalidImport("payload is empty".to_string()));
    }
    let records = serde_json::from_str::<Vec<Record>>(payload)
        .map_err(|error| InfraError::InvalidImport(format!("expected a JSON array of records: {error}")))?;
    for (index, record) in records.iter().enumerate() {
        record
            .validate()
            .map_err(|message| InfraError::InvalidImport(format!("record #{index}: {message}")))?;
    }
    Ok(records)
}
