use crate::domain::models::{Record, User};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const RECORDS_CACHE_KEY: &str = "overtime.records";
pub const USERS_CACHE_KEY: &str = "overtime.users";
pub const WEBHOOK_URL_KEY: &str = "overtime.webhook_url";
pub const LAST_SYNCED_KEY: &str = "overtime.last_synced";

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    db_path: PathBuf,
}

impl SqliteLocalStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("local store: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("local store: {error}")))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("local store: {error}")))?;
        values.remove(key);
        Ok(())
    }
}

/// Typed view over a [`LocalStore`]. Reads never fail: anything missing or
/// unreadable comes back empty.
pub struct LocalCache<L>
where
    L: LocalStore + ?Sized,
{
    store: Arc<L>,
}

impl<L> Clone for LocalCache<L>
where
    L: LocalStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<L> LocalCache<L>
where
    L: LocalStore + ?Sized,
{
    pub fn new(store: Arc<L>) -> Self {
        Self { store }
    }

    pub fn load_records(&self) -> Vec<Record> {
        self.load_collection(RECORDS_CACHE_KEY)
    }

    pub fn save_records(&self, records: &[Record]) -> Result<(), InfraError> {
        self.save_collection(RECORDS_CACHE_KEY, records)
    }

    pub fn load_users(&self) -> Vec<User> {
        self.load_collection(USERS_CACHE_KEY)
    }

    pub fn save_users(&self, users: &[User]) -> Result<(), InfraError> {
        self.save_collection(USERS_CACHE_KEY, users)
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.read_raw(WEBHOOK_URL_KEY)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn remember_webhook_url(&self, url: &str) -> Result<(), InfraError> {
        let url = url.trim();
        if url.is_empty() {
            return self.store.remove(WEBHOOK_URL_KEY);
        }
        self.store.set(WEBHOOK_URL_KEY, url)
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        let raw = self.read_raw(LAST_SYNCED_KEY)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }

    pub fn save_last_synced(&self, at: DateTime<Utc>) -> Result<(), InfraError> {
        self.store.set(LAST_SYNCED_KEY, &at.to_rfc3339())
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key, error = %error, "local store read failed");
                None
            }
        }
    }

    fn load_collection<T>(&self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.read_raw(key) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(items) => items,
            Err(error) => {
                tracing::warn!(key, error = %error, "discarding unreadable cached collection");
                Vec::new()
            }
        }
    }

    fn save_collection<T>(&self, key: &str, items: &[T]) -> Result<(), InfraError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(items)?;
        self.store.set(key, &payload)
    }
}
