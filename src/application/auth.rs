use crate::application::record_sync::{CycleOutcome, RemoteWrite};
use crate::domain::merge::{merge, same_contents, sort_newest_first};
use crate::domain::models::{Role, SessionIdentity, User};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCache, LocalStore};
use crate::infrastructure::remote_store::{BlobTransport, RemoteStoreClient};
use crate::infrastructure::session_store::SessionStore;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const MIN_PASSWORD_LENGTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub supervisor_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginSource {
    LocalCache,
    Remote,
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_ascii_lowercase()
}

/// Hex SHA-256 of `username:password`; the username acts as salt.
pub fn hash_password(username: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{}:{password}", normalize_username(username)).as_bytes());
    format!("{digest:x}")
}

pub struct AuthService<T, L, S>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
    S: SessionStore + ?Sized,
{
    remote: Arc<RemoteStoreClient<T>>,
    cache: LocalCache<L>,
    sessions: Arc<S>,
    users_key: String,
    now_provider: NowProvider,
}

impl<T, L, S> AuthService<T, L, S>
where
    T: BlobTransport + ?Sized,
    L: LocalStore + ?Sized,
    S: SessionStore + ?Sized,
{
    pub fn new(
        remote: Arc<RemoteStoreClient<T>>,
        cache: LocalCache<L>,
        sessions: Arc<S>,
        users_key: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            cache,
            sessions,
            users_key: users_key.into(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn register(&self, registration: Registration) -> Result<CycleOutcome<User>, InfraError> {
        let username = normalize_username(&registration.username);
        if username.is_empty() {
            return Err(InfraError::InvalidInput("username must not be empty".to_string()));
        }
        if registration.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(InfraError::InvalidInput(format!(
                "password must have at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let user = User {
            username: username.clone(),
            full_name: registration.full_name.trim().to_string(),
            role: registration.role,
            supervisor_name: registration
                .supervisor_name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            password_hash: hash_password(&username, &registration.password),
            created_at: (self.now_provider)(),
        };
        user.validate().map_err(InfraError::InvalidInput)?;

        let remote = self.remote.get_collection::<User>(&self.users_key).await;
        let remote_reachable = remote.is_some();
        let cached = self.cache.load_users();
        let mut users = match remote {
            Some(remote) => merge(remote, cached),
            None => cached,
        };
        if users.iter().any(|existing| existing.username == username) {
            return Err(InfraError::UsernameTaken(username));
        }

        users.push(user.clone());
        sort_newest_first(&mut users);
        if let Err(error) = self.cache.save_users(&users) {
            tracing::warn!(error = %error, "failed to write local user cache");
        }

        let write = if self.remote.put_collection(&self.users_key, &users).await {
            RemoteWrite::Pushed
        } else {
            tracing::warn!(username = %user.username, "registration saved locally; remote write deferred");
            RemoteWrite::Deferred
        };

        Ok(CycleOutcome {
            value: user,
            remote_reachable,
            write,
        })
    }

    /// Checks the cached user list first and only asks the remote when the
    /// cache cannot confirm the credentials. Either way the user lists of both
    /// tiers are reconciled once the remote answers.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(SessionIdentity, LoginSource), InfraError> {
        let username = normalize_username(username);
        if username.is_empty() || password.is_empty() {
            return Err(InfraError::InvalidCredentials);
        }
        let password_hash = hash_password(&username, password);

        let cached = self.cache.load_users();
        if let Some(user) = find_user(&cached, &username, &password_hash) {
            let identity = SessionIdentity::from(user);
            self.sessions.save_identity(&identity)?;
            self.sync_users().await;
            return Ok((identity, LoginSource::LocalCache));
        }

        let Some(remote) = self.remote.get_collection::<User>(&self.users_key).await else {
            return Err(InfraError::InvalidCredentials);
        };
        let (merged, _) = self.reconcile(remote, cached).await;

        let user = find_user(&merged, &username, &password_hash).ok_or(InfraError::InvalidCredentials)?;
        let identity = SessionIdentity::from(user);
        self.sessions.save_identity(&identity)?;
        Ok((identity, LoginSource::Remote))
    }

    /// Pulls the remote user list into the cache and pushes back users that
    /// only this device knows, such as a registration made offline. Returns
    /// `None` when the remote could not be read.
    pub async fn sync_users(&self) -> Option<RemoteWrite> {
        let remote = self.remote.get_collection::<User>(&self.users_key).await?;
        let cached = self.cache.load_users();
        let (_, write) = self.reconcile(remote, cached).await;
        Some(write)
    }

    async fn reconcile(&self, remote: Vec<User>, cached: Vec<User>) -> (Vec<User>, RemoteWrite) {
        let merged = merge(remote.clone(), cached);
        if let Err(error) = self.cache.save_users(&merged) {
            tracing::warn!(error = %error, "failed to write local user cache");
        }
        if same_contents(&merged, &remote) {
            return (merged, RemoteWrite::NotNeeded);
        }

        let write = if self.remote.put_collection(&self.users_key, &merged).await {
            tracing::debug!(users = merged.len(), "pushed locally known users");
            RemoteWrite::Pushed
        } else {
            tracing::warn!("local users not pushed; remote write deferred");
            RemoteWrite::Deferred
        };
        (merged, write)
    }

    pub fn logout(&self) -> Result<(), InfraError> {
        self.sessions.clear_identity()
    }

    pub fn current_identity(&self) -> Result<Option<SessionIdentity>, InfraError> {
        self.sessions.load_identity()
    }

    pub fn require_identity(&self) -> Result<SessionIdentity, InfraError> {
        self.current_identity()?.ok_or(InfraError::NotLoggedIn)
    }
}

fn find_user<'a>(users: &'a [User], username: &str, password_hash: &str) -> Option<&'a User> {
    users
        .iter()
        .find(|user| user.username == username && user.password_hash == password_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::fixtures::fixed_time;
    use crate::infrastructure::local_cache::InMemoryLocalStore;
    use crate::infrastructure::remote_store::InMemoryBlobTransport;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use std::time::Duration;

    type TestAuth = AuthService<InMemoryBlobTransport, InMemoryLocalStore, InMemorySessionStore>;

    fn auth_service(transport: &Arc<InMemoryBlobTransport>) -> (TestAuth, Arc<InMemorySessionStore>) {
        let remote = Arc::new(RemoteStoreClient::new(
            Arc::clone(transport),
            Duration::from_secs(30),
        ));
        let sessions = Arc::new(InMemorySessionStore::default());
        let service = AuthService::new(
            remote,
            LocalCache::new(Arc::new(InMemoryLocalStore::default())),
            Arc::clone(&sessions),
            "users",
        )
        .with_now_provider(Arc::new(|| fixed_time("2024-01-01T08:00:00Z")));
        (service, sessions)
    }

    fn registration(username: &str, role: Role) -> Registration {
        Registration {
            username: username.to_string(),
            password: "s3cret".to_string(),
            full_name: format!("{username} full name"),
            role,
            supervisor_name: Some("Bruno".to_string()),
        }
    }

    #[test]
    fn password_hash_is_stable_and_salted_by_username() {
        assert_eq!(hash_password("Ana", "pw"), hash_password(" ana ", "pw"));
        assert_ne!(hash_password("ana", "pw"), hash_password("bia", "pw"));
        assert_eq!(hash_password("ana", "pw").len(), 64);
    }

    #[tokio::test]
    async fn register_pushes_user_without_plaintext_password() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, _) = auth_service(&transport);

        let outcome = service
            .register(registration("Ana", Role::Employee))
            .await
            .expect("register");

        assert_eq!(outcome.write, RemoteWrite::Pushed);
        assert_eq!(outcome.value.username, "ana");
        let remote = transport.document("users").expect("users document");
        assert!(remote.contains("\"username\":\"ana\""));
        assert!(!remote.contains("s3cret"));
    }

    #[tokio::test]
    async fn register_rejects_taken_username_from_remote() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (first_device, _) = auth_service(&transport);
        first_device
            .register(registration("ana", Role::Employee))
            .await
            .expect("first registration");

        let (second_device, _) = auth_service(&transport);
        let result = second_device.register(registration("ANA", Role::Supervisor)).await;

        assert!(matches!(result, Err(InfraError::UsernameTaken(name)) if name == "ana"));
    }

    #[tokio::test]
    async fn register_rejects_short_password() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, _) = auth_service(&transport);
        let mut short = registration("ana", Role::Employee);
        short.password = "abc".to_string();

        assert!(matches!(service.register(short).await, Err(InfraError::InvalidInput(_))));
        assert_eq!(transport.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn login_uses_local_cache_before_remote() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, sessions) = auth_service(&transport);
        service
            .register(registration("ana", Role::Employee))
            .await
            .expect("register");
        transport.set_online(false);

        let (identity, source) = service.login("ana", "s3cret").await.expect("login");

        assert_eq!(source, LoginSource::LocalCache);
        assert_eq!(identity.username, "ana");
        assert_eq!(sessions.load_identity().expect("session"), Some(identity));
    }

    #[tokio::test]
    async fn login_falls_back_to_remote_for_users_registered_elsewhere() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (other_device, _) = auth_service(&transport);
        other_device
            .register(registration("bruno", Role::Supervisor))
            .await
            .expect("register elsewhere");

        let (service, _) = auth_service(&transport);
        let (identity, source) = service.login("Bruno", "s3cret").await.expect("login");

        assert_eq!(source, LoginSource::Remote);
        assert_eq!(identity.role, Role::Supervisor);

        transport.set_online(false);
        let (_, offline_source) = service.login("bruno", "s3cret").await.expect("offline login");
        assert_eq!(offline_source, LoginSource::LocalCache);
    }

    #[tokio::test]
    async fn login_failure_in_both_tiers_is_invalid_credentials() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, sessions) = auth_service(&transport);
        service
            .register(registration("ana", Role::Employee))
            .await
            .expect("register");

        let wrong_password = service.login("ana", "nope").await;
        let unknown_user = service.login("zoe", "s3cret").await;
        transport.set_online(false);
        let offline_unknown = service.login("zoe", "s3cret").await;

        assert!(matches!(wrong_password, Err(InfraError::InvalidCredentials)));
        assert!(matches!(unknown_user, Err(InfraError::InvalidCredentials)));
        assert!(matches!(offline_unknown, Err(InfraError::InvalidCredentials)));
        assert!(sessions.load_identity().expect("session").is_none());
    }

    #[tokio::test]
    async fn offline_registration_is_pushed_by_next_login() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, _) = auth_service(&transport);
        transport.set_online(false);
        let outcome = service
            .register(registration("ana", Role::Employee))
            .await
            .expect("register offline");
        assert!(outcome.saved_locally_only());
        assert!(transport.document("users").is_none());

        transport.set_online(true);
        service.login("ana", "s3cret").await.expect("login");

        let remote = transport.document("users").expect("users document");
        assert!(remote.contains("\"username\":\"ana\""));
    }

    #[tokio::test]
    async fn sync_users_writes_only_when_local_list_differs() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, _) = auth_service(&transport);
        service
            .register(registration("ana", Role::Employee))
            .await
            .expect("register");
        let stores_before = transport.store_calls();

        assert_eq!(service.sync_users().await, Some(RemoteWrite::NotNeeded));
        assert_eq!(transport.store_calls(), stores_before);

        transport.set_online(false);
        assert_eq!(service.sync_users().await, None);
    }

    #[tokio::test]
    async fn logout_clears_session_identity() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let (service, _) = auth_service(&transport);
        service
            .register(registration("ana", Role::Employee))
            .await
            .expect("register");
        service.login("ana", "s3cret").await.expect("login");

        service.logout().expect("logout");

        assert!(matches!(service.require_identity(), Err(InfraError::NotLoggedIn)));
    }
}
