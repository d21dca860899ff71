use crate::application::auth::{AuthService, LoginSource, Registration};
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::dashboard::{DashboardSummary, summarize};
use crate::application::poller::SyncPoller;
use crate::application::record_sync::{RecordSyncService, RemoteWrite, SyncStatus};
use crate::application::webhook_dispatch::WebhookDispatcher;
use crate::domain::access::{can_delete, can_review, visible_records};
use crate::domain::duration::overtime_minutes;
use crate::domain::models::{Record, RecordStatus, Role, SessionIdentity};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCache, LocalStore, SqliteLocalStore};
use crate::infrastructure::remote_store::{
    BlobTransport, RemoteStoreClient, ReqwestBlobTransport, UnconfiguredBlobTransport,
};
use crate::infrastructure::session_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::webhook::{ReqwestWebhookNotifier, WebhookNotifier};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Ids are minted on the device, so the process id keeps two devices that
/// submit in the same microsecond apart.
fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}-{}-{}-{sequence}",
        Utc::now().timestamp_micros(),
        std::process::id()
    )
}

pub type SharedRecordSync = RecordSyncService<dyn BlobTransport, dyn LocalStore>;

/// Concrete adapters behind every service. Production wiring lives in
/// [`AppState::new`]; tests pass in-memory doubles.
pub struct AppParts {
    pub transport: Arc<dyn BlobTransport>,
    pub local_store: Arc<dyn LocalStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn WebhookNotifier>,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    records: Arc<SharedRecordSync>,
    auth: AuthService<dyn BlobTransport, dyn LocalStore, dyn SessionStore>,
    webhooks: Arc<WebhookDispatcher<dyn BlobTransport, dyn LocalStore>>,
    poller: tokio::sync::Mutex<Option<SyncPoller>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let transport: Arc<dyn BlobTransport> = if bootstrap.config.remote_base_url.is_empty() {
            tracing::warn!("no remoteBaseUrl configured; running with the local cache only");
            Arc::new(UnconfiguredBlobTransport)
        } else {
            Arc::new(ReqwestBlobTransport::new(&bootstrap.config.remote_base_url)?)
        };
        let parts = AppParts {
            transport,
            local_store: Arc::new(SqliteLocalStore::new(&bootstrap.database_path)),
            sessions: Arc::new(KeyringSessionStore::default()),
            notifier: Arc::new(ReqwestWebhookNotifier::new()),
        };
        Ok(Self::from_parts(bootstrap, parts))
    }

    pub fn from_parts(bootstrap: BootstrapResult, parts: AppParts) -> Self {
        let config = bootstrap.config;
        let remote = Arc::new(RemoteStoreClient::new(
            parts.transport,
            config.rate_limit_cooldown,
        ));
        let cache = LocalCache::new(parts.local_store);

        let records = Arc::new(RecordSyncService::new(
            Arc::clone(&remote),
            cache.clone(),
            config.records_key.clone(),
        ));
        let auth = AuthService::new(
            Arc::clone(&remote),
            cache.clone(),
            parts.sessions,
            config.users_key.clone(),
        );
        let webhooks = Arc::new(WebhookDispatcher::new(
            parts.notifier,
            remote,
            cache,
            config.config_key.clone(),
        ));

        Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            records,
            auth,
            webhooks,
            poller: tokio::sync::Mutex::new(None),
            deliveries: Mutex::new(Vec::new()),
            log_guard: Mutex::new(()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_warn(&self, command: &str, message: &str) {
        self.append_log("warn", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    /// Waits for webhook deliveries started by earlier commands. A one-shot
    /// process calls this before exiting so deliveries are not cut off.
    pub async fn drain_background(&self) {
        let pending = match self.deliveries.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for handle in pending {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "webhook delivery task ended abnormally");
            }
        }
    }

    fn track_delivery(&self, handle: JoinHandle<()>) {
        if let Ok(mut guard) = self.deliveries.lock() {
            guard.retain(|pending| !pending.is_finished());
            guard.push(handle);
        }
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn warn_if_deferred(&self, command: &str, write: RemoteWrite) {
        if write == RemoteWrite::Deferred {
            self.log_warn(command, "saved locally, will sync later");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub username: String,
    pub role: Role,
    pub saved_locally_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub identity: SessionIdentity,
    pub checked_remote_users: bool,
    pub remote_reachable: bool,
    pub record_count: usize,
    pub write: RemoteWrite,
    pub polling: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitRecordRequest {
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub reason: String,
    pub employee_name: Option<String>,
    pub supervisor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResponse {
    pub record: Record,
    pub remote_reachable: bool,
    pub saved_locally_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub record_count: usize,
    pub remote_reachable: bool,
    pub write: RemoteWrite,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub added: usize,
    pub saved_locally_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub url: Option<String>,
    pub saved_locally_only: bool,
}

pub async fn register_impl(
    state: &AppState,
    username: String,
    password: String,
    full_name: String,
    role: String,
    supervisor_name: Option<String>,
) -> Result<RegisterResponse, InfraError> {
    let role = Role::parse(&role).map_err(InfraError::InvalidInput)?;
    let outcome = state
        .auth
        .register(Registration {
            username,
            password,
            full_name,
            role,
            supervisor_name,
        })
        .await?;

    state.log_info(
        "register",
        &format!("registered username={}", outcome.value.username),
    );
    state.warn_if_deferred("register", outcome.write);
    Ok(RegisterResponse {
        username: outcome.value.username.clone(),
        role: outcome.value.role,
        saved_locally_only: outcome.saved_locally_only(),
    })
}

/// Authenticates, runs the login sync cycle and optionally starts the
/// background poller.
pub async fn login_impl(
    state: &AppState,
    username: String,
    password: String,
    start_polling: bool,
) -> Result<LoginResponse, InfraError> {
    let (identity, source) = state.auth.login(&username, &password).await?;
    let outcome = state.records.sync_now().await?;
    let polling = if start_polling {
        start_polling_impl(state).await?;
        true
    } else {
        false
    };

    state.log_info(
        "login",
        &format!(
            "username={} records={} remote_reachable={}",
            identity.username,
            outcome.value.len(),
            outcome.remote_reachable
        ),
    );
    state.warn_if_deferred("login", outcome.write);
    Ok(LoginResponse {
        identity,
        checked_remote_users: source == LoginSource::Remote,
        remote_reachable: outcome.remote_reachable,
        record_count: outcome.value.len(),
        write: outcome.write,
        polling,
    })
}

/// Returns whether a poller was running.
pub async fn logout_impl(state: &AppState) -> Result<bool, InfraError> {
    let was_polling = stop_polling_impl(state).await;
    state.auth.logout()?;
    state.log_info("logout", "session cleared");
    Ok(was_polling)
}

pub fn current_identity_impl(state: &AppState) -> Result<Option<SessionIdentity>, InfraError> {
    state.auth.current_identity()
}

/// Returns `false` when a poller was already running.
pub async fn start_polling_impl(state: &AppState) -> Result<bool, InfraError> {
    state.auth.require_identity()?;
    let mut poller = state.poller.lock().await;
    if poller.as_ref().is_some_and(SyncPoller::is_running) {
        return Ok(false);
    }
    *poller = Some(SyncPoller::spawn(
        Arc::clone(&state.records),
        state.config.poll_interval,
    ));
    Ok(true)
}

pub async fn stop_polling_impl(state: &AppState) -> bool {
    let poller = state.poller.lock().await.take();
    match poller {
        Some(poller) => {
            poller.stop().await;
            true
        }
        None => false,
    }
}

pub async fn submit_record_impl(
    state: &AppState,
    request: SubmitRecordRequest,
) -> Result<RecordResponse, InfraError> {
    let identity = state.auth.require_identity()?;
    let duration_minutes = overtime_minutes(
        &request.start_date,
        &request.start_time,
        &request.end_date,
        &request.end_time,
    )
    .map_err(InfraError::InvalidInput)?;
    if duration_minutes == 0 {
        return Err(InfraError::InvalidInput(
            "overtime must end after it starts".to_string(),
        ));
    }

    let record = Record {
        id: next_id("ot"),
        created_at: Utc::now(),
        owner_username: identity.username.clone(),
        employee_name: non_empty(request.employee_name).unwrap_or_else(|| identity.full_name.clone()),
        supervisor: non_empty(request.supervisor)
            .or_else(|| identity.supervisor_name.clone())
            .unwrap_or_default(),
        start_date: request.start_date.trim().to_string(),
        start_time: request.start_time.trim().to_string(),
        end_date: request.end_date.trim().to_string(),
        end_time: request.end_time.trim().to_string(),
        duration_minutes,
        reason: request.reason.trim().to_string(),
        status: RecordStatus::Pending,
    };

    let outcome = state.records.create_record(record).await?;
    state.track_delivery(state.webhooks.dispatch(&outcome.value));

    state.log_info(
        "submit_record",
        &format!(
            "created record_id={} minutes={}",
            outcome.value.id, outcome.value.duration_minutes
        ),
    );
    state.warn_if_deferred("submit_record", outcome.write);
    Ok(RecordResponse {
        saved_locally_only: outcome.saved_locally_only(),
        remote_reachable: outcome.remote_reachable,
        record: outcome.value,
    })
}

pub async fn update_status_impl(
    state: &AppState,
    record_id: String,
    status: String,
) -> Result<RecordResponse, InfraError> {
    let identity = state.auth.require_identity()?;
    let status = RecordStatus::parse(&status).map_err(InfraError::InvalidInput)?;
    if status == RecordStatus::Pending {
        return Err(InfraError::InvalidInput(
            "a record can only be approved or rejected".to_string(),
        ));
    }

    let reviewer = identity.clone();
    let outcome = state
        .records
        .update_status(&record_id, status, move |record| {
            if can_review(&reviewer, record) {
                Ok(())
            } else {
                Err(InfraError::Forbidden(format!(
                    "{} cannot review record {}",
                    reviewer.username, record.id
                )))
            }
        })
        .await?;

    state.log_info(
        "update_status",
        &format!(
            "record_id={} status={} by={}",
            outcome.value.id,
            outcome.value.status.as_str(),
            identity.username
        ),
    );
    state.warn_if_deferred("update_status", outcome.write);
    Ok(RecordResponse {
        saved_locally_only: outcome.saved_locally_only(),
        remote_reachable: outcome.remote_reachable,
        record: outcome.value,
    })
}

pub async fn delete_record_impl(state: &AppState, record_id: String) -> Result<RecordResponse, InfraError> {
    let identity = state.auth.require_identity()?;
    let requester = identity.clone();
    let outcome = state
        .records
        .delete_record(&record_id, move |record| {
            if can_delete(&requester, record) {
                Ok(())
            } else {
                Err(InfraError::Forbidden(format!(
                    "only the owner can delete record {} while it is pending",
                    record.id
                )))
            }
        })
        .await?;

    state.log_info(
        "delete_record",
        &format!("deleted record_id={} by={}", outcome.value.id, identity.username),
    );
    state.warn_if_deferred("delete_record", outcome.write);
    Ok(RecordResponse {
        saved_locally_only: outcome.saved_locally_only(),
        remote_reachable: outcome.remote_reachable,
        record: outcome.value,
    })
}

pub fn list_records_impl(state: &AppState) -> Result<Vec<Record>, InfraError> {
    let identity = state.auth.require_identity()?;
    let records = state.records.records()?;
    Ok(visible_records(&identity, &records))
}

pub fn summary_impl(state: &AppState) -> Result<DashboardSummary, InfraError> {
    let visible = list_records_impl(state)?;
    Ok(summarize(&visible))
}

pub async fn sync_now_impl(state: &AppState) -> Result<SyncResponse, InfraError> {
    state.auth.require_identity()?;
    let outcome = state.records.sync_now().await?;
    if let Some(users_write) = state.auth.sync_users().await {
        state.warn_if_deferred("sync_users", users_write);
    }
    state.log_info(
        "sync_now",
        &format!(
            "records={} remote_reachable={} write={:?}",
            outcome.value.len(),
            outcome.remote_reachable,
            outcome.write
        ),
    );
    state.warn_if_deferred("sync_now", outcome.write);
    Ok(SyncResponse {
        record_count: outcome.value.len(),
        remote_reachable: outcome.remote_reachable,
        write: outcome.write,
    })
}

pub fn sync_status_impl(state: &AppState) -> Result<SyncStatus, InfraError> {
    state.records.status()
}

pub fn export_records_impl(state: &AppState) -> Result<String, InfraError> {
    state.auth.require_identity()?;
    let exported = state.records.export_records()?;
    state.log_info("export_records", "exported record collection");
    Ok(exported)
}

pub async fn import_records_impl(state: &AppState, payload: String) -> Result<ImportResponse, InfraError> {
    state.auth.require_identity()?;
    let outcome = state.records.import_records(&payload).await?;
    state.log_info("import_records", &format!("imported added={}", outcome.value));
    state.warn_if_deferred("import_records", outcome.write);
    Ok(ImportResponse {
        added: outcome.value,
        saved_locally_only: outcome.saved_locally_only(),
    })
}

/// Coordinators only.
pub async fn set_webhook_url_impl(state: &AppState, url: String) -> Result<WebhookResponse, InfraError> {
    let identity = state.auth.require_identity()?;
    if identity.role != Role::Coordinator {
        return Err(InfraError::Forbidden(
            "only coordinators can configure the webhook".to_string(),
        ));
    }
    let write = state.webhooks.set_url(&url).await?;
    state.log_info("set_webhook_url", "webhook url updated");
    state.warn_if_deferred("set_webhook_url", write);
    Ok(WebhookResponse {
        url: non_empty(Some(url)),
        saved_locally_only: write == RemoteWrite::Deferred,
    })
}

pub async fn webhook_url_impl(state: &AppState) -> Result<Option<String>, InfraError> {
    state.auth.require_identity()?;
    Ok(state.webhooks.resolve_url().await)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bootstrap::bootstrap_workspace_with_lookup;
    use crate::infrastructure::remote_store::InMemoryBlobTransport;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebhookNotifier for CountingNotifier {
        async fn notify(&self, _url: &str, _record: &Record) -> Result<(), InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "overtime-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(
            &self,
            transport: &Arc<InMemoryBlobTransport>,
            notifier: &Arc<CountingNotifier>,
        ) -> AppState {
            let bootstrap =
                bootstrap_workspace_with_lookup(&self.path, |_| None).expect("bootstrap workspace");
            let local_store = Arc::new(SqliteLocalStore::new(&bootstrap.database_path));
            AppState::from_parts(
                bootstrap,
                AppParts {
                    transport: Arc::clone(transport) as Arc<dyn BlobTransport>,
                    local_store,
                    sessions: Arc::new(InMemorySessionStore::default()),
                    notifier: Arc::clone(notifier) as Arc<dyn WebhookNotifier>,
                },
            )
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    struct Fixture {
        _workspace: TempWorkspace,
        transport: Arc<InMemoryBlobTransport>,
        notifier: Arc<CountingNotifier>,
        state: AppState,
    }

    fn fixture_with(transport: &Arc<InMemoryBlobTransport>) -> Fixture {
        let workspace = TempWorkspace::new();
        let notifier = Arc::new(CountingNotifier::default());
        let state = workspace.app_state(transport, &notifier);
        Fixture {
            _workspace: workspace,
            transport: Arc::clone(transport),
            notifier,
            state,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(&Arc::new(InMemoryBlobTransport::default()))
    }

    async fn register_and_login(state: &AppState, username: &str, full_name: &str, role: &str) {
        register_impl(
            state,
            username.to_string(),
            "s3cret".to_string(),
            full_name.to_string(),
            role.to_string(),
            Some("Bruno".to_string()),
        )
        .await
        .expect("register");
        login_impl(state, username.to_string(), "s3cret".to_string(), false)
            .await
            .expect("login");
    }

    fn evening_request() -> SubmitRecordRequest {
        SubmitRecordRequest {
            start_date: "2024-01-01".to_string(),
            start_time: "23:30".to_string(),
            end_date: "2024-01-02".to_string(),
            end_time: "00:15".to_string(),
            reason: "deploy window".to_string(),
            ..SubmitRecordRequest::default()
        }
    }

    #[tokio::test]
    async fn commands_require_login() {
        let fixture = fixture();

        let result = submit_record_impl(&fixture.state, evening_request()).await;

        assert!(matches!(result, Err(InfraError::NotLoggedIn)));
        assert!(matches!(list_records_impl(&fixture.state), Err(InfraError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn submit_computes_duration_and_links_supervisor() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;

        let response = submit_record_impl(&fixture.state, evening_request())
            .await
            .expect("submit");

        assert_eq!(response.record.duration_minutes, 45);
        assert_eq!(response.record.status, RecordStatus::Pending);
        assert_eq!(response.record.owner_username, "ana");
        assert_eq!(response.record.employee_name, "Ana Souza");
        assert_eq!(response.record.supervisor, "Bruno");
        assert!(!response.saved_locally_only);
        assert!(
            fixture
                .transport
                .document("records")
                .expect("records document")
                .contains(&response.record.id)
        );
    }

    #[tokio::test]
    async fn submit_rejects_non_positive_duration() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;
        let mut request = evening_request();
        request.end_date = "2024-01-01".to_string();
        request.end_time = "22:00".to_string();

        let result = submit_record_impl(&fixture.state, request).await;

        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn offline_submit_is_saved_locally_and_logged() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;
        fixture.transport.set_online(false);

        let response = submit_record_impl(&fixture.state, evening_request())
            .await
            .expect("submit offline");

        assert!(response.saved_locally_only);
        assert_eq!(list_records_impl(&fixture.state).expect("list").len(), 1);
        assert!(sync_status_impl(&fixture.state).expect("status").pending_push);
        let log = fs::read_to_string(fixture.state.logs_dir.join("commands.log")).expect("read log");
        assert!(log.contains("saved locally, will sync later"));

        fixture.transport.set_online(true);
        let sync = sync_now_impl(&fixture.state).await.expect("sync");
        assert_eq!(sync.write, RemoteWrite::Pushed);
        assert!(!sync_status_impl(&fixture.state).expect("status").pending_push);
    }

    #[tokio::test]
    async fn user_registered_offline_can_log_in_from_another_device() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let first = fixture_with(&transport);
        transport.set_online(false);
        let registered = register_impl(
            &first.state,
            "ana".to_string(),
            "s3cret".to_string(),
            "Ana Souza".to_string(),
            "employee".to_string(),
            None,
        )
        .await
        .expect("register offline");
        assert!(registered.saved_locally_only);

        transport.set_online(true);
        login_impl(&first.state, "ana".to_string(), "s3cret".to_string(), false)
            .await
            .expect("login on first device");

        let second = fixture_with(&transport);
        let login = login_impl(&second.state, "ana".to_string(), "s3cret".to_string(), false)
            .await
            .expect("login on second device");
        assert!(login.checked_remote_users);
        assert_eq!(login.identity.full_name, "Ana Souza");
    }

    #[tokio::test]
    async fn sync_now_publishes_users_known_only_locally() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let first = fixture_with(&transport);
        transport.set_online(false);
        register_and_login(&first.state, "ana", "Ana Souza", "employee").await;
        assert!(transport.document("users").is_none());

        transport.set_online(true);
        sync_now_impl(&first.state).await.expect("sync now");

        let second = fixture_with(&transport);
        login_impl(&second.state, "ana".to_string(), "s3cret".to_string(), false)
            .await
            .expect("login on second device");
    }

    #[tokio::test]
    async fn supervisor_reviews_only_linked_records() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let employee = fixture_with(&transport);
        register_and_login(&employee.state, "ana", "Ana Souza", "employee").await;
        let submitted = submit_record_impl(&employee.state, evening_request())
            .await
            .expect("submit")
            .record;

        let other_supervisor = fixture_with(&transport);
        register_and_login(&other_supervisor.state, "dora", "Dora", "supervisor").await;
        let denied =
            update_status_impl(&other_supervisor.state, submitted.id.clone(), "approve".to_string()).await;
        assert!(matches!(denied, Err(InfraError::Forbidden(_))));
        assert!(list_records_impl(&other_supervisor.state).expect("list").is_empty());

        let supervisor = fixture_with(&transport);
        register_and_login(&supervisor.state, "bruno", "Bruno", "supervisor").await;
        let approved = update_status_impl(&supervisor.state, submitted.id.clone(), "approve".to_string())
            .await
            .expect("approve");
        assert_eq!(approved.record.status, RecordStatus::Approved);

        let employee_denied =
            update_status_impl(&employee.state, submitted.id.clone(), "reject".to_string()).await;
        assert!(matches!(employee_denied, Err(InfraError::Forbidden(_))));

        sync_now_impl(&employee.state).await.expect("employee sync");
        let summary = summary_impl(&employee.state).expect("summary");
        assert_eq!(summary.approved_count, 1);
        assert_eq!(summary.approved_minutes, 45);
    }

    #[tokio::test]
    async fn owner_cannot_delete_after_review() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let employee = fixture_with(&transport);
        register_and_login(&employee.state, "ana", "Ana Souza", "employee").await;
        let first = submit_record_impl(&employee.state, evening_request())
            .await
            .expect("submit first")
            .record;
        let second = submit_record_impl(&employee.state, evening_request())
            .await
            .expect("submit second")
            .record;

        let coordinator = fixture_with(&transport);
        register_and_login(&coordinator.state, "lia", "Lia", "coordinator").await;
        update_status_impl(&coordinator.state, first.id.clone(), "reject".to_string())
            .await
            .expect("reject");

        let denied = delete_record_impl(&employee.state, first.id.clone()).await;
        assert!(matches!(denied, Err(InfraError::Forbidden(_))));
        let deleted = delete_record_impl(&employee.state, second.id.clone())
            .await
            .expect("delete pending");
        assert_eq!(deleted.record.id, second.id);

        let remaining = list_records_impl(&employee.state).expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, first.id);
    }

    #[tokio::test]
    async fn export_then_import_restores_records_on_another_workspace() {
        let employee = fixture();
        register_and_login(&employee.state, "ana", "Ana Souza", "employee").await;
        submit_record_impl(&employee.state, evening_request())
            .await
            .expect("submit");
        let backup = export_records_impl(&employee.state).expect("export");

        let restored = fixture();
        register_and_login(&restored.state, "ana", "Ana Souza", "employee").await;
        let imported = import_records_impl(&restored.state, backup.clone())
            .await
            .expect("import");
        let repeated = import_records_impl(&restored.state, backup).await.expect("reimport");

        assert_eq!(imported.added, 1);
        assert_eq!(repeated.added, 0);
        assert_eq!(list_records_impl(&restored.state).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn malformed_import_changes_nothing() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;
        let stores_before = fixture.transport.store_calls();

        let result = import_records_impl(&fixture.state, "{\"not\":\"an array\"}".to_string()).await;

        assert!(matches!(result, Err(InfraError::InvalidImport(_))));
        assert_eq!(fixture.transport.store_calls(), stores_before);
    }

    #[tokio::test]
    async fn webhook_fires_after_coordinator_configures_it() {
        let transport = Arc::new(InMemoryBlobTransport::default());
        let coordinator = fixture_with(&transport);
        register_and_login(&coordinator.state, "lia", "Lia", "coordinator").await;
        set_webhook_url_impl(&coordinator.state, "https://hooks.example.test/sheet".to_string())
            .await
            .expect("set webhook");

        let employee = fixture_with(&transport);
        register_and_login(&employee.state, "ana", "Ana Souza", "employee").await;
        let denied = set_webhook_url_impl(&employee.state, "https://evil.example.test".to_string()).await;
        assert!(matches!(denied, Err(InfraError::Forbidden(_))));

        submit_record_impl(&employee.state, evening_request())
            .await
            .expect("submit");
        employee.state.drain_background().await;

        assert_eq!(employee.notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submit_does_not_wait_for_webhook_lookup() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;

        let before = fixture.transport.fetch_calls();
        submit_record_impl(&fixture.state, evening_request())
            .await
            .expect("first submit");
        assert_eq!(fixture.transport.fetch_calls(), before + 1);
        fixture.state.drain_background().await;
        assert_eq!(fixture.transport.fetch_calls(), before + 2);

        submit_record_impl(&fixture.state, evening_request())
            .await
            .expect("second submit");
        fixture.state.drain_background().await;

        assert_eq!(fixture.transport.fetch_calls(), before + 3);
        assert_eq!(fixture.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_stops_poller_and_clears_identity() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;
        assert!(start_polling_impl(&fixture.state).await.expect("start"));
        assert!(!start_polling_impl(&fixture.state).await.expect("second start"));

        let was_polling = logout_impl(&fixture.state).await.expect("logout");

        assert!(was_polling);
        assert!(current_identity_impl(&fixture.state).expect("identity").is_none());
        assert!(matches!(
            start_polling_impl(&fixture.state).await,
            Err(InfraError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn command_log_records_json_lines() {
        let fixture = fixture();
        register_and_login(&fixture.state, "ana", "Ana Souza", "employee").await;

        let log = fs::read_to_string(fixture.state.logs_dir.join("commands.log")).expect("read log");
        let first: serde_json::Value =
            serde_json::from_str(log.lines().next().expect("first line")).expect("json line");

        assert_eq!(first["command"], "register");
        assert_eq!(first["level"], "info");
    }
}
