use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("HTTP transport error: {0}")]
    Transport(String),
    #[error("remote store rate limited the request")]
    RateLimited,
    #[error("remote store returned http {status}")]
    RemoteStatus { status: u16 },
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not allowed: {0}")]
    Forbidden(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already registered: {0}")]
    UsernameTaken(String),
    #[error("import rejected: {0}")]
    InvalidImport(String),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
