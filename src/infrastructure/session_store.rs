use crate::domain::models::SessionIdentity;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Holds the identity of whoever is logged in; cleared on logout.
pub trait SessionStore: Send + Sync {
    fn save_identity(&self, identity: &SessionIdentity) -> Result<(), InfraError>;
    fn load_identity(&self) -> Result<Option<SessionIdentity>, InfraError>;
    fn clear_identity(&self) -> Result<(), InfraError>;
}

/// Keyring-backed session. On Linux the entry lives in the kernel session
/// keyring, so it disappears with the login session.
#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("overtime-sync.session", "current")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_identity(&self, identity: &SessionIdentity) -> Result<(), InfraError> {
        let payload = serde_json::to_string(identity)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_identity(&self) -> Result<Option<SessionIdentity>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        match serde_json::from_str::<SessionIdentity>(&payload) {
            Ok(identity) => Ok(Some(identity)),
            Err(error) => {
                tracing::warn!(error = %error, "discarding unreadable session identity");
                Ok(None)
            }
        }
    }

    fn clear_identity(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    identity: Mutex<Option<SessionIdentity>>,
}

impl SessionStore for InMemorySessionStore {
    fn save_identity(&self, identity: &SessionIdentity) -> Result<(), InfraError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("in-memory session: {error}")))?;
        *guard = Some(identity.clone());
        Ok(())
    }

    fn load_identity(&self) -> Result<Option<SessionIdentity>, InfraError> {
        let guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("in-memory session: {error}")))?;
        Ok(guard.clone())
    }

    fn clear_identity(&self) -> Result<(), InfraError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("in-memory session: {error}")))?;
        *guard = None;
        Ok(())
    }
}
