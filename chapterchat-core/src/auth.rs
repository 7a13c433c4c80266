use crate::types::{Credential, UserId};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Durable storage for the signed-in credential.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> anyhow::Result<Option<Credential>> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Flags that live only as long as one signed-in session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub notification_shown: bool,
}

#[derive(Debug, Default)]
struct AuthState {
    credential: Option<Credential>,
    flags: SessionFlags,
}

/// The single owner of credential state.
///
/// Every component that needs the token or user id reads it from here. Writes
/// go through `sign_in`, `replace_token`, `sign_out` and `invalidate`, which
/// keep the durable store and the in-memory copy in step.
pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
    state: RwLock<AuthState>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("AuthSession")
            .field("credential", &state.credential)
            .field("flags", &state.flags)
            .finish()
    }
}

impl AuthSession {
    /// Starts signed out, without reading the store.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            state: RwLock::new(AuthState::default()),
        }
    }

    /// Starts from whatever credential the store already holds.
    pub fn restore(store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let credential = store.load()?;
        Ok(Self {
            store,
            state: RwLock::new(AuthState {
                credential,
                flags: SessionFlags::default(),
            }),
        })
    }

    pub fn credential(&self) -> Option<Credential> {
        self.read(|s| s.credential.clone())
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.read(|s| s.credential.as_ref().map(|c| c.bearer_token.clone()))
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.read(|s| s.credential.as_ref().map(|c| c.user_id.clone()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|s| s.credential.is_some())
    }

    pub fn flags(&self) -> SessionFlags {
        self.read(|s| s.flags)
    }

    pub fn mark_notification_shown(&self) {
        self.write(|s| s.flags.notification_shown = true);
    }

    /// Login and OAuth callback both land here. A new sign-in starts fresh flags.
    pub fn sign_in(&self, credential: Credential) -> anyhow::Result<()> {
        self.store.save(&credential)?;
        log::info!("signed in as {}", credential.user_id);
        self.write(|s| {
            s.credential = Some(credential);
            s.flags = SessionFlags::default();
        });
        Ok(())
    }

    /// Swaps the bearer token of the current credential (token refresh).
    pub fn replace_token(&self, token: impl Into<String>) -> anyhow::Result<()> {
        let Some(mut credential) = self.credential() else {
            return Err(anyhow::anyhow!("no credential to refresh"));
        };
        credential.bearer_token = token.into();
        self.store.save(&credential)?;
        self.write(|s| s.credential = Some(credential));
        Ok(())
    }

    pub fn sign_out(&self) -> anyhow::Result<()> {
        self.write(|s| {
            s.credential = None;
            s.flags = SessionFlags::default();
        });
        self.store.clear()
    }

    /// Tears the session down after an authorization failure.
    ///
    /// The in-memory state is always cleared; a store failure is only logged.
    pub fn invalidate(&self) {
        if let Err(e) = self.sign_out() {
            log::error!("failed to clear credential store: {e:#}");
        }
    }

    fn read<T>(&self, f: impl FnOnce(&AuthState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, f: impl FnOnce(&mut AuthState)) {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}
