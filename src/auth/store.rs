//! Secure storage for the access/refresh token pair.
//!
//! Tokens live in the OS keychain via `keyring`, with an in-memory mirror so
//! the request path can read them synchronously. The mirror is updated before
//! any durable write is awaited, so in-process readers never race against
//! keychain latency.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;
use tokio::sync::watch;

/// Keychain service name for all GoGevgelija entries
const SERVICE_NAME: &str = "gogevgelija";

/// Logical entry names for the two credentials
const ACCESS_ENTRY: &str = "access";
const REFRESH_ENTRY: &str = "refresh";

/// The access/refresh token pair. Always replaced as a pair: `save` writes
/// both fields in one step, so readers never observe one updated and the
/// other stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Durable confidential storage for named secret entries.
///
/// The production backend is the OS keychain; tests substitute an in-memory
/// backend. A missing entry is `Ok(None)`, not an error.
pub trait SecretBackend: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
    /// Deleting an entry that does not exist is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

/// OS keychain backend via the `keyring` crate.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretBackend for KeyringBackend {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let entry = Entry::new(&self.service, name).context("Failed to create keyring entry")?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let entry = Entry::new(&self.service, name).context("Failed to create keyring entry")?;
        entry
            .set_password(value)
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let entry = Entry::new(&self.service, name).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// In-memory backend for tests and ephemeral sessions (no durable storage).
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<std::collections::HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.read().unwrap().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.entries.write().unwrap().remove(name);
        Ok(())
    }
}

/// Owns the token pair. All other components read tokens through this store;
/// nothing else touches durable storage.
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
    mirror: RwLock<TokenPair>,
    // Revision counter bumped on every mutation; observers re-read after a change.
    changed: watch::Sender<u64>,
}

impl CredentialStore {
    pub fn new(backend: impl SecretBackend + 'static) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            backend: Arc::new(backend),
            mirror: RwLock::new(TokenPair::default()),
            changed,
        }
    }

    /// Load both tokens from durable storage into the mirror.
    ///
    /// A first run with no stored entries yields an empty pair. If the
    /// backend itself fails, the mirror is reset to empty and the error is
    /// returned, so the caller can proceed signed-out.
    pub async fn load(&self) -> Result<TokenPair> {
        let backend = Arc::clone(&self.backend);
        let loaded = tokio::task::spawn_blocking(move || -> Result<TokenPair> {
            Ok(TokenPair {
                access: backend.get(ACCESS_ENTRY)?,
                refresh: backend.get(REFRESH_ENTRY)?,
            })
        })
        .await
        .context("Credential load task failed")?;

        match loaded {
            Ok(pair) => {
                self.set_mirror(pair.clone());
                Ok(pair)
            }
            Err(e) => {
                self.set_mirror(TokenPair::default());
                Err(e)
            }
        }
    }

    /// Replace both tokens, durably and in the mirror. `None` deletes the
    /// corresponding entry (sign-out passes `None` for both).
    ///
    /// The mirror is updated before the keychain write is awaited, so any
    /// request decorated after this call returns sees the new tokens even if
    /// the durable write is still in flight. A durable failure surfaces as
    /// this call's error; the mirror keeps the new values regardless.
    pub async fn save(&self, access: Option<&str>, refresh: Option<&str>) -> Result<()> {
        let pair = TokenPair {
            access: access.map(str::to_owned),
            refresh: refresh.map(str::to_owned),
        };
        self.set_mirror(pair.clone());

        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || -> Result<()> {
            match pair.access.as_deref() {
                Some(value) => backend.set(ACCESS_ENTRY, value)?,
                None => backend.delete(ACCESS_ENTRY)?,
            }
            match pair.refresh.as_deref() {
                Some(value) => backend.set(REFRESH_ENTRY, value)?,
                None => backend.delete(REFRESH_ENTRY)?,
            }
            Ok(())
        })
        .await
        .context("Credential write task failed")?
    }

    /// Current access token, memory-only. Called on every outgoing request,
    /// so it must never perform I/O.
    pub fn access(&self) -> Option<String> {
        self.mirror.read().unwrap().access.clone()
    }

    /// Current refresh token, memory-only.
    pub fn refresh_token(&self) -> Option<String> {
        self.mirror.read().unwrap().refresh.clone()
    }

    /// Subscribe to credential changes. The value is a revision counter;
    /// observers should re-read the tokens (or the session status) after
    /// each change rather than interpret the number.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn set_mirror(&self, pair: TokenPair) {
        *self.mirror.write().unwrap() = pair;
        self.changed.send_modify(|rev| *rev += 1);
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print token values
        let mirror = self.mirror.read().unwrap();
        f.debug_struct("CredentialStore")
            .field("has_access", &mirror.access.is_some())
            .field("has_refresh", &mirror.refresh.is_some())
            .finish()
    }
}

/// Backend that fails every durable operation, for exercising the
/// best-effort mirror semantics.
#[cfg(test)]
pub(crate) struct FailingBackend;

#[cfg(test)]
impl SecretBackend for FailingBackend {
    fn get(&self, _name: &str) -> Result<Option<String>> {
        anyhow::bail!("keychain unavailable")
    }

    fn set(&self, _name: &str, _value: &str) -> Result<()> {
        anyhow::bail!("keychain unavailable")
    }

    fn delete(&self, _name: &str) -> Result<()> {
        anyhow::bail!("keychain unavailable")
    }
}
