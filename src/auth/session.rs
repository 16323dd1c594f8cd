//! Session lifecycle: sign-in, sign-up, sign-out, and the derived status
//! that decides whether the app shows the signed-in or signed-out tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::client::RegisterRequest;
use crate::api::ApiClient;
use crate::models::UserProfile;

use super::CredentialStore;

/// Where the session currently stands. The UI mounts the signed-in or
/// signed-out tree off this value and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Stored tokens have not been loaded yet (app startup)
    Initializing,
    SignedOut,
    SignedIn,
}

/// Drives the session. Status is computed from the credential store at every
/// call, never cached, so a refresh-driven sign-out deep in the request path
/// is visible here immediately.
pub struct SessionManager {
    client: ApiClient,
    store: Arc<CredentialStore>,
    loaded: AtomicBool,
}

impl SessionManager {
    pub fn new(client: ApiClient, store: Arc<CredentialStore>) -> Self {
        Self {
            client,
            store,
            loaded: AtomicBool::new(false),
        }
    }

    /// The authenticated client feature code should use for its own calls.
    pub fn api(&self) -> &ApiClient {
        &self.client
    }

    /// Load persisted tokens and leave `Initializing`. Called once at
    /// startup; a failed load logs and starts signed out rather than
    /// blocking the app.
    pub async fn initialize(&self) -> SessionStatus {
        if let Err(e) = self.store.load().await {
            warn!(error = %e, "Failed to load stored tokens, starting signed out");
        }
        self.loaded.store(true, Ordering::Release);
        self.status()
    }

    /// Current session status, derived from store contents: signed in iff a
    /// refresh token is present.
    pub fn status(&self) -> SessionStatus {
        if !self.loaded.load(Ordering::Acquire) {
            return SessionStatus::Initializing;
        }
        if self.store.refresh_token().is_some() {
            SessionStatus::SignedIn
        } else {
            SessionStatus::SignedOut
        }
    }

    /// Subscribe to credential changes. Re-read `status()` after each change;
    /// this covers sign-in/out and refresh-driven sign-outs alike.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }

    /// Exchange username/password for a token pair and store it.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        let tokens = self.client.obtain_token(username, password).await?;
        self.store
            .save(Some(&tokens.access), Some(&tokens.refresh))
            .await?;
        self.loaded.store(true, Ordering::Release);
        info!(username, "Signed in");
        Ok(())
    }

    /// Register a new account; the backend signs the account in immediately
    /// by returning a token pair alongside the profile.
    pub async fn sign_up(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<UserProfile> {
        let response = self
            .client
            .register_account(&RegisterRequest {
                username,
                email,
                password,
            })
            .await?;
        self.store
            .save(Some(&response.access), Some(&response.refresh))
            .await?;
        self.loaded.store(true, Ordering::Release);
        info!(username, "Registered and signed in");
        Ok(response.user)
    }

    /// Clear both tokens. Always succeeds locally: a durable-storage failure
    /// is logged, never surfaced, and no network call stands between the
    /// user and signing out.
    pub async fn sign_out(&self) {
        if let Err(e) = self.store.save(None, None).await {
            warn!(error = %e, "Failed to clear stored tokens during sign-out");
        }
        self.loaded.store(true, Ordering::Release);
        info!("Signed out");
    }
}
