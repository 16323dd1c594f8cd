//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `CredentialStore`: keychain-backed storage for the access/refresh pair,
//!   with a synchronous in-memory mirror for the request path
//! - `SessionManager`: sign-in/sign-up/sign-out and the derived
//!   `SessionStatus` that gates the application tree
//!
//! Token refresh itself lives in the API client, which is the only component
//! allowed to trigger it as a side effect of request traffic.

pub mod session;
pub mod store;

pub use session::{SessionManager, SessionStatus};
pub use store::{CredentialStore, KeyringBackend, MemoryBackend, SecretBackend, TokenPair};
