//! Core library for the GoGevgelija mobile client.
//!
//! This crate provides everything a UI shell needs except the screens
//! themselves:
//! - `auth`: secure credential storage and session lifecycle
//! - `api`: authenticated HTTP client with transparent token refresh
//! - `models`: typed representations of API data
//! - `config`: persisted application configuration
//!
//! Access tokens are attached to every outgoing request automatically, and a
//! rejected token is refreshed at most once per request before the failure is
//! surfaced to the caller. Feature code never touches credentials directly.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, SessionManager, SessionStatus};
pub use config::Config;
