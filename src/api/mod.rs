//! REST API client module for the GoGevgelija backend.
//!
//! This module provides the `ApiClient` that all feature code uses for its
//! network calls. Authentication is handled inside the client: requests are
//! decorated with the current access token and a rejected token is refreshed
//! transparently, at most once per request.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
