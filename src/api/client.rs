//! HTTP client for the GoGevgelija REST API.
//!
//! Every outgoing request is decorated with the current access token, and a
//! 401 response triggers a single refresh-and-replay attempt. Concurrent
//! failures share one in-flight refresh exchange, so a burst of expired
//! requests costs exactly one round trip to the token service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::models::{Item, Listing, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Applied uniformly to all requests, including the refresh exchange.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Token-service endpoints (SimpleJWT layout on the backend)
const TOKEN_PATH: &str = "/api/token/";
const TOKEN_REFRESH_PATH: &str = "/api/token/refresh/";
const REGISTER_PATH: &str = "/api/auth/register/";

/// Account and utility endpoints
const ME_PATH: &str = "/api/auth/me/";
const HEALTH_PATH: &str = "/api/health/";

/// Domain endpoints
const LISTINGS_PATH: &str = "/api/listings/";
const FEATURED_LISTINGS_PATH: &str = "/api/listings/featured/";
const ITEMS_PATH: &str = "/api/items/";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest {
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterResponse {
    pub user: UserProfile,
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// A refresh exchange shared by every caller that needs it while it runs.
type RefreshHandle = Shared<BoxFuture<'static, Option<String>>>;

/// API client for the GoGevgelija backend.
/// Clone is cheap - reqwest::Client and the shared state use Arc internally.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<CredentialStore>,
    // At most one non-settled refresh exists at any instant; the slot is
    // cleared the moment the exchange settles.
    in_flight_refresh: Arc<Mutex<Option<RefreshHandle>>>,
}

impl ApiClient {
    /// Create a new API client against the given base URL.
    pub fn new(base_url: impl Into<String>, store: Arc<CredentialStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            in_flight_refresh: Arc::new(Mutex::new(None)),
        })
    }

    /// Attach the current access token as a bearer header, if one is present.
    /// Absence of a token is not an error here - the request simply goes out
    /// unauthenticated.
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.store.access() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Dispatch a request with one-shot 401 recovery.
    ///
    /// On a 401 the first time through, the request is marked as recovered,
    /// the refresh coordinator runs, and the request is replayed once with
    /// the token the decorator now reads from the store. A replay that fails
    /// again, or a failed refresh, propagates the authorization failure.
    async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        // Per-request recovery marker: set once the single recovery attempt
        // for this request has run.
        let mut recovered = false;
        loop {
            let url = format!("{}{}", self.base_url, path);
            let mut builder = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let response = self.authorize(builder).send().await?;
            let status = response.status();

            if status.is_success() {
                return response.json().await.map_err(|e| {
                    ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e))
                });
            }

            let body_text = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED && !recovered {
                recovered = true;
                debug!(path, "Access token rejected, attempting refresh");
                if self.refresh_access().await.is_some() {
                    continue;
                }
            }
            return Err(ApiError::from_status(status, &body_text));
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    // ===== Refresh coordination =====

    /// Obtain a fresh access token, single-flight.
    ///
    /// If an exchange is already running, its outcome is shared; no second
    /// network call is started. With no stored refresh token this resolves
    /// to `None` immediately. Any failure of the exchange clears both stored
    /// tokens (full local sign-out) and resolves to `None`.
    pub async fn refresh_access(&self) -> Option<String> {
        let handle = {
            let mut slot = self.in_flight_refresh.lock().unwrap();
            match slot.as_ref() {
                Some(handle) => handle.clone(),
                None => {
                    let refresh = match self.store.refresh_token() {
                        Some(refresh) => refresh,
                        None => return None,
                    };
                    let handle = Self::exchange_refresh(
                        self.http.clone(),
                        format!("{}{}", self.base_url, TOKEN_REFRESH_PATH),
                        refresh,
                        Arc::clone(&self.store),
                        Arc::clone(&self.in_flight_refresh),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(handle.clone());
                    handle
                }
            }
        };
        handle.await
    }

    /// The actual refresh exchange. Runs at most once per in-flight handle.
    async fn exchange_refresh(
        http: Client,
        url: String,
        refresh: String,
        store: Arc<CredentialStore>,
        slot: Arc<Mutex<Option<RefreshHandle>>>,
    ) -> Option<String> {
        let result = async {
            let response = http
                .post(&url)
                .json(&RefreshRequest {
                    refresh: refresh.clone(),
                })
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }
            let body: RefreshResponse = response.json().await.map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e))
            })?;
            Ok::<_, ApiError>(body.access)
        }
        .await;

        let outcome = match result {
            Ok(access) => {
                // The refresh token is reused unchanged on success
                if let Err(e) = store.save(Some(&access), Some(&refresh)).await {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }
                debug!("Access token refreshed");
                Some(access)
            }
            Err(e) => {
                // A transient network failure is indistinguishable from a
                // revoked refresh token here; both end the session.
                warn!(error = %e, "Token refresh failed, signing out");
                if let Err(e) = store.save(None, None).await {
                    warn!(error = %e, "Failed to clear tokens after refresh failure");
                }
                None
            }
        };

        // Clear the handle before resolving so the next failure starts a
        // fresh exchange rather than reusing a settled one.
        *slot.lock().unwrap() = None;
        outcome
    }

    // ===== Token-service exchanges (used by SessionManager) =====

    pub(crate) async fn obtain_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPairResponse, ApiError> {
        self.post(TOKEN_PATH, &TokenRequest { username, password }).await
    }

    pub(crate) async fn register_account(
        &self,
        request: &RegisterRequest<'_>,
    ) -> Result<RegisterResponse, ApiError> {
        self.post(REGISTER_PATH, request).await
    }

    // ===== Data fetching methods =====

    /// Fetch the signed-in user's profile
    pub async fn fetch_me(&self) -> Result<UserProfile, ApiError> {
        self.get(ME_PATH).await
    }

    /// Check backend reachability
    pub async fn health(&self) -> Result<(), ApiError> {
        let response: HealthResponse = self.get(HEALTH_PATH).await?;
        if response.status != "ok" {
            return Err(ApiError::InvalidResponse(format!(
                "Unexpected health status: {}",
                response.status
            )));
        }
        Ok(())
    }

    /// Fetch all listings
    pub async fn fetch_listings(&self) -> Result<Vec<Listing>, ApiError> {
        self.get(LISTINGS_PATH).await
    }

    /// Fetch listings marked for the featured section
    pub async fn fetch_featured_listings(&self) -> Result<Vec<Listing>, ApiError> {
        self.get(FEATURED_LISTINGS_PATH).await
    }

    /// Fetch all catalog items
    pub async fn fetch_items(&self) -> Result<Vec<Item>, ApiError> {
        self.get(ITEMS_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryBackend;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> (ApiClient, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::new(MemoryBackend::new()));
        let client = ApiClient::new(base_url, Arc::clone(&store)).expect("client");
        (client, store)
    }

    #[tokio::test]
    async fn test_unauthenticated_request_carries_no_bearer_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server.uri());
        client.fetch_listings().await.expect("fetch");

        let requests = server.received_requests().await.expect("requests");
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_request_is_decorated_with_current_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();
        client.fetch_listings().await.expect("fetch");
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_and_request_replayed_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access": "A2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();
        client.fetch_listings().await.expect("fetch after refresh");

        // New access token, same refresh token
        assert_eq!(store.access().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access": "A2" }))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        let outcomes = futures::future::join_all((0..5).map(|_| client.refresh_access())).await;
        for outcome in outcomes {
            assert_eq!(outcome.as_deref(), Some("A2"));
        }
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_concurrent_failing_requests_cost_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(5)
            .mount(&server)
            .await;
        // Delay keeps the exchange in flight while all five 401s arrive
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access": "A2" }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        let outcomes = futures::future::join_all((0..5).map(|_| client.fetch_listings())).await;
        for outcome in outcomes {
            outcome.expect("every caller should see the replayed success");
        }
        assert_eq!(store.access().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_replayed_request_is_never_retried_again() {
        let server = MockServer::start().await;
        // Server rejects the refreshed token too
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access": "A2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        let err = client.fetch_listings().await.expect_err("should fail");
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens_and_propagates_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                serde_json::json!({ "detail": "Token is invalid or expired" }),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        let err = client.fetch_listings().await.expect_err("should fail");
        assert!(err.is_unauthorized());
        assert_eq!(store.access(), None);
        assert_eq!(store.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_without_stored_token_resolves_to_none_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server.uri());
        assert_eq!(client.refresh_access().await, None);
    }

    #[tokio::test]
    async fn test_next_failure_after_settled_refresh_starts_a_fresh_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access": "A2" })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        assert_eq!(client.refresh_access().await.as_deref(), Some("A2"));
        // The settled handle is gone; a new need issues a new exchange
        assert_eq!(client.refresh_access().await.as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_non_authorization_failures_propagate_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTINGS_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server.uri());
        store.save(Some("A1"), Some("R1")).await.unwrap();

        let err = client.fetch_listings().await.expect_err("should fail");
        assert!(matches!(err, ApiError::ServerError(_)));
        // No recovery ran; tokens untouched
        assert_eq!(store.access().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_health_check_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })),
            )
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server.uri());
        client.health().await.expect("health");
    }
}
