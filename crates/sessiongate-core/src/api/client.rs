//! HTTP client for the authentication backend.
//!
//! `ApiClient` exchanges credentials for a token pair at the token endpoint
//! and performs bearer-authenticated requests once a token is held.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{ApiError, AuthError};

// ============================================================================
// Constants
// ============================================================================

/// Path of the token endpoint, relative to the configured base URL
const TOKEN_ENDPOINT: &str = "/users/token/";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Access and refresh tokens issued by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Exchanges credentials for tokens.
///
/// The session store only talks to the backend through this trait, so tests
/// and alternative transports can stand in for `ApiClient`.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn obtain_tokens(&self, email: &str, password: &str) -> Result<TokenPair, AuthError>;
}

/// API client for the authentication backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    /// Complete `Authorization` header value, e.g. `Bearer <token>`
    authorization: Option<String>,
    initial_backoff_ms: u64,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization: None,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Create a new ApiClient that sends `authorization` verbatim as the
    /// `Authorization` header, sharing the connection pool.
    pub fn with_authorization(&self, authorization: String) -> Self {
        Self {
            authorization: Some(authorization),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref authorization) = self.authorization {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(authorization)?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// GET a JSON resource relative to the base URL, with the authorization
    /// header attached when one is set.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl AuthGateway for ApiClient {
    async fn obtain_tokens(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let url = self.url(TOKEN_ENDPOINT);
        debug!(url = %url, "Requesting token pair");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Token request failed before a response");
                AuthError::connection()
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AuthError::from_response(status, &body);
            debug!(status = status.as_u16(), "Token request rejected");
            return Err(err);
        }

        response.json::<TokenPair>().await.map_err(|e| {
            error!(error = %e, "Failed to parse token response");
            AuthError::Rejected {
                status: status.as_u16(),
                message: super::error::GENERIC_AUTH_MESSAGE.to_string(),
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
