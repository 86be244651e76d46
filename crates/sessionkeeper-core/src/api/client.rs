//! HTTP client for the wallet auth backend.
//!
//! This module provides the `AuthApi` trait consumed by the session manager
//! and `HttpAuthApi`, its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::types::{
    CreatePasscodeRequest, Credentials, PasscodeVerification, RefreshRequest, RefreshResponse,
    RegisterResponse, SessionGrant, VerifyEmailRequest, VerifyPasscodeRequest,
};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default backend URL when neither config nor environment provides one
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow mobile networks while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const PASSCODE_PATH: &str = "/auth/passcode";
const PASSCODE_VERIFY_PATH: &str = "/auth/passcode/verify";

/// Operations the session layer needs from the auth backend.
///
/// Implementations must be cheap to share; the manager holds one behind an
/// `Arc` and calls it from timer tasks.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<SessionGrant, ApiError>;

    async fn register(&self, credentials: &Credentials) -> Result<RegisterResponse, ApiError>;

    /// Complete registration with the emailed code
    async fn verify_email(&self, request: &VerifyEmailRequest) -> Result<SessionGrant, ApiError>;

    async fn refresh_token(&self, request: &RefreshRequest) -> Result<RefreshResponse, ApiError>;

    async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError>;

    async fn verify_passcode(
        &self,
        access_token: Option<&str>,
        request: &VerifyPasscodeRequest,
    ) -> Result<PasscodeVerification, ApiError>;

    async fn create_passcode(
        &self,
        access_token: Option<&str>,
        request: &CreatePasscodeRequest,
    ) -> Result<(), ApiError>;
}

/// reqwest-backed `AuthApi`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_builder<B: Serialize>(&self, path: &str, token: Option<&str>, body: &B) -> RequestBuilder {
        debug!(path, "Sending auth request");
        let builder = self.client.post(self.url(path)).json(body);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::NetworkError(e)
            }
        })?;
        Self::check_response(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = Self::send(self.post_builder(path, token, body)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    async fn post_empty<B: Serialize>(&self, path: &str, token: Option<&str>, body: &B) -> Result<(), ApiError> {
        Self::send(self.post_builder(path, token, body)).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<SessionGrant, ApiError> {
        self.post_json(LOGIN_PATH, None, credentials).await
    }

    async fn register(&self, credentials: &Credentials) -> Result<RegisterResponse, ApiError> {
        self.post_json(REGISTER_PATH, None, credentials).await
    }

    async fn verify_email(&self, request: &VerifyEmailRequest) -> Result<SessionGrant, ApiError> {
        self.post_json(VERIFY_EMAIL_PATH, None, request).await
    }

    async fn refresh_token(&self, request: &RefreshRequest) -> Result<RefreshResponse, ApiError> {
        self.post_json(REFRESH_PATH, None, request).await
    }

    async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError> {
        self.post_empty(LOGOUT_PATH, access_token, &serde_json::json!({})).await
    }

    async fn verify_passcode(
        &self,
        access_token: Option<&str>,
        request: &VerifyPasscodeRequest,
    ) -> Result<PasscodeVerification, ApiError> {
        self.post_json(PASSCODE_VERIFY_PATH, access_token, request).await
    }

    async fn create_passcode(
        &self,
        access_token: Option<&str>,
        request: &CreatePasscodeRequest,
    ) -> Result<(), ApiError> {
        self.post_empty(PASSCODE_PATH, access_token, request).await
    }
}
