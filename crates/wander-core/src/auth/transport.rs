//! Auth endpoint transport.
//!
//! Auth endpoints carry the public API key header only - never a bearer
//! token - and are excluded from both refresh interceptor paths, so the
//! transport talks to the wire directly instead of going through the data
//! API client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{
    parse_api_error, validate_credentials, AuthError, AuthResult, AuthSession, AuthUser,
    SignUpOutcome,
};
use crate::config::{RemoteConfig, HTTP_TIMEOUT_SECS};
use crate::util::unix_timestamp_now;

/// Network operations against the auth endpoints.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome>;

    /// Exchange a refresh token for a rotated session.
    ///
    /// A definitive rejection of the credential must surface as
    /// [`AuthError::SessionExpired`]; connectivity problems must surface as
    /// a transient error so the caller keeps the existing session.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> AuthResult<()>;

    async fn recover_password(&self, email: &str) -> AuthResult<()>;
}

/// REST implementation of [`AuthTransport`]
pub struct RestAuthTransport {
    auth_url: String,
    api_key: String,
    client: Client,
}

impl RestAuthTransport {
    pub fn new(config: &RemoteConfig) -> AuthResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            auth_url: config.auth_url(),
            api_key: config.api_key().to_string(),
            client,
        })
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
    }

    async fn send_auth_request(&self, request: RequestBuilder) -> AuthResult<AuthResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<AuthResponse>().await?)
    }
}

#[async_trait]
impl AuthTransport for RestAuthTransport {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );

        let response = self.send_auth_request(request).await?;
        response.into_session()?.ok_or_else(|| {
            AuthError::Api("Sign-in response did not include an active session".to_string())
        })
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/signup", self.auth_url))
                .json(&payload),
        );

        let response = self.send_auth_request(request).await?;
        match response.into_session()? {
            Some(session) => Ok(SignUpOutcome::SignedIn(session)),
            None => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );

        let response = request.send().await?;
        let status = response.status();

        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "Refresh token rejected: {}",
                parse_api_error(status, &body)
            );
            return Err(AuthError::SessionExpired);
        }

        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("HTTP {}", status.as_u16())));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<AuthResponse>().await?;
        payload.into_session()?.ok_or_else(|| {
            AuthError::Api("Refresh response did not include an active session".to_string())
        })
    }

    async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        let request = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token);

        let response = request.send().await?;
        // A dead token is as signed-out as it gets
        if !(response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        Ok(())
    }

    async fn recover_password(&self, email: &str) -> AuthResult<()> {
        if email.trim().is_empty() {
            return Err(AuthError::Api("Email is required".to_string()));
        }

        let payload = serde_json::json!({ "email": email });
        let request = self.public_request(
            self.client
                .post(format!("{}/recover", self.auth_url))
                .json(&payload),
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<AuthResponseUser>,
}

#[derive(Debug, Deserialize)]
struct AuthResponseUser {
    id: String,
    email: Option<String>,
}

impl AuthResponse {
    fn into_session(self) -> AuthResult<Option<AuthSession>> {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
        });
        let user = self.user.map(|user| AuthUser {
            id: user.id,
            email: user.email,
        });

        match (self.access_token, self.refresh_token, expires_at, user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }))
            }
            // A bare user without tokens means email confirmation is pending
            (None, None, None, Some(_)) => Ok(None),
            _ => Err(AuthError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

/// What the mock transport should do on the next refresh calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rotate both tokens and extend expiry
    RotateTokens,
    /// Reject the credential definitively
    FailExpired,
    /// Simulate a connectivity failure
    FailUnavailable,
}

/// A mock auth transport for tests.
///
/// Counts calls per endpoint and rotates deterministic token values so
/// tests can assert on single-flight behavior.
pub struct MockAuthTransport {
    user: AuthUser,
    session_lifetime: i64,
    refresh_mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    sign_in_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    issued: AtomicUsize,
}

impl Default for MockAuthTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user: AuthUser {
                id: "mock-user".to_string(),
                email: Some("mock@example.com".to_string()),
            },
            session_lifetime: 3600,
            refresh_mode: Mutex::new(RefreshMode::RotateTokens),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            sign_in_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().expect("mock lock") = mode;
    }

    /// Hold each refresh call open for the given duration, so tests can
    /// pile up concurrent waiters on the single-flight gate.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().expect("mock lock") = delay;
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    fn issue_session(&self) -> AuthSession {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        AuthSession {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_at: unix_timestamp_now() + self.session_lifetime,
            user: self.user.clone(),
        }
    }
}

#[async_trait]
impl AuthTransport for MockAuthTransport {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.issue_session())
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        validate_credentials(email, password)?;
        Ok(SignUpOutcome::ConfirmationRequired)
    }

    async fn refresh(&self, _refresh_token: &str) -> AuthResult<AuthSession> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.refresh_delay.lock().expect("mock lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match *self.refresh_mode.lock().expect("mock lock") {
            RefreshMode::RotateTokens => Ok(self.issue_session()),
            RefreshMode::FailExpired => Err(AuthError::SessionExpired),
            RefreshMode::FailUnavailable => {
                Err(AuthError::Unavailable("connection reset".to_string()))
            }
        }
    }

    async fn sign_out(&self, _access_token: &str) -> AuthResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recover_password(&self, _email: &str) -> AuthResult<()> {
        Ok(())
    }
}
