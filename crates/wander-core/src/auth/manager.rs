//! Token lifecycle manager.
//!
//! Holds the authoritative session and keeps it alive across expiry:
//! proactively before authenticated requests go out, reactively when one
//! comes back rejected. Refresh is single-flight - arbitrarily many
//! concurrent requests hitting expiry trigger exactly one network call.

use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Mutex};

use super::{
    AuthError, AuthResult, AuthSession, AuthState, AuthTransport, AuthUser, SessionStore,
    SignUpOutcome,
};

/// Refresh proactively once expiry is within this horizon, in seconds.
pub const REFRESH_HORIZON_SECONDS: i64 = 300;

/// Owns the session and serializes refresh attempts.
pub struct TokenManager<S: SessionStore> {
    transport: Arc<dyn AuthTransport>,
    store: S,
    session: RwLock<Option<AuthSession>>,
    /// Serializes refresh attempts across all concurrent requests. Never
    /// held across anything but the one refresh round trip.
    refresh_gate: Mutex<()>,
    state_tx: watch::Sender<AuthState>,
}

impl<S: SessionStore> TokenManager<S> {
    /// Create a manager, restoring any persisted session.
    ///
    /// A restored session may already be expired; it is refreshed lazily on
    /// the first call that needs a token.
    pub fn new(transport: Arc<dyn AuthTransport>, store: S) -> AuthResult<Self> {
        let session = store.load_session()?;
        let state = session
            .as_ref()
            .map_or(AuthState::SignedOut, |s| AuthState::SignedIn(s.user.clone()));
        let (state_tx, _) = watch::channel(state);

        Ok(Self {
            transport,
            store,
            session: RwLock::new(session),
            refresh_gate: Mutex::new(()),
            state_tx,
        })
    }

    /// Subscribe to auth state changes
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// The signed-in user, if any
    pub fn current_user(&self) -> Option<AuthUser> {
        self.snapshot().map(|session| session.user)
    }

    pub fn is_signed_in(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let session = self.transport.sign_in(email, password).await?;
        let user = session.user.clone();
        self.install_session(session)?;
        Ok(user)
    }

    /// Sign up; installs the session when the backend signs the user in
    /// immediately (no email confirmation required)
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        let outcome = self.transport.sign_up(email, password).await?;
        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.install_session(session.clone())?;
        }
        Ok(outcome)
    }

    /// Sign out, destroying the local session.
    ///
    /// The remote revocation is best-effort: an unreachable backend must
    /// not keep a device signed in.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let Some(session) = self.snapshot() else {
            return Ok(());
        };

        if let Err(error) = self.transport.sign_out(&session.access_token).await {
            tracing::warn!("Remote sign-out failed: {error}");
        }

        self.clear_session_state()
    }

    /// Request a password recovery email
    pub async fn recover_password(&self, email: &str) -> AuthResult<()> {
        self.transport.recover_password(email).await
    }

    /// Access token for an outgoing authenticated request.
    ///
    /// Returns `None` when signed out (the call goes out public). When the
    /// stored expiry is within [`REFRESH_HORIZON_SECONDS`] of now, refreshes
    /// first; waiters re-check the session after acquiring the gate so only
    /// one of them performs the network call.
    pub async fn token_for_request(&self) -> AuthResult<Option<String>> {
        let Some(session) = self.snapshot() else {
            return Ok(None);
        };
        if !session.expires_within(REFRESH_HORIZON_SECONDS) {
            return Ok(Some(session.access_token));
        }

        let _gate = self.refresh_gate.lock().await;

        // Double-checked: another waiter may have refreshed while we queued
        let Some(current) = self.snapshot() else {
            return Ok(None);
        };
        if !current.expires_within(REFRESH_HORIZON_SECONDS) {
            return Ok(Some(current.access_token));
        }

        let refreshed = self.refresh_holding_gate(&current).await?;
        Ok(Some(refreshed.access_token))
    }

    /// Reactive path: an authenticated call came back 401/403 with the
    /// given token. Returns a token to retry with, refreshing at most once.
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> AuthResult<String> {
        let _gate = self.refresh_gate.lock().await;

        let Some(current) = self.snapshot() else {
            return Err(AuthError::SessionExpired);
        };
        if current.access_token != rejected_token {
            // Already rotated by a concurrent request
            return Ok(current.access_token);
        }

        let refreshed = self.refresh_holding_gate(&current).await?;
        Ok(refreshed.access_token)
    }

    /// One refresh round trip. Caller must hold `refresh_gate`.
    async fn refresh_holding_gate(&self, current: &AuthSession) -> AuthResult<AuthSession> {
        match self.transport.refresh(&current.refresh_token).await {
            Ok(session) => {
                self.install_session(session.clone())?;
                tracing::debug!("Session refreshed");
                Ok(session)
            }
            Err(AuthError::SessionExpired) => {
                tracing::warn!("Refresh credential rejected; signing out");
                self.clear_session_state()?;
                Err(AuthError::SessionExpired)
            }
            Err(error) => {
                // Transient: keep the session, fail only this call
                tracing::warn!("Token refresh failed transiently: {error}");
                Err(error)
            }
        }
    }

    fn snapshot(&self) -> Option<AuthSession> {
        self.session.read().expect("session lock").clone()
    }

    fn install_session(&self, session: AuthSession) -> AuthResult<()> {
        self.store.save_session(&session)?;
        let user = session.user.clone();
        *self.session.write().expect("session lock") = Some(session);
        self.state_tx.send_replace(AuthState::SignedIn(user));
        Ok(())
    }

    fn clear_session_state(&self) -> AuthResult<()> {
        self.store.clear_session()?;
        *self.session.write().expect("session lock") = None;
        self.state_tx.send_replace(AuthState::SignedOut);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySessionStore, MockAuthTransport, RefreshMode};
    use crate::util::unix_timestamp_now;
    use std::time::Duration;

    fn session(expires_in: i64) -> AuthSession {
        AuthSession {
            access_token: "access-0".to_string(),
            refresh_token: "refresh-0".to_string(),
            expires_at: unix_timestamp_now() + expires_in,
            user: AuthUser {
                id: "mock-user".to_string(),
                email: None,
            },
        }
    }

    fn manager_with_session(
        expires_in: i64,
    ) -> (Arc<MockAuthTransport>, TokenManager<MemorySessionStore>) {
        let transport = Arc::new(MockAuthTransport::new());
        let store = MemorySessionStore::new();
        store.save_session(&session(expires_in)).unwrap();
        let manager = TokenManager::new(transport.clone(), store).unwrap();
        (transport, manager)
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let (transport, manager) = manager_with_session(3600);

        let token = manager.token_for_request().await.unwrap();
        assert_eq!(token.as_deref(), Some("access-0"));
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn signed_out_manager_returns_no_token() {
        let transport = Arc::new(MockAuthTransport::new());
        let manager = TokenManager::new(transport.clone(), MemorySessionStore::new()).unwrap();

        assert_eq!(manager.token_for_request().await.unwrap(), None);
        assert!(!manager.is_signed_in());
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_proactively() {
        let (transport, manager) = manager_with_session(30);

        let token = manager.token_for_request().await.unwrap();
        assert_eq!(token.as_deref(), Some("access-1"));
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_requests_trigger_exactly_one_refresh() {
        let (transport, manager) = manager_with_session(30);
        transport.set_refresh_delay(Duration::from_millis(25));
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(
                async move { manager.token_for_request().await },
            ));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.as_deref(), Some("access-1"));
        }
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn rejection_with_stale_token_skips_network_call() {
        let (transport, manager) = manager_with_session(30);

        // First rejection refreshes
        let fresh = manager.refresh_after_rejection("access-0").await.unwrap();
        assert_eq!(fresh, "access-1");
        assert_eq!(transport.refresh_calls(), 1);

        // A concurrent request that was in flight with the old token gets
        // the rotated one without a second refresh
        let again = manager.refresh_after_rejection("access-0").await.unwrap();
        assert_eq!(again, "access-1");
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn definitive_refresh_failure_signs_out() {
        let (transport, manager) = manager_with_session(30);
        transport.set_refresh_mode(RefreshMode::FailExpired);

        let error = manager.token_for_request().await.unwrap_err();
        assert!(matches!(error, AuthError::SessionExpired));
        assert!(!manager.is_signed_in());
        assert_eq!(*manager.subscribe().borrow(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn transient_refresh_failure_keeps_session() {
        let (transport, manager) = manager_with_session(30);
        transport.set_refresh_mode(RefreshMode::FailUnavailable);

        let error = manager.token_for_request().await.unwrap_err();
        assert!(error.is_transient());
        assert!(manager.is_signed_in());
    }

    #[tokio::test]
    async fn sign_in_installs_session_and_publishes_state() {
        let transport = Arc::new(MockAuthTransport::new());
        let store = MemorySessionStore::new();
        let manager = TokenManager::new(transport.clone(), store.clone()).unwrap();
        let state = manager.subscribe();

        let user = manager.sign_in("ada@example.com", "hunter2").await.unwrap();
        assert_eq!(user.id, "mock-user");
        assert_eq!(*state.borrow(), AuthState::SignedIn(user));
        assert!(store.load_session().unwrap().is_some());
    }

    #[tokio::test]
    async fn sign_out_clears_session_even_if_remote_call_is_counted() {
        let (transport, manager) = manager_with_session(3600);

        manager.sign_out().await.unwrap();
        assert!(!manager.is_signed_in());
        assert_eq!(transport.sign_out_calls(), 1);

        // Signing out twice is a no-op
        manager.sign_out().await.unwrap();
        assert_eq!(transport.sign_out_calls(), 1);
    }
}
