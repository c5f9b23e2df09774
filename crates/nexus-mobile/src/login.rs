//! Login endpoint contract
//!
//! One form post carries the username, the PIN, an optional TOTP code and
//! a CSRF token. [`LoginFlow::login`] runs the whole flow for that post and
//! either hands back a bound session or a typed failure to re-render.

use std::fmt;
use std::sync::Arc;

use nexus_core::{Principal, PrincipalDirectory};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::authenticator::{LoginState, PinAuthenticator};
use crate::error::AuthError;
use crate::session::{MobileSession, SessionCarrier};

/// Where a successful login lands
pub const DEFAULT_REDIRECT: &str = "/mobile/";

/// Fields posted by the login form
#[derive(Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub totp_code: Option<String>,
    #[serde(default)]
    pub csrf_token: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, pin: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            pin: pin.into(),
            totp_code: None,
            csrf_token: csrf_token.into(),
        }
    }

    pub fn with_totp(mut self, code: impl Into<String>) -> Self {
        self.totp_code = Some(code.into());
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("totp_code", &self.totp_code.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl Drop for LoginRequest {
    fn drop(&mut self) {
        self.pin.zeroize();
        if let Some(code) = self.totp_code.as_mut() {
            code.zeroize();
        }
    }
}

/// Failure categories the form can render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginErrorKind {
    /// CSRF token missing or wrong
    SecurityFailure,
    MissingFields,
    /// Unknown user or wrong PIN; the two are indistinguishable
    InvalidCredentials,
    Locked,
    TotpRequired,
    TotpInvalid,
    /// The system could not complete the login
    Unavailable,
}

impl LoginErrorKind {
    pub fn default_message(&self) -> &'static str {
        match self {
            LoginErrorKind::SecurityFailure => "Security check failed. Please try again.",
            LoginErrorKind::MissingFields => "Please enter your username and PIN.",
            LoginErrorKind::InvalidCredentials => "Invalid username or PIN.",
            LoginErrorKind::Locked => "Too many failed attempts. Please try again later.",
            LoginErrorKind::TotpRequired => "Please enter the code from your authenticator app.",
            LoginErrorKind::TotpInvalid => "Invalid authentication code.",
            LoginErrorKind::Unavailable => {
                "Login is temporarily unavailable. Please try again later."
            }
        }
    }
}

/// A failed login, ready to render
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoginFailure {
    pub kind: LoginErrorKind,
    pub message: String,
    pub state: LoginState,
}

impl LoginFailure {
    fn new(kind: LoginErrorKind, state: LoginState) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            state,
        }
    }
}

/// A completed login
#[derive(Clone, Debug)]
pub struct LoginSuccess {
    pub principal: Principal,
    pub session: MobileSession,
    pub redirect_to: String,
}

/// Runs the form login against a directory and an authenticator
pub struct LoginFlow {
    directory: Arc<dyn PrincipalDirectory>,
    authenticator: Arc<PinAuthenticator>,
    redirect_to: String,
}

impl fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginFlow")
            .field("redirect_to", &self.redirect_to)
            .finish_non_exhaustive()
    }
}

impl LoginFlow {
    pub fn new(directory: Arc<dyn PrincipalDirectory>, authenticator: Arc<PinAuthenticator>) -> Self {
        Self {
            directory,
            authenticator,
            redirect_to: DEFAULT_REDIRECT.to_string(),
        }
    }

    pub fn with_redirect(mut self, redirect_to: impl Into<String>) -> Self {
        self.redirect_to = redirect_to.into();
        self
    }

    pub fn authenticator(&self) -> &Arc<PinAuthenticator> {
        &self.authenticator
    }

    pub async fn login(
        &self,
        request: &LoginRequest,
        expected_csrf: &str,
        carrier: &mut dyn SessionCarrier,
    ) -> Result<LoginSuccess, LoginFailure> {
        let csrf_ok = !expected_csrf.is_empty()
            && bool::from(request.csrf_token.as_bytes().ct_eq(expected_csrf.as_bytes()));
        if !csrf_ok {
            debug!("login rejected: CSRF token mismatch");
            return Err(LoginFailure::new(
                LoginErrorKind::SecurityFailure,
                LoginState::Unauthenticated,
            ));
        }

        let username = request.username.trim();
        if username.is_empty() || request.pin.trim().is_empty() {
            return Err(LoginFailure::new(
                LoginErrorKind::MissingFields,
                LoginState::Unauthenticated,
            ));
        }

        let Some(principal) = self.directory.by_username(username) else {
            let error = self.authenticator.reject_unknown(&request.pin);
            return Err(self.failure(error));
        };

        let auth = &self.authenticator;
        let mut pending = auth
            .verify_pin(principal.id, &request.pin)
            .await
            .map_err(|e| self.failure(e))?;

        if pending.totp_required() {
            let code = request
                .totp_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .ok_or_else(|| self.failure(AuthError::TotpRequired))?;
            auth.verify_totp(&mut pending, code)
                .await
                .map_err(|e| self.failure(e))?;
        }

        let session = auth
            .create_mobile_session(&pending, carrier)
            .await
            .map_err(|e| self.failure(e))?;

        info!(principal_id = %principal.id, "mobile login succeeded");
        Ok(LoginSuccess {
            principal,
            session,
            redirect_to: self.redirect_to.clone(),
        })
    }

    /// Map an authenticator error onto what the form may show
    fn failure(&self, error: AuthError) -> LoginFailure {
        let state = error.state();
        match error {
            AuthError::NoCredential | AuthError::InvalidPin(..) => {
                LoginFailure::new(LoginErrorKind::InvalidCredentials, state)
            }
            AuthError::Rejected { .. } => {
                let mut failure = LoginFailure::new(LoginErrorKind::InvalidCredentials, state);
                if self.authenticator.config().disclose_attempts_remaining {
                    failure.message = error.user_message();
                }
                failure
            }
            AuthError::Locked { .. } => LoginFailure {
                kind: LoginErrorKind::Locked,
                message: error.user_message(),
                state,
            },
            AuthError::TotpRequired => LoginFailure::new(LoginErrorKind::TotpRequired, state),
            AuthError::TotpInvalid => LoginFailure::new(LoginErrorKind::TotpInvalid, state),
            AuthError::PendingExpired | AuthError::InvalidState(_) => {
                LoginFailure::new(LoginErrorKind::SecurityFailure, state)
            }
            AuthError::TotpUnavailable(_)
            | AuthError::Session(_)
            | AuthError::Storage(_)
            | AuthError::Crypto(_) => LoginFailure::new(LoginErrorKind::Unavailable, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MobileConfig;
    use crate::credential::Capabilities;
    use crate::pin::HashCost;
    use crate::session::ResponseCookies;
    use crate::store::{CredentialStore, MemoryCredentialStore};
    use crate::totp::{NoSecondFactor, SecondFactor, TotpProvider, TotpState};
    use nexus_core::{ManualClock, MemoryDirectory, PrincipalId};

    const CSRF: &str = "f3a9c1";
    const PIN: &str = "AB23CD";
    // RFC 6238 seed, 6 digit code at t=59 is 287082
    const TOTP_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn alice() -> Principal {
        Principal {
            id: PrincipalId::new(1).unwrap(),
            username: "alice".into(),
            display_name: "Alice".into(),
            roles: vec!["employee".into()],
        }
    }

    struct Fixture {
        flow: LoginFlow,
        store: Arc<MemoryCredentialStore>,
    }

    fn fixture_with(config: MobileConfig, second_factor: Arc<dyn SecondFactor>) -> Fixture {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::new(59));
        let auth = PinAuthenticator::new(store.clone(), second_factor, clock, config).unwrap();
        auth.create_credential(alice().id, PIN, Capabilities::all())
            .unwrap();

        let directory = Arc::new(MemoryDirectory::from_principals([alice()]));
        Fixture {
            flow: LoginFlow::new(directory, Arc::new(auth)),
            store,
        }
    }

    fn config() -> MobileConfig {
        MobileConfig {
            hash_cost: HashCost::minimal(),
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        fixture_with(config(), Arc::new(NoSecondFactor))
    }

    #[tokio::test]
    async fn test_successful_login() {
        let f = fixture();
        let mut cookies = ResponseCookies::new();
        let success = f
            .flow
            .login(&LoginRequest::new("Alice", "ab23cd", CSRF), CSRF, &mut cookies)
            .await
            .unwrap();

        assert_eq!(success.principal, alice());
        assert_eq!(success.redirect_to, DEFAULT_REDIRECT);
        assert!(cookies.set_cookie().unwrap().contains(&success.session.id));
    }

    #[tokio::test]
    async fn test_csrf_checked_first() {
        let f = fixture();
        for token in ["", "wrong"] {
            let failure = f
                .flow
                .login(&LoginRequest::new("alice", PIN, token), CSRF, &mut ResponseCookies::new())
                .await
                .unwrap_err();
            assert_eq!(failure.kind, LoginErrorKind::SecurityFailure);
        }
        // Empty expected token never matches
        let failure = f
            .flow
            .login(&LoginRequest::new("alice", PIN, ""), "", &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LoginErrorKind::SecurityFailure);
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let f = fixture();
        for (user, pin) in [("", PIN), ("alice", "  ")] {
            let failure = f
                .flow
                .login(&LoginRequest::new(user, pin, CSRF), CSRF, &mut ResponseCookies::new())
                .await
                .unwrap_err();
            assert_eq!(failure.kind, LoginErrorKind::MissingFields);
        }
    }

    #[tokio::test]
    async fn test_unknown_user_matches_wrong_pin() {
        let f = fixture();
        let unknown = f
            .flow
            .login(&LoginRequest::new("mallory", PIN, CSRF), CSRF, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        let wrong = f
            .flow
            .login(&LoginRequest::new("alice", "ZZZZZZ", CSRF), CSRF, &mut ResponseCookies::new())
            .await
            .unwrap_err();

        assert_eq!(unknown.kind, LoginErrorKind::InvalidCredentials);
        assert_eq!(unknown.kind, wrong.kind);
        assert_eq!(unknown.message, wrong.message);
        assert_eq!(unknown.state, wrong.state);
    }

    #[tokio::test]
    async fn test_disclosed_attempts() {
        let config = MobileConfig {
            disclose_attempts_remaining: true,
            ..config()
        };
        let f = fixture_with(config, Arc::new(NoSecondFactor));
        let failure = f
            .flow
            .login(&LoginRequest::new("alice", "ZZZZZZ", CSRF), CSRF, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(
            failure.message,
            "Invalid username or PIN. 4 attempts remaining."
        );
    }

    #[tokio::test]
    async fn test_locked_shows_duration() {
        let f = fixture();
        let request = LoginRequest::new("alice", "ZZZZZZ", CSRF);
        for _ in 0..4 {
            f.flow
                .login(&request, CSRF, &mut ResponseCookies::new())
                .await
                .unwrap_err();
        }
        let failure = f
            .flow
            .login(&request, CSRF, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LoginErrorKind::Locked);
        assert_eq!(failure.state, LoginState::Locked);
        assert!(failure.message.contains("15 minutes"));
    }

    #[tokio::test]
    async fn test_totp_required_then_accepted() {
        let provider = TotpProvider::new(Arc::new(ManualClock::new(59)))
            .with_state(alice().id, TotpState::new(TOTP_SECRET));
        let f = fixture_with(config(), Arc::new(provider));

        let failure = f
            .flow
            .login(&LoginRequest::new("alice", PIN, CSRF), CSRF, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LoginErrorKind::TotpRequired);
        assert_eq!(failure.state, LoginState::TotpPending);

        let failure = f
            .flow
            .login(
                &LoginRequest::new("alice", PIN, CSRF).with_totp("000000"),
                CSRF,
                &mut ResponseCookies::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LoginErrorKind::TotpInvalid);

        // Wrong codes never count against the PIN
        let stored = f.store.get(alice().id).unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 0);

        assert!(f
            .flow
            .login(
                &LoginRequest::new("alice", PIN, CSRF).with_totp("287 082"),
                CSRF,
                &mut ResponseCookies::new(),
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_session_bind_failure_is_unavailable() {
        let f = fixture();
        let failure = f
            .flow
            .login(&LoginRequest::new("alice", PIN, CSRF), CSRF, &mut ResponseCookies::committed())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, LoginErrorKind::Unavailable);
        assert!(f.flow.authenticator().sessions().is_empty());
    }

    #[test]
    fn test_request_debug_hides_pin() {
        let request = LoginRequest::new("alice", "SECRET", CSRF).with_totp("123456");
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("SECRET"));
        assert!(!rendered.contains("123456"));
    }
}
