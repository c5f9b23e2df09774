//! Error types for mobile authentication

use nexus_core::PrincipalId;
use thiserror::Error;

use crate::authenticator::LoginState;
use crate::lockout::describe_duration;

/// Result type alias for mobile authentication
pub type Result<T> = std::result::Result<T, AuthError>;

/// Credential store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend cannot be reached or its lock is poisoned
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("No credential for principal {0}")]
    NotFound(PrincipalId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Second-factor provider failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TotpError {
    #[error("TOTP secret is not valid base32")]
    InvalidSecret,

    #[error("TOTP provider timed out")]
    Timeout,

    #[error("TOTP provider error: {0}")]
    Provider(String),
}

/// Session creation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The response has already been committed, no cookie can be set
    #[error("Response headers already sent")]
    HeadersSent,

    #[error("Session registry error: {0}")]
    Registry(String),
}

/// Mobile authentication errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No active mobile credential")]
    NoCredential,

    #[error("Account locked for {remaining_secs} more seconds")]
    Locked { remaining_secs: u64 },

    #[error("Incorrect PIN ({attempts_remaining} attempts remaining)")]
    Rejected { attempts_remaining: u32 },

    #[error("Authentication code required")]
    TotpRequired,

    #[error("Invalid authentication code")]
    TotpInvalid,

    #[error("Authentication code could not be checked: {0}")]
    TotpUnavailable(String),

    #[error("Login attempt expired - please enter your PIN again")]
    PendingExpired,

    #[error("Login step out of order: {0}")]
    InvalidState(&'static str),

    #[error("PIN must be {0}-{1} letters or digits")]
    InvalidPin(usize, usize),

    #[error("Session could not be created: {0}")]
    Session(#[from] SessionError),

    /// The credential backend failed; distinct from a wrong PIN
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl AuthError {
    /// State the login flow is left in after this error
    ///
    /// Nothing maps to `Authenticated`.
    pub fn state(&self) -> LoginState {
        match self {
            AuthError::Locked { .. } => LoginState::Locked,
            AuthError::TotpRequired | AuthError::TotpInvalid => LoginState::TotpPending,
            AuthError::PendingExpired | AuthError::InvalidState(_) | AuthError::Session(_) => {
                LoginState::Unauthenticated
            }
            AuthError::NoCredential
            | AuthError::Rejected { .. }
            | AuthError::TotpUnavailable(_)
            | AuthError::InvalidPin(..)
            | AuthError::Storage(_)
            | AuthError::Crypto(_) => LoginState::Rejected,
        }
    }

    /// Human-facing message for the interactive flow
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Locked { remaining_secs } => format!(
                "Too many failed attempts. Try again in {}.",
                describe_duration(*remaining_secs)
            ),
            AuthError::Rejected { attempts_remaining } => format!(
                "Invalid username or PIN. {attempts_remaining} attempts remaining."
            ),
            AuthError::NoCredential | AuthError::InvalidPin(..) => {
                "Invalid username or PIN.".to_string()
            }
            AuthError::Storage(_) | AuthError::Crypto(_) => {
                "Login is temporarily unavailable. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True when the failure is the system's fault rather than the user's
    pub fn is_system_failure(&self) -> bool {
        matches!(
            self,
            AuthError::Storage(_)
                | AuthError::Crypto(_)
                | AuthError::Session(_)
                | AuthError::TotpUnavailable(_)
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AuthError::NoCredential,
            other => AuthError::Storage(other.to_string()),
        }
    }
}
