//! Error types for the Nexus core library

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned to API callers for every token failure
pub const PUBLIC_TOKEN_ERROR: &str = "invalid or expired token";

/// Fatal configuration problems
///
/// These abort startup (or the operation that needed the setting). There is
/// never a fallback default for the signing secret.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Token signing secret is not configured")]
    MissingSecret,

    #[error("Token issuer is not configured")]
    MissingIssuer,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Bearer token verification failures
///
/// All of these are per-request and recoverable. The variant is meant for
/// logs; callers should only ever see [`TokenError::public_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token must have exactly three segments")]
    Malformed,

    #[error("Token segment could not be decoded: {0}")]
    Decode(String),

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token signature does not match")]
    InvalidSignature,

    #[error("Token is missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Token issued-at time is in the future")]
    InvalidIssuedAt,

    #[error("Token subject {0} is not a known principal")]
    UnknownPrincipal(u64),
}

impl TokenError {
    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed_token",
            TokenError::Decode(_) => "decode_error",
            TokenError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::MissingClaim(_) => "missing_claim",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::InvalidIssuedAt => "invalid_issued_at",
            TokenError::UnknownPrincipal(_) => "unknown_principal",
        }
    }

    /// The only message that may leave the process
    pub fn public_message(&self) -> &'static str {
        PUBLIC_TOKEN_ERROR
    }
}

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Token error
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_is_uniform() {
        let errors = [
            TokenError::Malformed,
            TokenError::Decode("bad".into()),
            TokenError::UnsupportedAlgorithm("none".into()),
            TokenError::InvalidSignature,
            TokenError::MissingClaim("exp"),
            TokenError::Expired,
            TokenError::NotYetValid,
            TokenError::InvalidIssuedAt,
            TokenError::UnknownPrincipal(7),
        ];

        for error in errors {
            assert_eq!(error.public_message(), PUBLIC_TOKEN_ERROR);
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(TokenError::InvalidSignature.kind(), "invalid_signature");
        assert_eq!(TokenError::MissingClaim("sub").kind(), "missing_claim");
    }
}
