//! Token service configuration
//!
//! The signing secret is injected here once at startup and never read from
//! ambient state afterwards.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroize;

use crate::error::ConfigError;
use crate::DEFAULT_TOKEN_TTL_SECS;

/// Environment variable that overrides the configured signing secret
pub const SECRET_ENV_VAR: &str = "NEXUS_JWT_SECRET";

/// HMAC signing secret
///
/// Zeroized on drop and redacted from `Debug` output.
#[derive(Clone, Default)]
pub struct SigningSecret {
    bytes: Vec<u8>,
}

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(**redacted**)")
    }
}

impl Drop for SigningSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<'de> Deserialize<'de> for SigningSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s.into_bytes()))
    }
}

/// Token service configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Value of the `iss` claim (the site URL)
    pub issuer: String,

    /// HMAC-SHA256 key; never written back out
    #[serde(default, skip_serializing)]
    pub secret: SigningSecret,

    /// Lifetime of tokens issued without an explicit TTL
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: i64,

    /// Clock skew tolerated on `exp`, `nbf` and `iat`
    #[serde(default)]
    pub leeway_secs: i64,
}

fn default_ttl() -> i64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl TokenConfig {
    pub fn new(issuer: impl Into<String>, secret: SigningSecret) -> Self {
        Self {
            issuer: issuer.into(),
            secret,
            default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            leeway_secs: 0,
        }
    }

    /// Replace the secret with `NEXUS_JWT_SECRET` when that variable is set
    pub fn apply_env(&mut self) {
        if let Some(secret) = std::env::var_os(SECRET_ENV_VAR) {
            self.secret = SigningSecret::new(secret.to_string_lossy().into_owned().into_bytes());
        }
    }

    /// Check the settings the token service cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::MissingIssuer);
        }
        if self.default_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "default_ttl_secs must be positive".to_string(),
            ));
        }
        if self.leeway_secs < 0 {
            return Err(ConfigError::Invalid(
                "leeway_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = SigningSecret::new(b"hunter2".to_vec());
        let rendered = format!("{:?}", TokenConfig::new("https://example.test", secret));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_secret_not_serialized() {
        let config = TokenConfig::new("https://example.test", SigningSecret::new("hunter2"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let config = TokenConfig::new("https://example.test", SigningSecret::default());
        assert!(matches!(config.validate(), Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_validate_rejects_empty_issuer() {
        let config = TokenConfig::new("  ", SigningSecret::new("k"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingIssuer)));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: TokenConfig =
            serde_json::from_str(r#"{"issuer": "https://example.test", "secret": "k"}"#).unwrap();
        assert_eq!(config.default_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
        assert_eq!(config.leeway_secs, 0);
        assert_eq!(config.secret.as_bytes(), b"k");
        assert!(config.validate().is_ok());
    }
}
