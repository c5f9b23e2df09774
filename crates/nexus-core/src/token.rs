//! HS256 bearer tokens
//!
//! Tokens use the JWT compact form so standard tooling can decode them:
//!
//! ```text
//! base64url(header_json) "." base64url(payload_json) "." base64url(hmac_sha256)
//! ```
//!
//! The header is always `{"alg":"HS256","typ":"JWT"}` and the payload carries
//! `iss`, `iat`, `exp`, `sub` and the free-form `data` claim. Verification
//! checks structure first, then the signature, and only then any claim.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::base64url;
use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::error::{ConfigError, Error, Result, TokenError};
use crate::principal::{Principal, PrincipalDirectory, PrincipalId};
use crate::{TOKEN_ALGORITHM, TOKEN_TYPE};

type HmacSha256 = Hmac<Sha256>;

/// Tokens longer than this are rejected before any decoding
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

impl Header {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: Some(TOKEN_TYPE.to_string()),
        }
    }
}

/// Token payload
///
/// Every registered claim is optional on the wire; [`TokenService::verify`]
/// decides which ones are required.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Value>,

    /// Display claims for the companion app (name, email, roles)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Result of a successful issuance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A token that passed every check
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedToken {
    pub principal: Principal,
    pub claims: Claims,
}

/// Issues and verifies bearer tokens
pub struct TokenService {
    config: TokenConfig,
    directory: Arc<dyn PrincipalDirectory>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.config.issuer)
            .field("default_ttl_secs", &self.config.default_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service
    ///
    /// Fails if the secret or issuer is missing; there is no default secret.
    pub fn new(
        config: TokenConfig,
        directory: Arc<dyn PrincipalDirectory>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            directory,
            clock,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Issue a token for `principal_id` valid for `ttl_secs` from now
    pub fn issue(
        &self,
        principal_id: PrincipalId,
        display_claims: Value,
        ttl_secs: i64,
    ) -> Result<IssuedToken> {
        if ttl_secs <= 0 {
            return Err(ConfigError::Invalid("token ttl must be positive".to_string()).into());
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add(ttl_secs)
            .ok_or_else(|| ConfigError::Invalid("token ttl overflows".to_string()))?;

        let claims = Claims {
            iss: Some(self.config.issuer.clone()),
            iat: Some(now),
            exp: Some(expires_at),
            nbf: None,
            sub: Some(Value::String(principal_id.to_string())),
            data: display_claims,
        };

        let token = self.encode(&claims)?;
        debug!(principal_id = %principal_id, expires_at, "issued bearer token");

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at,
        })
    }

    /// Issue a token with the configured default lifetime
    pub fn issue_default(
        &self,
        principal_id: PrincipalId,
        display_claims: Value,
    ) -> Result<IssuedToken> {
        self.issue(principal_id, display_claims, self.config.default_ttl_secs)
    }

    /// Sign arbitrary claims with the standard HS256 header
    pub fn encode(&self, claims: &Claims) -> Result<String> {
        self.encode_with_header(&Header::hs256(), claims)
    }

    fn encode_with_header(&self, header: &Header, claims: &Claims) -> Result<String> {
        if self.config.secret.is_empty() {
            return Err(ConfigError::MissingSecret.into());
        }

        let header_b64 = base64url::encode(serde_json::to_vec(header)?);
        let payload_b64 = base64url::encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header_b64}.{payload_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!("{signing_input}.{}", base64url::encode(signature)))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| Error::Config(ConfigError::Invalid(e.to_string())))
    }

    /// Verify a token and resolve its principal
    pub fn verify(&self, token: &str) -> std::result::Result<VerifiedToken, TokenError> {
        let result = self.verify_inner(token);
        match &result {
            Ok(verified) => {
                debug!(principal_id = %verified.principal.id, "bearer token accepted");
            }
            Err(TokenError::InvalidSignature) => {
                warn!(kind = "invalid_signature", "bearer token rejected");
            }
            Err(e) => {
                debug!(kind = e.kind(), error = %e, "bearer token rejected");
            }
        }
        result
    }

    fn verify_inner(&self, token: &str) -> std::result::Result<VerifiedToken, TokenError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed);
        }

        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
            return Err(TokenError::Malformed);
        };

        let header: Header = serde_json::from_slice(&base64url::decode(header_b64)?)
            .map_err(|e| TokenError::Decode(e.to_string()))?;
        let claims: Claims = serde_json::from_slice(&base64url::decode(payload_b64)?)
            .map_err(|e| TokenError::Decode(e.to_string()))?;

        if header.alg != TOKEN_ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature =
            base64url::decode(signature_b64).map_err(|_| TokenError::InvalidSignature)?;
        let mut mac = self.mac().map_err(|_| TokenError::InvalidSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        self.check_claims(&claims)?;

        let principal_id = claims
            .sub
            .as_ref()
            .and_then(PrincipalId::from_claim)
            .ok_or(TokenError::MissingClaim("sub"))?;

        let principal = self
            .directory
            .by_id(principal_id)
            .ok_or(TokenError::UnknownPrincipal(principal_id.get()))?;

        Ok(VerifiedToken { principal, claims })
    }

    fn check_claims(&self, claims: &Claims) -> std::result::Result<(), TokenError> {
        let now = self.clock.now();
        let leeway = self.config.leeway_secs;

        let exp = claims.exp.ok_or(TokenError::MissingClaim("exp"))?;
        if now >= exp.saturating_add(leeway) {
            return Err(TokenError::Expired);
        }

        if let Some(nbf) = claims.nbf {
            if now.saturating_add(leeway) < nbf {
                return Err(TokenError::NotYetValid);
            }
        }

        if let Some(iat) = claims.iat {
            if iat > now.saturating_add(leeway) {
                return Err(TokenError::InvalidIssuedAt);
            }
        }

        Ok(())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SigningSecret;
    use crate::principal::MemoryDirectory;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn principal(id: u64) -> Principal {
        Principal {
            id: PrincipalId::new(id).unwrap(),
            username: format!("user{id}"),
            display_name: String::new(),
            roles: vec![],
        }
    }

    fn service_with(secret: &str) -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let directory = Arc::new(MemoryDirectory::from_principals([principal(42)]));
        let config = TokenConfig::new("https://timetrack.example", SigningSecret::new(secret));
        let service = TokenService::new(config, directory, clock.clone()).unwrap();
        (service, clock)
    }

    fn service() -> (TokenService, Arc<ManualClock>) {
        service_with("test-secret")
    }

    fn id(n: u64) -> PrincipalId {
        PrincipalId::new(n).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let (service, _clock) = service();
        let issued = service
            .issue(id(42), json!({"name": "Alice"}), 3600)
            .unwrap();

        assert_eq!(issued.issued_at, NOW);
        assert_eq!(issued.expires_at, NOW + 3600);

        let verified = service.verify(&issued.token).unwrap();
        assert_eq!(verified.principal.id, id(42));
        assert_eq!(verified.claims.iss.as_deref(), Some("https://timetrack.example"));
        assert_eq!(verified.claims.data, json!({"name": "Alice"}));
        assert_eq!(verified.claims.sub, Some(json!("42")));
    }

    #[test]
    fn test_header_is_standard() {
        let (service, _clock) = service();
        let issued = service.issue(id(42), Value::Null, 60).unwrap();
        assert!(issued
            .token
            .starts_with("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9."));
        assert!(!issued.token.contains('='));
    }

    #[test]
    fn test_payload_claim_order() {
        let (service, _clock) = service();
        let issued = service.issue(id(42), json!({"role": "x"}), 60).unwrap();
        let payload_b64 = issued.token.split('.').nth(1).unwrap();
        let payload = String::from_utf8(base64url::decode(payload_b64).unwrap()).unwrap();
        assert_eq!(
            payload,
            format!(
                r#"{{"iss":"https://timetrack.example","iat":{NOW},"exp":{},"sub":"42","data":{{"role":"x"}}}}"#,
                NOW + 60
            )
        );
    }

    #[test]
    fn test_verifies_reference_jwt() {
        // jwt.io reference token: valid signature, but carries no `exp`
        let (service, _clock) = service_with("your-256-bit-secret");
        let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
                     eyJzdWIiOiIxMjM0NTY3ODkwIiwibmFtZSI6IkpvaG4gRG9lIiwiaWF0IjoxNTE2MjM5MDIyfQ.\
                     SflKxwRJSMeKKF2QT4fwpMeJf36POk6yJV_adQssw5c";
        assert_eq!(service.verify(token), Err(TokenError::MissingClaim("exp")));
    }

    #[test]
    fn test_expiry_boundary() {
        let (service, clock) = service();
        let issued = service.issue(id(42), Value::Null, 100).unwrap();

        clock.advance(99);
        assert!(service.verify(&issued.token).is_ok());

        clock.advance(1);
        assert_eq!(service.verify(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_extends_expiry() {
        let clock = Arc::new(ManualClock::new(NOW));
        let directory = Arc::new(MemoryDirectory::from_principals([principal(42)]));
        let mut config = TokenConfig::new("https://timetrack.example", SigningSecret::new("k"));
        config.leeway_secs = 30;
        let service = TokenService::new(config, directory, clock.clone()).unwrap();

        let issued = service.issue(id(42), Value::Null, 10).unwrap();
        clock.advance(20);
        assert!(service.verify(&issued.token).is_ok());
        clock.advance(20);
        assert_eq!(service.verify(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_empty_secret_is_config_error() {
        let clock = Arc::new(ManualClock::new(NOW));
        let directory = Arc::new(MemoryDirectory::new());
        let config = TokenConfig::new("https://timetrack.example", SigningSecret::default());
        assert!(matches!(
            TokenService::new(config, directory, clock),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let (service, _clock) = service();
        assert!(matches!(
            service.issue(id(42), Value::Null, 0),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_malformed_segment_count() {
        let (service, _clock) = service();
        assert_eq!(service.verify(""), Err(TokenError::Malformed));
        assert_eq!(service.verify("a.b"), Err(TokenError::Malformed));
        assert_eq!(service.verify("a.b.c.d"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_oversized_token_is_malformed() {
        let (service, _clock) = service();
        let token = format!("{}.b.c", "a".repeat(MAX_TOKEN_LEN));
        assert_eq!(service.verify(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_decode_errors() {
        let (service, _clock) = service();
        assert!(matches!(service.verify("!!.e30.sig"), Err(TokenError::Decode(_))));

        let not_json = base64url::encode(b"not json");
        let token = format!("{not_json}.e30.sig");
        assert!(matches!(service.verify(&token), Err(TokenError::Decode(_))));
    }

    #[test]
    fn test_rejects_other_algorithms() {
        let (service, _clock) = service();
        let claims = Claims {
            exp: Some(NOW + 60),
            sub: Some(json!(42)),
            ..Default::default()
        };

        for alg in ["none", "HS512", "RS256"] {
            let header = Header {
                alg: alg.to_string(),
                typ: Some("JWT".to_string()),
            };
            let token = service.encode_with_header(&header, &claims).unwrap();
            assert_eq!(
                service.verify(&token),
                Err(TokenError::UnsupportedAlgorithm(alg.to_string()))
            );
        }
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let (service, _clock) = service();
        let issued = service.issue(id(42), Value::Null, 60).unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        let forged = Claims {
            exp: Some(NOW + 1_000_000),
            sub: Some(json!("42")),
            ..Default::default()
        };
        let forged_b64 = base64url::encode(serde_json::to_vec(&forged).unwrap());
        let token = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);

        assert_eq!(service.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_other_secret_fails_signature() {
        let (issuer, _) = service_with("secret-a");
        let (verifier, _) = service_with("secret-b");
        let issued = issuer.issue(id(42), Value::Null, 60).unwrap();
        assert_eq!(verifier.verify(&issued.token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_undecodable_signature_is_invalid_signature() {
        let (service, _clock) = service();
        let issued = service.issue(id(42), Value::Null, 60).unwrap();
        let (signing_input, _) = issued.token.rsplit_once('.').unwrap();
        let token = format!("{signing_input}.***");
        assert_eq!(service.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_signature_checked_before_claims() {
        let (service, _clock) = service();
        let claims = Claims {
            exp: Some(NOW - 10),
            sub: Some(json!(42)),
            ..Default::default()
        };
        let token = service.encode(&claims).unwrap();
        let (signing_input, _) = token.rsplit_once('.').unwrap();
        let bogus = format!("{signing_input}.{}", base64url::encode([0u8; 32]));

        // Expired and badly signed: the signature wins
        assert_eq!(service.verify(&bogus), Err(TokenError::InvalidSignature));
        assert_eq!(service.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_not_before() {
        let (service, clock) = service();
        let claims = Claims {
            exp: Some(NOW + 600),
            nbf: Some(NOW + 60),
            sub: Some(json!(42)),
            ..Default::default()
        };
        let token = service.encode(&claims).unwrap();

        assert_eq!(service.verify(&token), Err(TokenError::NotYetValid));
        clock.advance(60);
        assert!(service.verify(&token).is_ok());
    }

    #[test]
    fn test_issued_in_future() {
        let (service, _clock) = service();
        let claims = Claims {
            iat: Some(NOW + 5),
            exp: Some(NOW + 600),
            sub: Some(json!(42)),
            ..Default::default()
        };
        let token = service.encode(&claims).unwrap();
        assert_eq!(service.verify(&token), Err(TokenError::InvalidIssuedAt));
    }

    #[test]
    fn test_subject_validation() {
        let (service, _clock) = service();

        for sub in [None, Some(json!(0)), Some(json!("abc")), Some(json!(-1))] {
            let claims = Claims {
                exp: Some(NOW + 600),
                sub,
                ..Default::default()
            };
            let token = service.encode(&claims).unwrap();
            assert_eq!(service.verify(&token), Err(TokenError::MissingClaim("sub")));
        }

        let claims = Claims {
            exp: Some(NOW + 600),
            sub: Some(json!(42)),
            ..Default::default()
        };
        assert!(service.verify(&service.encode(&claims).unwrap()).is_ok());
    }

    #[test]
    fn test_unknown_principal() {
        let (service, _clock) = service();
        let issued = service.issue(id(7), Value::Null, 60).unwrap();
        assert_eq!(service.verify(&issued.token), Err(TokenError::UnknownPrincipal(7)));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer("  bearer   abc  "), Some("abc"));
        assert_eq!(extract_bearer("Basic dXNlcjpwYXNz"), None);
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc.def.ghi"), None);
    }

    #[test]
    fn test_debug_hides_secret() {
        let (service, _clock) = service_with("super-secret-value");
        assert!(!format!("{service:?}").contains("super-secret-value"));
    }
}
