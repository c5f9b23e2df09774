//! Nexus Core - Identity types and bearer token service
//!
//! This crate provides the stateless half of Nexus authentication:
//! - Principal identifiers and the identity directory contract
//! - An injectable clock
//! - Base64url encoding as used by the JWT compact form
//! - HS256 token issuance and verification for the Nexus REST API

pub mod base64url;
pub mod clock;
pub mod config;
pub mod error;
pub mod principal;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SigningSecret, TokenConfig};
pub use error::{ConfigError, Error, Result, TokenError};
pub use principal::{MemoryDirectory, Principal, PrincipalDirectory, PrincipalId};
pub use token::{extract_bearer, Claims, IssuedToken, TokenService, VerifiedToken};

/// Signing algorithm carried in every token header
pub const TOKEN_ALGORITHM: &str = "HS256";

/// Token type carried in every token header
pub const TOKEN_TYPE: &str = "JWT";

/// Default token lifetime (7 days)
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;
