//! Nexus Mobile - PIN login for the mobile time-tracking UI
//!
//! This crate provides the stateful half of Nexus authentication:
//! - PIN credentials and their storage contract
//! - Argon2id PIN hashing and generation
//! - Lockout after repeated failures
//! - Second-factor delegation with an RFC 6238 adapter
//! - The PIN login state machine and mobile sessions
//! - The login form contract
//!
//! # Security Model
//!
//! - PINs are hashed with Argon2id and a per-credential salt
//! - Failed attempts are counted atomically in the credential store
//! - Five failures lock the credential for fifteen minutes
//! - Counters reset only after a session is bound to the response
//! - Unknown usernames and wrong PINs fail identically
//! - Wrong authenticator codes are capped and used codes refused

pub mod authenticator;
pub mod config;
pub mod credential;
pub mod error;
pub mod lockout;
pub mod login;
pub mod pin;
mod persist;
pub mod session;
pub mod store;
pub mod totp;

pub use authenticator::{CredentialStatus, LoginState, PendingLogin, PinAuthenticator};
pub use config::MobileConfig;
pub use credential::{Capabilities, Capability, Credential};
pub use error::{AuthError, Result, SessionError, StoreError, TotpError};
pub use lockout::LockoutPolicy;
pub use login::{LoginErrorKind, LoginFailure, LoginFlow, LoginRequest, LoginSuccess};
pub use pin::{generate_pin, HashCost, PinHasher, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
pub use session::{MobileSession, ResponseCookies, SessionCarrier, SessionConfig, SessionRegistry};
pub use store::{CredentialStore, FileCredentialStore, LockWrite, MemoryCredentialStore};
pub use totp::{NoSecondFactor, SecondFactor, TotpAlgorithm, TotpProvider, TotpState};
