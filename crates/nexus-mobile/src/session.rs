//! Mobile sessions
//!
//! A session is created only after a completed login. The registry is the
//! server-side record; a [`SessionCarrier`] binds the session id to the
//! outgoing response (a cookie for the web flow).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use nexus_core::{base64url, PrincipalId};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credential::Capabilities;
use crate::error::SessionError;

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "nexus_mobile_session";

const SESSION_ID_BYTES: usize = 32;

/// Session configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Absolute session lifetime in seconds
    pub max_duration_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 12 * 3600, // one working day
        }
    }
}

impl SessionConfig {
    /// Shorter sessions for shared devices
    pub fn strict() -> Self {
        Self {
            max_duration_secs: 3600,
        }
    }

    /// Long sessions for development
    pub fn development() -> Self {
        Self {
            max_duration_secs: 7 * 24 * 3600,
        }
    }
}

/// An authenticated mobile session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobileSession {
    /// Random 256-bit id, base64url encoded
    pub id: String,
    pub principal_id: PrincipalId,
    pub capabilities: Capabilities,
    pub created_at: i64,
    pub expires_at: i64,
}

impl std::fmt::Debug for MobileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileSession")
            .field("principal_id", &self.principal_id)
            .field("capabilities", &self.capabilities)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl MobileSession {
    /// Start a session at `now` with a fresh random id
    pub fn new(
        principal_id: PrincipalId,
        capabilities: Capabilities,
        now: i64,
        config: &SessionConfig,
    ) -> Self {
        let mut id = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut id);

        Self {
            id: base64url::encode(id),
            principal_id,
            capabilities,
            created_at: now,
            expires_at: now.saturating_add(config.max_duration_secs),
        }
    }

    pub fn is_valid(&self, now: i64) -> bool {
        now < self.expires_at
    }

    pub fn remaining_secs(&self, now: i64) -> u64 {
        u64::try_from(self.expires_at.saturating_sub(now)).unwrap_or(0)
    }
}

/// Server-side record of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, MobileSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MobileSession>>, SessionError> {
        self.sessions
            .lock()
            .map_err(|_| SessionError::Registry("session registry lock poisoned".to_string()))
    }

    pub fn insert(&self, session: MobileSession) -> Result<(), SessionError> {
        let mut sessions = self.lock()?;
        if sessions.contains_key(&session.id) {
            return Err(SessionError::Registry("duplicate session id".to_string()));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Look up a live session; expired entries are dropped on sight
    pub fn validate(&self, id: &str, now: i64) -> Option<MobileSession> {
        let mut sessions = self.lock().ok()?;
        match sessions.get(id) {
            Some(session) if session.is_valid(now) => Some(session.clone()),
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Remove a session; returns whether it existed
    pub fn revoke(&self, id: &str) -> bool {
        match self.lock() {
            Ok(mut sessions) => sessions.remove(id).is_some(),
            Err(_) => false,
        }
    }

    /// Drop every session expired at `now`, returning how many went
    pub fn purge_expired(&self, now: i64) -> usize {
        let Ok(mut sessions) = self.lock() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, session| session.is_valid(now));
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "purged expired mobile sessions");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Binds a session to the outgoing response
pub trait SessionCarrier {
    fn bind(&mut self, session: &MobileSession) -> Result<(), SessionError>;
}

/// Cookie jar for a single response
#[derive(Debug, Default)]
pub struct ResponseCookies {
    /// Set once the response has been committed
    pub headers_sent: bool,
    cookie: Option<String>,
}

impl ResponseCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookies for a response whose headers are already out
    pub fn committed() -> Self {
        Self {
            headers_sent: true,
            cookie: None,
        }
    }

    /// The `Set-Cookie` value, if a session was bound
    pub fn set_cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }
}

impl SessionCarrier for ResponseCookies {
    fn bind(&mut self, session: &MobileSession) -> Result<(), SessionError> {
        if self.headers_sent {
            return Err(SessionError::HeadersSent);
        }
        let max_age = session.remaining_secs(session.created_at);
        self.cookie = Some(format!(
            "{SESSION_COOKIE}={}; Path=/; Max-Age={max_age}; HttpOnly; Secure; SameSite=Strict",
            session.id
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: i64) -> MobileSession {
        MobileSession::new(
            PrincipalId::new(9).unwrap(),
            Capabilities::all(),
            now,
            &SessionConfig::strict(),
        )
    }

    #[test]
    fn test_session_lifetime() {
        let s = session(1000);
        assert_eq!(s.expires_at, 4600);
        assert!(s.is_valid(4599));
        assert!(!s.is_valid(4600));
        assert_eq!(s.remaining_secs(1000), 3600);
        assert_eq!(s.remaining_secs(5000), 0);
    }

    #[test]
    fn test_session_ids_are_random() {
        let a = session(0);
        let b = session(0);
        assert_ne!(a.id, b.id);
        // 32 bytes unpadded
        assert_eq!(a.id.len(), 43);
        assert!(!a.id.contains('+') && !a.id.contains('/') && !a.id.contains('='));
    }

    #[test]
    fn test_registry_validate_and_revoke() {
        let registry = SessionRegistry::new();
        let s = session(1000);
        registry.insert(s.clone()).unwrap();

        assert_eq!(registry.validate(&s.id, 2000), Some(s.clone()));
        assert!(registry.validate("unknown", 2000).is_none());

        assert!(registry.revoke(&s.id));
        assert!(!registry.revoke(&s.id));
        assert!(registry.validate(&s.id, 2000).is_none());
    }

    #[test]
    fn test_registry_rejects_expired() {
        let registry = SessionRegistry::new();
        let s = session(1000);
        registry.insert(s.clone()).unwrap();

        assert!(registry.validate(&s.id, 4600).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let registry = SessionRegistry::new();
        registry.insert(session(0)).unwrap();
        registry.insert(session(0)).unwrap();
        registry.insert(session(5000)).unwrap();

        assert_eq!(registry.purge_expired(4000), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        let s = session(0);
        registry.insert(s.clone()).unwrap();
        assert!(matches!(
            registry.insert(s),
            Err(SessionError::Registry(_))
        ));
    }

    #[test]
    fn test_cookie_binding() {
        let s = session(0);
        let mut cookies = ResponseCookies::new();
        cookies.bind(&s).unwrap();

        let cookie = cookies.set_cookie().unwrap();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}={}", s.id)));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));

        let mut sent = ResponseCookies::committed();
        assert_eq!(sent.bind(&s), Err(SessionError::HeadersSent));
        assert!(sent.set_cookie().is_none());
    }
}
