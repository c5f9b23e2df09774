//! PIN authenticator
//!
//! Drives a mobile login through its states:
//!
//! ```text
//! Unauthenticated -> PinPending -> (TotpPending) -> Authenticated
//!                  \-> Rejected | Locked
//! ```
//!
//! A correct PIN yields a [`PendingLogin`]; it does not touch the failure
//! counters. Counters are reset only once a session has been created and
//! bound to the response, so a login that fails late never hands out a free
//! attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nexus_core::{Clock, ConfigError, PrincipalId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::MobileConfig;
use crate::credential::{Capabilities, Credential};
use crate::error::{AuthError, Result, TotpError};
use crate::pin::{generate_pin, normalize_pin, validate_pin, PinHasher};
use crate::session::{MobileSession, SessionCarrier, SessionRegistry};
use crate::store::{CredentialStore, LockWrite};
use crate::totp::SecondFactor;

/// Where a login attempt stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Unauthenticated,
    /// PIN accepted, waiting for session creation
    PinPending,
    /// PIN accepted, waiting for a second-factor code
    TotpPending,
    Authenticated,
    Locked,
    Rejected,
}

/// A login that has passed the PIN step
///
/// Carried by the caller between requests. It grants nothing on its own;
/// the credential is re-checked when the session is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingLogin {
    principal_id: PrincipalId,
    totp_required: bool,
    totp_verified: bool,
    expires_at: i64,
}

impl PendingLogin {
    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn totp_required(&self) -> bool {
        self.totp_required
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// All required factors have been presented
    pub fn is_complete(&self) -> bool {
        !self.totp_required || self.totp_verified
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn state(&self) -> LoginState {
        if self.is_complete() {
            LoginState::PinPending
        } else {
            LoginState::TotpPending
        }
    }
}

/// Administrative view of a credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub principal_id: PrincipalId,
    pub is_active: bool,
    pub capabilities: Capabilities,
    pub failed_attempts: u32,
    pub locked_until: Option<i64>,
    /// Seconds left on an active lock
    pub lock_remaining_secs: Option<u64>,
    pub last_login_at: Option<i64>,
    pub created_at: i64,
}

/// PIN login state machine
pub struct PinAuthenticator {
    store: Arc<dyn CredentialStore>,
    second_factor: Arc<dyn SecondFactor>,
    clock: Arc<dyn Clock>,
    sessions: Arc<SessionRegistry>,
    hasher: PinHasher,
    config: MobileConfig,
    /// Wrong PINs the store failed to record, per principal
    unrecorded: Mutex<HashMap<PrincipalId, u32>>,
}

impl std::fmt::Debug for PinAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinAuthenticator")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl PinAuthenticator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        second_factor: Arc<dyn SecondFactor>,
        clock: Arc<dyn Clock>,
        config: MobileConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let hasher = PinHasher::new(config.hash_cost)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            store,
            second_factor,
            clock,
            sessions: Arc::new(SessionRegistry::new()),
            hasher,
            config,
            unrecorded: Mutex::new(HashMap::new()),
        })
    }

    /// Share a session registry with other components
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &MobileConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn unrecorded(&self) -> std::sync::MutexGuard<'_, HashMap<PrincipalId, u32>> {
        self.unrecorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored count plus attempts the store failed to record
    fn effective_failures(&self, principal_id: PrincipalId, stored: u32) -> u32 {
        let unrecorded = self.unrecorded().get(&principal_id).copied().unwrap_or(0);
        stored.saturating_add(unrecorded)
    }

    fn forget_unrecorded(&self, principal_id: PrincipalId) {
        self.unrecorded().remove(&principal_id);
    }

    fn totp_timeout(&self) -> Duration {
        Duration::from_millis(self.config.totp_timeout_ms)
    }

    /// A fresh PIN of the configured length
    pub fn generate_pin(&self) -> Zeroizing<String> {
        generate_pin(self.config.pin_length)
    }

    /// Hash `pin` and store an active credential, replacing any existing one
    ///
    /// Replacing a credential starts it over: counters and lock are cleared.
    pub fn create_credential(
        &self,
        principal_id: PrincipalId,
        pin: &str,
        capabilities: Capabilities,
    ) -> Result<()> {
        let pin = normalize_pin(pin);
        validate_pin(&pin)?;

        let now = self.clock.now();
        let created_at = self
            .store
            .get(principal_id)
            .map_err(|e| self.storage_failure(principal_id, "read credential", e))?
            .map_or(now, |existing| existing.created_at);

        let digest = self.hasher.hash(&pin)?;
        let credential = Credential {
            principal_id,
            pin_hash: digest.hash,
            pin_salt: digest.salt,
            is_active: true,
            capabilities,
            failed_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at,
        };

        self.store
            .upsert(credential)
            .map_err(|e| self.storage_failure(principal_id, "store credential", e))?;

        info!(principal_id = %principal_id, "mobile credential provisioned");
        Ok(())
    }

    /// PIN step of the login
    ///
    /// Wrong PINs are counted atomically in the store. Any attempt that
    /// finds the count at the threshold asks the store to set the lock; the
    /// store lets only one of them write it.
    pub async fn verify_pin(&self, principal_id: PrincipalId, pin: &str) -> Result<PendingLogin> {
        let pin = normalize_pin(pin);
        let now = self.clock.now();

        let mut credential = match self.store.get(principal_id) {
            Ok(Some(credential)) if credential.is_active => credential,
            Ok(_) => {
                // Same work as a real check so timing does not reveal the account
                self.hasher.dummy_verify(&pin);
                debug!(principal_id = %principal_id, "no active mobile credential");
                return Err(AuthError::NoCredential);
            }
            Err(e) => return Err(self.storage_failure(principal_id, "read credential", e)),
        };

        if let Some(remaining_secs) = credential.lock_remaining(now) {
            debug!(principal_id = %principal_id, remaining_secs, "PIN attempt while locked");
            return Err(AuthError::Locked { remaining_secs });
        }

        if credential.lock_expired(now) {
            // Lock has run out: a fresh set of attempts
            self.store
                .reset_failed_attempts(principal_id)
                .map_err(|e| self.storage_failure(principal_id, "clear expired lock", e))?;
            self.forget_unrecorded(principal_id);
            credential.failed_attempts = 0;
            credential.locked_until = None;
            debug!(principal_id = %principal_id, "expired PIN lock cleared");
        } else if self
            .config
            .lockout
            .should_lock(self.effective_failures(principal_id, credential.failed_attempts))
        {
            // Counter is at the threshold but the lock has not landed
            return Err(self.lock(principal_id, now));
        }

        let matched = self
            .hasher
            .verify(&pin, &credential.pin_hash, &credential.pin_salt)
            .inspect_err(|e| {
                error!(principal_id = %principal_id, error = %e, "stored PIN hash unusable");
            })?;

        if !matched {
            return Err(self.record_failure(&credential, now));
        }

        let totp_required = self.has_second_factor(principal_id).await?;
        debug!(principal_id = %principal_id, totp_required, "PIN accepted");

        Ok(PendingLogin {
            principal_id,
            totp_required,
            totp_verified: false,
            expires_at: now.saturating_add(self.config.pending_window_secs),
        })
    }

    /// Reject a login for a name that resolved to nobody
    ///
    /// Spends the same hashing work as a real attempt.
    pub fn reject_unknown(&self, pin: &str) -> AuthError {
        self.hasher.dummy_verify(&normalize_pin(pin));
        AuthError::NoCredential
    }

    /// Count a wrong PIN and decide the verdict
    ///
    /// Never fails open: an attempt the store cannot record is counted in
    /// process until the lock lands or the counters are reset.
    fn record_failure(&self, credential: &Credential, now: i64) -> AuthError {
        let principal_id = credential.principal_id;
        let policy = &self.config.lockout;

        let stored = match self.store.increment_failed_attempts(principal_id) {
            Ok(count) => count,
            Err(e) => {
                error!(
                    principal_id = %principal_id,
                    error = %e,
                    "failed to record failed PIN attempt"
                );
                *self.unrecorded().entry(principal_id).or_insert(0) += 1;
                credential.failed_attempts
            }
        };
        let count = self.effective_failures(principal_id, stored);

        if policy.should_lock(count) {
            return self.lock(principal_id, now);
        }

        let attempts_remaining = policy.attempts_remaining(count);
        info!(
            principal_id = %principal_id,
            failed_attempts = count,
            attempts_remaining,
            "incorrect PIN"
        );
        AuthError::Rejected { attempts_remaining }
    }

    /// Lock the credential unless a lock is already in force
    fn lock(&self, principal_id: PrincipalId, now: i64) -> AuthError {
        let policy = &self.config.lockout;
        match self
            .store
            .lock_if_unlocked(principal_id, policy.lock_until(now), now)
        {
            Ok(LockWrite::Set) => {
                self.forget_unrecorded(principal_id);
                warn!(
                    principal_id = %principal_id,
                    lockout_secs = policy.lockout_secs,
                    "mobile credential locked after repeated failures"
                );
            }
            Ok(LockWrite::AlreadyLocked { until }) => {
                self.forget_unrecorded(principal_id);
                let remaining_secs = u64::try_from(until.saturating_sub(now)).unwrap_or(0);
                return AuthError::Locked { remaining_secs };
            }
            Err(e) => {
                error!(principal_id = %principal_id, error = %e, "failed to persist PIN lock");
            }
        }
        AuthError::Locked {
            remaining_secs: policy.lockout_secs,
        }
    }

    /// Whether the principal must present a second factor
    ///
    /// A provider that fails or times out rejects the login rather than
    /// skipping the second factor.
    pub async fn has_second_factor(&self, principal_id: PrincipalId) -> Result<bool> {
        match tokio::time::timeout(
            self.totp_timeout(),
            self.second_factor.is_enrolled(principal_id),
        )
        .await
        {
            Ok(Ok(enrolled)) => Ok(enrolled),
            Ok(Err(e)) => Err(self.totp_unavailable(principal_id, e)),
            Err(_) => Err(self.totp_unavailable(principal_id, TotpError::Timeout)),
        }
    }

    /// TOTP step with the configured timeout
    pub async fn verify_totp(&self, pending: &mut PendingLogin, code: &str) -> Result<()> {
        self.verify_totp_with_timeout(pending, code, self.totp_timeout())
            .await
    }

    /// TOTP step bounded by `timeout`
    ///
    /// A wrong code leaves the login in `TotpPending` and does not count
    /// against the PIN.
    pub async fn verify_totp_with_timeout(
        &self,
        pending: &mut PendingLogin,
        code: &str,
        timeout: Duration,
    ) -> Result<()> {
        let principal_id = pending.principal_id;
        if pending.is_expired(self.clock.now()) {
            return Err(AuthError::PendingExpired);
        }
        if !pending.totp_required {
            return Err(AuthError::InvalidState("no second factor is required"));
        }
        if pending.totp_verified {
            return Ok(());
        }

        match tokio::time::timeout(timeout, self.second_factor.verify(principal_id, code)).await {
            Ok(Ok(true)) => {
                pending.totp_verified = true;
                debug!(principal_id = %principal_id, "second factor accepted");
                Ok(())
            }
            Ok(Ok(false)) => {
                info!(principal_id = %principal_id, "invalid authentication code");
                Err(AuthError::TotpInvalid)
            }
            Ok(Err(e)) => Err(self.totp_unavailable(principal_id, e)),
            Err(_) => Err(self.totp_unavailable(principal_id, TotpError::Timeout)),
        }
    }

    fn totp_unavailable(&self, principal_id: PrincipalId, e: TotpError) -> AuthError {
        warn!(principal_id = %principal_id, error = %e, "second-factor provider failed");
        AuthError::TotpUnavailable(e.to_string())
    }

    /// Finish the login: create, register and bind a session
    ///
    /// The credential is re-read so a lock or deactivation that happened
    /// since the PIN step still applies. Counters are reset and
    /// `last_login_at` stamped only after the session is bound.
    pub async fn create_mobile_session(
        &self,
        pending: &PendingLogin,
        carrier: &mut dyn SessionCarrier,
    ) -> Result<MobileSession> {
        let principal_id = pending.principal_id;
        let now = self.clock.now();

        if pending.is_expired(now) {
            return Err(AuthError::PendingExpired);
        }
        if !pending.is_complete() {
            return Err(AuthError::TotpRequired);
        }

        let credential = match self.store.get(principal_id) {
            Ok(Some(credential)) if credential.is_active => credential,
            Ok(_) => return Err(AuthError::NoCredential),
            Err(e) => return Err(self.storage_failure(principal_id, "read credential", e)),
        };
        if let Some(remaining_secs) = credential.lock_remaining(now) {
            return Err(AuthError::Locked { remaining_secs });
        }

        let purged = self.sessions.purge_expired(now);
        if purged > 0 {
            debug!(purged, "expired mobile sessions purged");
        }

        let session = MobileSession::new(
            principal_id,
            credential.capabilities,
            now,
            &self.config.session,
        );
        self.sessions.insert(session.clone())?;

        if let Err(e) = carrier.bind(&session) {
            self.sessions.revoke(&session.id);
            warn!(principal_id = %principal_id, error = %e, "failed to bind mobile session");
            return Err(e.into());
        }

        if let Err(e) = self.store.record_success(principal_id, now) {
            self.sessions.revoke(&session.id);
            return Err(self.storage_failure(principal_id, "record successful login", e));
        }
        self.forget_unrecorded(principal_id);

        info!(principal_id = %principal_id, "mobile login completed");
        Ok(session)
    }

    /// Look up a live session by id
    pub fn validate_session(&self, id: &str) -> Option<MobileSession> {
        self.sessions.validate(id, self.clock.now())
    }

    pub fn set_active(&self, principal_id: PrincipalId, active: bool) -> Result<()> {
        self.store
            .set_active(principal_id, active)
            .map_err(|e| self.storage_failure(principal_id, "set active flag", e))?;
        info!(principal_id = %principal_id, active, "mobile credential active flag changed");
        Ok(())
    }

    /// Clear the failure counter and any lock
    pub fn unlock(&self, principal_id: PrincipalId) -> Result<()> {
        self.store
            .reset_failed_attempts(principal_id)
            .map_err(|e| self.storage_failure(principal_id, "reset failed attempts", e))?;
        self.forget_unrecorded(principal_id);
        info!(principal_id = %principal_id, "mobile credential unlocked");
        Ok(())
    }

    pub fn set_capabilities(
        &self,
        principal_id: PrincipalId,
        capabilities: Capabilities,
    ) -> Result<()> {
        self.store
            .set_capabilities(principal_id, capabilities)
            .map_err(|e| self.storage_failure(principal_id, "set capabilities", e))
    }

    pub fn credential_status(&self, principal_id: PrincipalId) -> Result<CredentialStatus> {
        let credential = self
            .store
            .get(principal_id)
            .map_err(|e| self.storage_failure(principal_id, "read credential", e))?
            .ok_or(AuthError::NoCredential)?;
        let now = self.clock.now();

        Ok(CredentialStatus {
            principal_id,
            is_active: credential.is_active,
            capabilities: credential.capabilities,
            failed_attempts: credential.failed_attempts,
            locked_until: credential.locked_until,
            lock_remaining_secs: credential.lock_remaining(now),
            last_login_at: credential.last_login_at,
            created_at: credential.created_at,
        })
    }

    fn storage_failure(
        &self,
        principal_id: PrincipalId,
        action: &str,
        e: crate::error::StoreError,
    ) -> AuthError {
        let error: AuthError = e.into();
        if error.is_system_failure() {
            error!(principal_id = %principal_id, action, error = %error, "credential store failure");
        }
        error
    }
}
