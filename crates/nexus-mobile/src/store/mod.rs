//! Credential storage
//!
//! Every verification attempt mutates the credential, so the store is the one
//! place where concurrent requests for the same principal meet. Implementations
//! must make each method atomic with respect to the others, across every
//! process sharing the backend. In particular `increment_failed_attempts`
//! must never let two callers observe the same count, and
//! `lock_if_unlocked` must let only one caller set a lock.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use nexus_core::PrincipalId;

use crate::credential::{Capabilities, Credential};
use crate::error::StoreError;

/// Persistence contract consumed by the PIN authenticator
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential for a principal
    fn get(&self, principal_id: PrincipalId) -> Result<Option<Credential>, StoreError>;

    /// Insert or replace the credential keyed by its principal
    fn upsert(&self, credential: Credential) -> Result<(), StoreError>;

    /// Atomically add one failed attempt and return the new count
    fn increment_failed_attempts(&self, principal_id: PrincipalId) -> Result<u32, StoreError>;

    fn reset_failed_attempts(&self, principal_id: PrincipalId) -> Result<(), StoreError>;

    fn set_locked_until(
        &self,
        principal_id: PrincipalId,
        until: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Set `locked_until` unless a lock is already in force at `now`
    ///
    /// Racing callers get exactly one [`LockWrite::Set`].
    fn lock_if_unlocked(
        &self,
        principal_id: PrincipalId,
        until: i64,
        now: i64,
    ) -> Result<LockWrite, StoreError>;

    fn set_active(&self, principal_id: PrincipalId, active: bool) -> Result<(), StoreError>;

    fn set_capabilities(
        &self,
        principal_id: PrincipalId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError>;

    /// Reset the counter, clear the lock and stamp `last_login_at` in one step
    fn record_success(&self, principal_id: PrincipalId, at: i64) -> Result<(), StoreError>;

    /// All credentials, ordered by principal
    fn list(&self) -> Result<Vec<Credential>, StoreError>;
}

/// Outcome of [`CredentialStore::lock_if_unlocked`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockWrite {
    /// This call wrote the lock
    Set,
    /// A lock was already in force
    AlreadyLocked { until: i64 },
}

/// Apply a lock to a record unless one is active
pub(crate) fn lock_once(credential: &mut Credential, until: i64, now: i64) -> LockWrite {
    match credential.locked_until {
        Some(existing) if existing > now => LockWrite::AlreadyLocked { until: existing },
        _ => {
            credential.locked_until = Some(until);
            LockWrite::Set
        }
    }
}

/// Mutations shared by the in-process stores
pub(crate) enum Mutation {
    IncrementFailed,
    ResetFailed,
    LockedUntil(Option<i64>),
    Active(bool),
    Capabilities(Capabilities),
    Success(i64),
}

impl Mutation {
    /// Apply to a record and return the resulting failed-attempt count
    pub(crate) fn apply(self, credential: &mut Credential) -> u32 {
        match self {
            Mutation::IncrementFailed => {
                credential.failed_attempts = credential.failed_attempts.saturating_add(1);
            }
            Mutation::ResetFailed => {
                credential.failed_attempts = 0;
                credential.locked_until = None;
            }
            Mutation::LockedUntil(until) => credential.locked_until = until,
            Mutation::Active(active) => credential.is_active = active,
            Mutation::Capabilities(capabilities) => credential.capabilities = capabilities,
            Mutation::Success(at) => {
                credential.failed_attempts = 0;
                credential.locked_until = None;
                credential.last_login_at = Some(at);
            }
        }
        credential.failed_attempts
    }
}
