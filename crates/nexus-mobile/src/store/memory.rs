//! In-memory credential store

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use nexus_core::PrincipalId;

use super::{lock_once, CredentialStore, LockWrite, Mutation};
use crate::credential::{Capabilities, Credential};
use crate::error::StoreError;

/// Credential store backed by a mutex-guarded map
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<HashMap<PrincipalId, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<PrincipalId, Credential>>, StoreError> {
        self.credentials
            .lock()
            .map_err(|_| StoreError::Unavailable("credential map lock poisoned".to_string()))
    }

    fn mutate(&self, principal_id: PrincipalId, mutation: Mutation) -> Result<u32, StoreError> {
        let mut credentials = self.lock()?;
        let credential = credentials
            .get_mut(&principal_id)
            .ok_or(StoreError::NotFound(principal_id))?;
        Ok(mutation.apply(credential))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, principal_id: PrincipalId) -> Result<Option<Credential>, StoreError> {
        Ok(self.lock()?.get(&principal_id).cloned())
    }

    fn upsert(&self, credential: Credential) -> Result<(), StoreError> {
        self.lock()?.insert(credential.principal_id, credential);
        Ok(())
    }

    fn increment_failed_attempts(&self, principal_id: PrincipalId) -> Result<u32, StoreError> {
        self.mutate(principal_id, Mutation::IncrementFailed)
    }

    fn reset_failed_attempts(&self, principal_id: PrincipalId) -> Result<(), StoreError> {
        self.mutate(principal_id, Mutation::ResetFailed).map(drop)
    }

    fn set_locked_until(
        &self,
        principal_id: PrincipalId,
        until: Option<i64>,
    ) -> Result<(), StoreError> {
        self.mutate(principal_id, Mutation::LockedUntil(until)).map(drop)
    }

    fn lock_if_unlocked(
        &self,
        principal_id: PrincipalId,
        until: i64,
        now: i64,
    ) -> Result<LockWrite, StoreError> {
        let mut credentials = self.lock()?;
        let credential = credentials
            .get_mut(&principal_id)
            .ok_or(StoreError::NotFound(principal_id))?;
        Ok(lock_once(credential, until, now))
    }

    fn set_active(&self, principal_id: PrincipalId, active: bool) -> Result<(), StoreError> {
        self.mutate(principal_id, Mutation::Active(active)).map(drop)
    }

    fn set_capabilities(
        &self,
        principal_id: PrincipalId,
        capabilities: Capabilities,
    ) -> Result<(), StoreError> {
        self.mutate(principal_id, Mutation::Capabilities(capabilities))
            .map(drop)
    }

    fn record_success(&self, principal_id: PrincipalId, at: i64) -> Result<(), StoreError> {
        self.mutate(principal_id, Mutation::Success(at)).map(drop)
    }

    fn list(&self) -> Result<Vec<Credential>, StoreError> {
        let mut all: Vec<Credential> = self.lock()?.values().cloned().collect();
        all.sort_by_key(|c| c.principal_id);
        Ok(all)
    }
}
