//! JSON file credential store
//!
//! The whole credential table lives in one JSON document. Each mutation
//! takes the in-process mutex and the `<file>.lock` lease, re-reads the
//! document, applies the change and replaces the file atomically. Separate
//! processes sharing the file therefore never lose each other's updates.
//! Reads go straight to disk; the rename makes them see either the old or
//! the new table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use nexus_core::PrincipalId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{lock_once, CredentialStore, LockWrite, Mutation};
use crate::credential::{Capabilities, Credential};
use crate::error::StoreError;
use crate::persist::{write_atomic, FileLease, LEASE_TIMEOUT};

/// On-disk format version
const FORMAT_VERSION: u32 = 1;

type Table = HashMap<PrincipalId, Credential>;

#[derive(Serialize, Deserialize)]
struct CredentialFile {
    /// Version for future migrations
    version: u32,
    credentials: Vec<Credential>,
}

/// Credential store persisted to a JSON file
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileCredentialStore {
    /// Open the store, creating the parent directory if needed
    ///
    /// A missing file is an empty store; it is written on first mutation.
    /// An existing file is parsed up front so a corrupt table fails here.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let store = Self {
            path,
            writer: Mutex::new(()),
        };
        let count = store.read_table()?.len();
        debug!(path = %store.path.display(), count, "opened credential store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<Table, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let file: CredentialFile = serde_json::from_str(&contents).map_err(|e| {
            StoreError::Serialization(format!("Failed to parse credential store: {e}"))
        })?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "Unsupported credential store version {}",
                file.version
            )));
        }
        Ok(file
            .credentials
            .into_iter()
            .map(|c| (c.principal_id, c))
            .collect())
    }

    fn write_table(&self, credentials: &Table) -> Result<(), StoreError> {
        let mut sorted: Vec<Credential> = credentials.values().cloned().collect();
        sorted.sort_by_key(|c| c.principal_id);
        let file = CredentialFile {
            version: FORMAT_VERSION,
            credentials: sorted,
        };
        let contents = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, contents.as_bytes())?;
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Unavailable("credential file lock poisoned".to_string()))
    }

    /// Read-modify-write the table under the lease
    ///
    /// Nothing is written when `change` fails.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.writer()?;
        let _lease = FileLease::acquire(&self.path, LEASE_TIMEOUT).map_err(|e| {
            StoreError::Unavailable(format!("credential file is busy: {e}"))
        })?;

        let mut table = self.read_table()?;
        let out = change(&mut table)?;
        self.write_table(&table)?;
        Ok(out)
    }

    fn mutate(&self, principal_id: PrincipalId, mutation: Mutation) -> Result<u32, StoreError> {
        self.commit(|credentials| {
            let credential = credentials
                .get_mut(&principal_id)
                .ok_or(StoreError::NotFound(principal_id))?;
            Ok(mutation.apply(credential))
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, principal_id: PrincipalId) -> Result<Option<Credential>, StoreError> {
        Ok(self.read_table()?.remove(&principal_id))
    }

    fn upsert(&self, credential: Credential) -> Result<(), StoreError> {
        self.commit(|credentials| {
            credentials.insert(credential.principal_id, credential);
            Ok(())
        })
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
        self.commit(|credentials| {
            let credential = credentials
                .get_mut(&principal_id)
                .ok_or(StoreError::NotFound(principal_id))?;
            Ok(lock_once(credential, until, now))
        })
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
        let mut all: Vec<Credential> = self.read_table()?.into_values().collect();
        all.sort_by_key(|c| c.principal_id);
        Ok(all)
    }
}
