//! Mobile credential records
//!
//! One record per principal. A record is never physically removed;
//! deactivation (`is_active = false`) is the logical delete.

use nexus_core::PrincipalId;
use serde::{Deserialize, Serialize};

/// Feature flags for the mobile UI
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub time_tracking: bool,
    #[serde(default)]
    pub expenses: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            time_tracking: true,
            expenses: true,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::TimeTracking => self.time_tracking,
            Capability::Expenses => self.expenses,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    TimeTracking,
    Expenses,
}

/// Stored PIN credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub principal_id: PrincipalId,
    /// Hex-encoded Argon2id output
    pub pin_hash: String,
    /// Hex-encoded salt
    pub pin_salt: String,
    pub is_active: bool,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub failed_attempts: u32,
    /// Unix seconds; only ever set to a time in the future
    #[serde(default)]
    pub locked_until: Option<i64>,
    #[serde(default)]
    pub last_login_at: Option<i64>,
    pub created_at: i64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("principal_id", &self.principal_id)
            .field("is_active", &self.is_active)
            .field("capabilities", &self.capabilities)
            .field("failed_attempts", &self.failed_attempts)
            .field("locked_until", &self.locked_until)
            .field("last_login_at", &self.last_login_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// A lock that was set but has run out
    pub fn lock_expired(&self, now: i64) -> bool {
        self.locked_until.is_some_and(|until| until <= now)
    }

    /// Seconds until the lock lifts, if locked
    pub fn lock_remaining(&self, now: i64) -> Option<u64> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| (until - now).unsigned_abs())
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.allows(capability)
    }
}
