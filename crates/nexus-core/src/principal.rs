//! Principals and the identity directory
//!
//! A principal is the team member a token or mobile session refers to. The
//! directory that resolves them (users, roles) lives outside this crate; only
//! the lookup contract is defined here.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Positive numeric principal identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PrincipalId(u64);

impl PrincipalId {
    /// Create an identifier, rejecting zero
    pub fn new(id: u64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Interpret a JWT `sub` claim
    ///
    /// Accepts a positive JSON integer or a string made only of ASCII digits.
    pub fn from_claim(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::new),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrincipalId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::Invalid(format!("not a principal id: {s:?}")));
        }
        s.parse::<u64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ConfigError::Invalid(format!("not a principal id: {s:?}")))
    }
}

impl TryFrom<u64> for PrincipalId {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "principal id must be positive".to_string())
    }
}

impl From<PrincipalId> for u64 {
    fn from(id: PrincipalId) -> Self {
        id.0
    }
}

/// A resolved identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    /// Login name, matched case-insensitively
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Lookup contract for the external identity store
pub trait PrincipalDirectory: Send + Sync {
    /// Resolve a principal by id
    fn by_id(&self, id: PrincipalId) -> Option<Principal>;

    /// Resolve a principal by login name
    fn by_username(&self, username: &str) -> Option<Principal>;
}

/// In-memory directory
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
    principals: HashMap<PrincipalId, Principal>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of principals; later entries win on duplicate ids
    pub fn from_principals(principals: impl IntoIterator<Item = Principal>) -> Self {
        let mut directory = Self::new();
        for principal in principals {
            directory.insert(principal);
        }
        directory
    }

    /// Load a JSON array of principals
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let principals: Vec<Principal> = serde_json::from_str(&contents)?;
        Ok(Self::from_principals(principals))
    }

    pub fn insert(&mut self, principal: Principal) {
        self.principals.insert(principal.id, principal);
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl PrincipalDirectory for MemoryDirectory {
    fn by_id(&self, id: PrincipalId) -> Option<Principal> {
        self.principals.get(&id).cloned()
    }

    fn by_username(&self, username: &str) -> Option<Principal> {
        let wanted = username.trim();
        self.principals
            .values()
            .find(|p| p.username.eq_ignore_ascii_case(wanted))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> Principal {
        Principal {
            id: PrincipalId::new(42).unwrap(),
            username: "alice".into(),
            display_name: "Alice Example".into(),
            roles: vec!["team_member".into()],
        }
    }

    #[test]
    fn test_zero_is_not_a_principal() {
        assert!(PrincipalId::new(0).is_none());
        assert!("0".parse::<PrincipalId>().is_err());
    }

    #[test]
    fn test_from_claim() {
        assert_eq!(PrincipalId::from_claim(&json!(42)).map(PrincipalId::get), Some(42));
        assert_eq!(PrincipalId::from_claim(&json!("42")).map(PrincipalId::get), Some(42));
        assert!(PrincipalId::from_claim(&json!(-3)).is_none());
        assert!(PrincipalId::from_claim(&json!(4.5)).is_none());
        assert!(PrincipalId::from_claim(&json!("4a")).is_none());
        assert!(PrincipalId::from_claim(&json!("+4")).is_none());
        assert!(PrincipalId::from_claim(&json!(null)).is_none());
        assert!(PrincipalId::from_claim(&json!(true)).is_none());
    }

    #[test]
    fn test_serde_rejects_zero() {
        assert!(serde_json::from_str::<PrincipalId>("0").is_err());
        let id: PrincipalId = serde_json::from_str("9").unwrap();
        assert_eq!(id.get(), 9);
    }

    #[test]
    fn test_directory_lookup() {
        let directory = MemoryDirectory::from_principals([alice()]);

        assert_eq!(directory.by_id(PrincipalId::new(42).unwrap()), Some(alice()));
        assert_eq!(directory.by_username(" ALICE "), Some(alice()));
        assert!(directory.by_username("bob").is_none());
        assert!(directory.by_id(PrincipalId::new(7).unwrap()).is_none());
    }

    #[test]
    fn test_directory_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("principals.json");
        std::fs::write(
            &path,
            r#"[{"id": 42, "username": "alice", "roles": ["team_member"]}]"#,
        )
        .unwrap();

        let directory = MemoryDirectory::load(&path).unwrap();
        let principal = directory.by_username("alice").unwrap();
        assert!(principal.has_role("team_member"));
        assert_eq!(principal.display_name, "");
    }
}
