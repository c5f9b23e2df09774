//! Second-factor delegation
//!
//! The authenticator only ever asks two questions of the 2FA provider: is
//! this principal enrolled, and is this code valid. [`SecondFactor`] is that
//! contract. [`NoSecondFactor`] is the default when no provider is installed;
//! [`TotpProvider`] verifies RFC 6238 codes from secrets it was handed.
//! Enrollment is owned by the provider, not by this crate.
//!
//! Wrong codes are the provider's to count. `TotpProvider` locks a
//! principal's second factor after too many of them and refuses a code for
//! a time step that was already used.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base32::Alphabet;
use nexus_core::{Clock, PrincipalId};
use serde::{Deserialize, Serialize};
use subtle::{ConditionallySelectable, ConstantTimeEq};
use totp_lite::{Sha1, Sha256, Sha512};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::TotpError;
use crate::lockout::LockoutPolicy;
use crate::persist::{write_atomic, FileLease, LEASE_TIMEOUT};

/// Second-factor capability consumed by the PIN authenticator
#[async_trait]
pub trait SecondFactor: Send + Sync {
    /// Whether the principal has a second factor enrolled
    async fn is_enrolled(&self, principal_id: PrincipalId) -> Result<bool, TotpError>;

    /// Check a code; `Ok(false)` is a wrong code, `Err` a provider failure
    async fn verify(&self, principal_id: PrincipalId, code: &str) -> Result<bool, TotpError>;
}

/// Provider used when no 2FA plugin is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSecondFactor;

#[async_trait]
impl SecondFactor for NoSecondFactor {
    async fn is_enrolled(&self, _principal_id: PrincipalId) -> Result<bool, TotpError> {
        Ok(false)
    }

    async fn verify(&self, _principal_id: PrincipalId, _code: &str) -> Result<bool, TotpError> {
        Ok(false)
    }
}

/// Hash algorithm for TOTP
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TotpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

fn default_digits() -> u32 {
    6
}

fn default_period() -> u64 {
    30
}

/// Enrolled TOTP parameters for one principal
#[derive(Clone, Serialize, Deserialize)]
pub struct TotpState {
    /// Base32 shared secret
    pub secret: String,
    #[serde(default)]
    pub algorithm: TotpAlgorithm,
    #[serde(default = "default_digits")]
    pub digits: u32,
    #[serde(default = "default_period")]
    pub period: u64,
}

impl fmt::Debug for TotpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpState")
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl TotpState {
    /// SHA1, 6 digits, 30 second steps
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: TotpAlgorithm::Sha1,
            digits: default_digits(),
            period: default_period(),
        }
    }

    fn secret_bytes(&self) -> Result<Zeroizing<Vec<u8>>, TotpError> {
        let cleaned: String = self
            .secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        base32::decode(Alphabet::RFC4648 { padding: false }, &cleaned)
            .filter(|bytes| !bytes.is_empty())
            .map(Zeroizing::new)
            .ok_or(TotpError::InvalidSecret)
    }

    /// Code for the step containing `time`
    pub fn code_at(&self, time: u64) -> Result<Zeroizing<String>, TotpError> {
        if self.period == 0 {
            return Err(TotpError::Provider("TOTP period must be positive".to_string()));
        }
        let secret = self.secret_bytes()?;
        let code = match self.algorithm {
            TotpAlgorithm::Sha1 => {
                totp_lite::totp_custom::<Sha1>(self.period, self.digits, &secret, time)
            }
            TotpAlgorithm::Sha256 => {
                totp_lite::totp_custom::<Sha256>(self.period, self.digits, &secret, time)
            }
            TotpAlgorithm::Sha512 => {
                totp_lite::totp_custom::<Sha512>(self.period, self.digits, &secret, time)
            }
        };
        Ok(Zeroizing::new(code))
    }
}

/// Wrong-code and replay bookkeeping for one principal
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CodeAttempts {
    #[serde(default)]
    failures: u32,
    #[serde(default)]
    locked_until: Option<i64>,
    /// Last time step a code was accepted for
    #[serde(default)]
    last_step: Option<u64>,
}

type Ledger = HashMap<PrincipalId, CodeAttempts>;

fn ledger_error(e: impl fmt::Display) -> TotpError {
    TotpError::Provider(format!("code attempt ledger: {e}"))
}

/// TOTP verifier over a fixed set of enrolled principals
pub struct TotpProvider {
    states: HashMap<PrincipalId, TotpState>,
    clock: Arc<dyn Clock>,
    /// Steps of clock drift accepted either side of now
    skew_steps: u64,
    lockout: LockoutPolicy,
    attempts: Mutex<Ledger>,
    /// Ledger file shared by every process using these secrets
    attempts_path: Option<PathBuf>,
}

impl fmt::Debug for TotpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpProvider")
            .field("enrolled", &self.states.len())
            .field("skew_steps", &self.skew_steps)
            .field("lockout", &self.lockout)
            .field("attempts_path", &self.attempts_path)
            .finish()
    }
}

impl TotpProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: HashMap::new(),
            clock,
            skew_steps: 1,
            lockout: LockoutPolicy::default(),
            attempts: Mutex::new(HashMap::new()),
            attempts_path: None,
        }
    }

    /// Wrong codes allowed before the second factor locks, and for how long
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    /// Keep the attempt ledger in `path` instead of in memory
    pub fn with_attempts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.attempts_path = Some(path.into());
        self
    }

    pub fn with_state(mut self, principal_id: PrincipalId, state: TotpState) -> Self {
        self.states.insert(principal_id, state);
        self
    }

    pub fn with_skew_steps(mut self, skew_steps: u64) -> Self {
        self.skew_steps = skew_steps;
        self
    }

    /// Load `{"<principal id>": {"secret": "..."}}` from a JSON file
    pub fn load(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, TotpError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| TotpError::Provider(e.to_string()))?;
        let raw: HashMap<String, TotpState> =
            serde_json::from_str(&contents).map_err(|e| TotpError::Provider(e.to_string()))?;

        let mut provider = Self::new(clock);
        for (key, state) in raw {
            let principal_id: PrincipalId = key
                .parse()
                .map_err(|_| TotpError::Provider(format!("invalid principal id {key:?}")))?;
            provider.states.insert(principal_id, state);
        }
        Ok(provider)
    }

    /// Time step `code` is valid for, if any
    fn check(&self, state: &TotpState, code: &str, now: i64) -> Result<Option<u64>, TotpError> {
        let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        let digits = usize::try_from(state.digits).unwrap_or(usize::MAX);
        if code.len() != digits || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }

        let now = u64::try_from(now)
            .map_err(|_| TotpError::Provider("clock before Unix epoch".to_string()))?;

        let mut matched = subtle::Choice::from(0);
        let mut matched_step = 0u64;
        for offset in 0..=(2 * self.skew_steps) {
            let shifted = now + offset * state.period;
            let Some(time) = shifted.checked_sub(self.skew_steps * state.period) else {
                continue;
            };
            let expected = state.code_at(time)?;
            let hit = expected.as_bytes().ct_eq(code.as_bytes());
            matched_step = u64::conditional_select(&matched_step, &(time / state.period), hit);
            matched |= hit;
        }
        Ok(bool::from(matched).then_some(matched_step))
    }

    /// Run `change` against the ledger, reloading and saving it when file-backed
    fn with_ledger<T>(
        &self,
        change: impl FnOnce(&mut Ledger) -> Result<T, TotpError>,
    ) -> Result<T, TotpError> {
        let mut ledger = self
            .attempts
            .lock()
            .map_err(|_| ledger_error("lock poisoned"))?;
        let Some(path) = &self.attempts_path else {
            return change(&mut ledger);
        };

        let _lease = FileLease::acquire(path, LEASE_TIMEOUT).map_err(ledger_error)?;
        *ledger = read_ledger(path)?;
        let out = change(&mut ledger)?;
        write_ledger(path, &ledger)?;
        Ok(out)
    }

    fn check_and_record(
        &self,
        principal_id: PrincipalId,
        state: &TotpState,
        code: &str,
    ) -> Result<bool, TotpError> {
        let now = self.clock.now();
        self.with_ledger(|ledger| {
            let entry = ledger.entry(principal_id).or_default();
            if let Some(until) = entry.locked_until {
                if until > now {
                    debug!(
                        principal_id = %principal_id,
                        "code refused while second factor is locked"
                    );
                    return Ok(false);
                }
                entry.failures = 0;
                entry.locked_until = None;
            }

            let accepted = match self.check(state, code, now)? {
                Some(step) if entry.last_step.map_or(true, |last| step > last) => {
                    entry.last_step = Some(step);
                    true
                }
                Some(_) => {
                    warn!(principal_id = %principal_id, "authentication code reused");
                    false
                }
                None => false,
            };

            if accepted {
                entry.failures = 0;
            } else {
                entry.failures = entry.failures.saturating_add(1);
                if self.lockout.should_lock(entry.failures) {
                    entry.locked_until = Some(self.lockout.lock_until(now));
                    warn!(
                        principal_id = %principal_id,
                        lockout_secs = self.lockout.lockout_secs,
                        "second factor locked after repeated wrong codes"
                    );
                }
            }
            Ok(accepted)
        })
    }
}

fn read_ledger(path: &Path) -> Result<Ledger, TotpError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = std::fs::read_to_string(path).map_err(ledger_error)?;
    let raw: HashMap<String, CodeAttempts> =
        serde_json::from_str(&contents).map_err(ledger_error)?;
    raw.into_iter()
        .map(|(key, attempts)| {
            key.parse::<PrincipalId>()
                .map(|id| (id, attempts))
                .map_err(|_| ledger_error(format!("invalid principal id {key:?}")))
        })
        .collect()
}

fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), TotpError> {
    let raw: HashMap<String, &CodeAttempts> = ledger
        .iter()
        .map(|(id, attempts)| (id.to_string(), attempts))
        .collect();
    let contents = serde_json::to_string_pretty(&raw).map_err(ledger_error)?;
    write_atomic(path, contents.as_bytes()).map_err(ledger_error)
}

#[async_trait]
impl SecondFactor for TotpProvider {
    async fn is_enrolled(&self, principal_id: PrincipalId) -> Result<bool, TotpError> {
        Ok(self.states.contains_key(&principal_id))
    }

    async fn verify(&self, principal_id: PrincipalId, code: &str) -> Result<bool, TotpError> {
        match self.states.get(&principal_id) {
            Some(state) => self.check_and_record(principal_id, state, code),
            None => Ok(false),
        }
    }
}
