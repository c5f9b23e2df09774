//! Mobile login configuration

use nexus_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::lockout::LockoutPolicy;
use crate::pin::{HashCost, DEFAULT_PIN_LENGTH, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
use crate::session::SessionConfig;

/// Everything the PIN authenticator needs to know about policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobileConfig {
    pub lockout: LockoutPolicy,
    pub session: SessionConfig,
    /// How long a correct PIN stays usable while the TOTP step is pending
    pub pending_window_secs: i64,
    /// Upper bound on any call to the second-factor provider
    pub totp_timeout_ms: u64,
    /// Length of PINs produced by `generate_pin`
    pub pin_length: usize,
    /// Show "N attempts remaining" to the user
    ///
    /// Off by default: the count differs from what an unknown username
    /// would show.
    pub disclose_attempts_remaining: bool,
    pub hash_cost: HashCost,
}

impl Default for MobileConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy::default(),
            session: SessionConfig::default(),
            pending_window_secs: 300,
            totp_timeout_ms: 3000,
            pin_length: DEFAULT_PIN_LENGTH,
            disclose_attempts_remaining: false,
            hash_cost: HashCost::default(),
        }
    }
}

impl MobileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lockout.threshold == 0 {
            return Err(ConfigError::Invalid(
                "lockout threshold must be at least 1".to_string(),
            ));
        }
        if self.lockout.lockout_secs == 0 {
            return Err(ConfigError::Invalid(
                "lockout duration must be at least 1 second".to_string(),
            ));
        }
        if self.session.max_duration_secs <= 0 {
            return Err(ConfigError::Invalid(
                "session duration must be positive".to_string(),
            ));
        }
        if self.pending_window_secs <= 0 {
            return Err(ConfigError::Invalid(
                "pending login window must be positive".to_string(),
            ));
        }
        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&self.pin_length) {
            return Err(ConfigError::Invalid(format!(
                "pin length must be {MIN_PIN_LENGTH}-{MAX_PIN_LENGTH}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MobileConfig::default();
        assert_eq!(config.lockout.threshold, 5);
        assert_eq!(config.lockout.lockout_secs, 900);
        assert_eq!(config.totp_timeout_ms, 3000);
        assert!(!config.disclose_attempts_remaining);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MobileConfig =
            serde_json::from_str(r#"{"lockout": {"threshold": 3, "lockout_secs": 60}}"#).unwrap();
        assert_eq!(config.lockout.threshold, 3);
        assert_eq!(config.pin_length, DEFAULT_PIN_LENGTH);
    }

    #[test]
    fn test_zero_lockout_duration_rejected() {
        let mut config = MobileConfig::default();
        config.lockout.lockout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(message)) if message.contains("lockout duration")
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MobileConfig::default();
        config.lockout.threshold = 0;
        assert!(config.validate().is_err());

        let mut config = MobileConfig::default();
        config.pin_length = 2;
        assert!(config.validate().is_err());

        let mut config = MobileConfig::default();
        config.session.max_duration_secs = 0;
        assert!(config.validate().is_err());

        let mut config = MobileConfig::default();
        config.pending_window_secs = 0;
        assert!(config.validate().is_err());
    }
}
