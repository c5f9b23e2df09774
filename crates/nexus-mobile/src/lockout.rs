//! Lockout policy for brute-force protection
//!
//! After `threshold` consecutive wrong PINs the credential is locked for
//! `lockout_secs`. The default is 5 attempts and 15 minutes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Failed attempts that trigger a lock
    pub threshold: u32,
    /// Lock duration in seconds
    pub lockout_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_secs: 900, // 15 minutes
        }
    }
}

impl LockoutPolicy {
    /// Create a strict policy (fewer attempts, longer lock)
    pub fn strict() -> Self {
        Self {
            threshold: 3,
            lockout_secs: 3600,
        }
    }

    /// Create a lenient policy (more attempts, shorter lock)
    pub fn lenient() -> Self {
        Self {
            threshold: 10,
            lockout_secs: 300,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    /// Whether `failed_attempts` has reached the threshold
    pub fn should_lock(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.threshold
    }

    /// Lock expiry for a lock starting at `now`
    pub fn lock_until(&self, now: i64) -> i64 {
        now.saturating_add(i64::try_from(self.lockout_secs).unwrap_or(i64::MAX))
    }

    pub fn attempts_remaining(&self, failed_attempts: u32) -> u32 {
        self.threshold.saturating_sub(failed_attempts)
    }

    /// Get a human-readable description of the current lockout state
    pub fn describe_lockout(&self, failed_attempts: u32) -> String {
        if self.should_lock(failed_attempts) {
            format!("Locked for {}", describe_duration(self.lockout_secs))
        } else {
            format!(
                "{} attempts remaining",
                self.attempts_remaining(failed_attempts)
            )
        }
    }
}

/// Render a number of seconds the way the login screen shows it
pub fn describe_duration(secs: u64) -> String {
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs.div_ceil(60), "minute")
    } else if secs < 86400 {
        (secs.div_ceil(3600), "hour")
    } else {
        (secs.div_ceil(86400), "day")
    };

    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.threshold, 5);
        assert_eq!(policy.lockout_duration(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_should_lock_at_threshold() {
        let policy = LockoutPolicy::default();

        assert!(!policy.should_lock(0));
        assert!(!policy.should_lock(4));
        assert!(policy.should_lock(5));
        assert!(policy.should_lock(10));
    }

    #[test]
    fn test_attempts_remaining() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.attempts_remaining(0), 5);
        assert_eq!(policy.attempts_remaining(4), 1);
        assert_eq!(policy.attempts_remaining(9), 0);
    }

    #[test]
    fn test_lock_until_is_in_future() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.lock_until(1_000), 1_900);
    }

    #[test]
    fn test_describe_lockout() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.describe_lockout(3), "2 attempts remaining");
        assert_eq!(policy.describe_lockout(5), "Locked for 15 minutes");
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(1), "1 second");
        assert_eq!(describe_duration(45), "45 seconds");
        assert_eq!(describe_duration(60), "1 minute");
        assert_eq!(describe_duration(61), "2 minutes");
        assert_eq!(describe_duration(899), "15 minutes");
        assert_eq!(describe_duration(7200), "2 hours");
        assert_eq!(describe_duration(86400), "1 day");
    }
}
