//! PIN generation and hashing
//!
//! PINs are short, so the hash must be slow: Argon2id with a fresh random
//! salt per credential. The raw 32-byte output and the salt are stored
//! hex-encoded and compared in constant time.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::AuthError;

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 12;
/// Length of generated PINs
pub const DEFAULT_PIN_LENGTH: usize = 6;

/// Characters used for generated PINs; no I/1 or O/0
pub const PIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Argon2id cost parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCost {
    /// Memory in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashCost {
    /// Smallest parameters Argon2 accepts; for tests only
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// A freshly computed hash and its salt, hex-encoded
#[derive(Clone, PartialEq, Eq)]
pub struct PinDigest {
    pub hash: String,
    pub salt: String,
}

/// Hashes and verifies PINs
#[derive(Clone)]
pub struct PinHasher {
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for PinHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinHasher").finish_non_exhaustive()
    }
}

impl Default for PinHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl PinHasher {
    pub fn new(cost: HashCost) -> Result<Self, AuthError> {
        let params = Params::new(
            cost.memory_kib,
            cost.iterations,
            cost.parallelism,
            Some(HASH_LEN),
        )
        .map_err(|e| AuthError::Crypto(format!("Invalid Argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a PIN with a new random salt
    pub fn hash(&self, pin: &str) -> Result<PinDigest, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let hash = self.derive(pin, &salt)?;
        Ok(PinDigest {
            hash: hex::encode(hash.as_slice()),
            salt: hex::encode(salt),
        })
    }

    /// Recompute with the stored salt and compare in constant time
    pub fn verify(&self, pin: &str, stored_hash: &str, stored_salt: &str) -> Result<bool, AuthError> {
        let salt = hex::decode(stored_salt)
            .map_err(|e| AuthError::Crypto(format!("Invalid stored salt: {e}")))?;
        let expected = Zeroizing::new(
            hex::decode(stored_hash)
                .map_err(|e| AuthError::Crypto(format!("Invalid stored hash: {e}")))?,
        );

        let actual = self.derive(pin, &salt)?;
        Ok(bool::from(actual.as_slice().ct_eq(expected.as_slice())))
    }

    /// Burn the same work as a real verification; used for unknown principals
    pub fn dummy_verify(&self, pin: &str) {
        let salt = [0u8; SALT_LEN];
        let _ = self.derive(pin, &salt);
    }

    fn derive(&self, pin: &str, salt: &[u8]) -> Result<Zeroizing<[u8; HASH_LEN]>, AuthError> {
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        let mut out = Zeroizing::new([0u8; HASH_LEN]);
        self.argon2
            .hash_password_into(&pin_bytes, salt, &mut out[..])
            .map_err(|e| AuthError::Crypto(format!("Failed to hash PIN: {e}")))?;
        Ok(out)
    }
}

/// Generate a random PIN from [`PIN_ALPHABET`] using the OS RNG
pub fn generate_pin(length: usize) -> Zeroizing<String> {
    let mut pin = Zeroizing::new(String::with_capacity(length));
    for _ in 0..length {
        let index = OsRng.gen_range(0..PIN_ALPHABET.len());
        pin.push(char::from(PIN_ALPHABET[index]));
    }
    pin
}

/// Canonical form of a typed PIN: trimmed and uppercased
pub fn normalize_pin(pin: &str) -> Zeroizing<String> {
    Zeroizing::new(pin.trim().to_ascii_uppercase())
}

/// Validate PIN format
pub fn validate_pin(pin: &str) -> Result<(), AuthError> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(AuthError::InvalidPin(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
    }

    if !pin.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AuthError::InvalidPin(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
    }

    Ok(())
}
