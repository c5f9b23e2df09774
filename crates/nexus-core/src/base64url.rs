//! Base64url as used by the JWT compact serialization
//!
//! Standard base64 with `+` -> `-`, `/` -> `_` and trailing `=` stripped.
//! Decoding accepts input with or without padding.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::error::TokenError;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes without padding
pub fn encode(input: impl AsRef<[u8]>) -> String {
    URL_SAFE_LENIENT.encode(input)
}

/// Decode a base64url segment
pub fn decode(input: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_LENIENT
        .decode(input)
        .map_err(|e| TokenError::Decode(e.to_string()))
}
