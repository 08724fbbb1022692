//! Session key and token generation
//!
//! Grounded on the original source's `generate_session_key()` / `uuid.uuid4().hex`
//! pair: a fresh 256-bit AES-GCM key and a 128-bit opaque token, minted once
//! per successful login.

use rand::RngCore;
use rand_core::OsRng;

/// Generate a fresh 256-bit AES-GCM session key.
pub fn generate_session_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh 128-bit session token, hex-encoded (32 hex chars).
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_is_random() {
        assert_ne!(generate_session_key(), generate_session_key());
    }

    #[test]
    fn test_session_token_format() {
        let token = generate_session_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_session_token());
    }
}
