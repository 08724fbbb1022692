//! PBKDF2-HMAC-SHA256 password derivation for the credential store
//!
//! Iteration count and output sizes are fixed rather than configurable:
//! every credential record in the store must be derived the same way, or
//! `verify` silently fails for records written under a different policy.

use crate::error::{CryptoError, Result};
use crate::mem::constant_time::ct_eq;
use hmac::Hmac;
use rand::RngCore;
use rand_core::OsRng;
use sha2::Sha256;

/// PBKDF2 iteration count. 200,000 matches OWASP's current baseline for
/// PBKDF2-HMAC-SHA256.
pub const ITERATIONS: u32 = 200_000;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes.
pub const DERIVED_KEY_LEN: usize = 32;

/// A random per-credential salt.
pub type Salt = [u8; SALT_LEN];

/// Generate a new random salt.
pub fn generate_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte key from a password and salt using PBKDF2-HMAC-SHA256.
pub fn derive(password: &str, salt: &Salt) -> [u8; DERIVED_KEY_LEN] {
    let mut out = [0u8; DERIVED_KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, ITERATIONS, &mut out)
        .expect("HMAC can accept any key length");
    out
}

/// Verify a password against a previously derived key, in constant time.
pub fn verify(password: &str, salt: &Salt, expected: &[u8; DERIVED_KEY_LEN]) -> bool {
    let actual = derive(password, salt);
    ct_eq(&actual, expected)
}

/// Convenience wrapper returning an error instead of a bool, for callers
/// that want `?` propagation (e.g. rejecting malformed stored hashes before
/// comparison is even attempted).
pub fn verify_or_err(password: &str, salt: &Salt, expected: &[u8]) -> Result<bool> {
    if expected.len() != DERIVED_KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "expected {}-byte derived key, got {}",
            DERIVED_KEY_LEN,
            expected.len()
        )));
    }
    let mut arr = [0u8; DERIVED_KEY_LEN];
    arr.copy_from_slice(expected);
    Ok(verify(password, salt, &arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive("hunter2", &salt);
        let b = derive("hunter2", &salt);
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_differs_by_salt() {
        let a = derive("hunter2", &[1u8; SALT_LEN]);
        let b = derive("hunter2", &[2u8; SALT_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_roundtrip() {
        let salt = generate_salt();
        let key = derive("correct horse battery staple", &salt);
        assert!(verify("correct horse battery staple", &salt, &key));
        assert!(!verify("wrong password", &salt, &key));
    }

    #[test]
    fn test_verify_or_err_bad_length() {
        let salt = generate_salt();
        let result = verify_or_err("pw", &salt, &[0u8; 10]);
        assert!(result.is_err());
    }
}
