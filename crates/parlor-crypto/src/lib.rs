//! # parlor-crypto
//!
//! Cryptographic primitives for the meeting relay: PBKDF2-HMAC-SHA256
//! credential hashing, AES-256-GCM session encryption, session key/token
//! generation, and constant-time comparison / memory wiping helpers.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod kdf;
pub mod mem;
pub mod symmetric;

// Re-export commonly used types
pub use error::{CryptoError, Result};

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the cryptography library (e.g., prevent core dumps).
///
/// Should be called once at relay startup.
pub fn init() -> Result<()> {
    mem::wipe::prevent_core_dumps()?;
    Ok(())
}
