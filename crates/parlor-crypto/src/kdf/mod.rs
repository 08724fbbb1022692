//! Key derivation functions
//!
//! This module provides the password-based key derivation used to turn a
//! user's password into credential-store material (PBKDF2-HMAC-SHA256).

pub mod pbkdf2;

pub use self::pbkdf2::{derive, verify, Salt, DERIVED_KEY_LEN, SALT_LEN};
