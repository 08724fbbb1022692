//! AES-256-GCM encryption

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand_core::{OsRng, RngCore};

use crate::error::{CryptoError, Result};

/// Length in bytes of the random nonce prepended to each sealed frame.
pub const NONCE_LEN: usize = 12;

/// Seal a session frame as `nonce(12) || ciphertext_and_tag`, no AAD.
///
/// Used for the control-plane codec's "secure" frames: a fresh random nonce
/// per message is safe here because each session key is scoped to a single
/// connection and frame counts stay far below the 96-bit nonce birthday
/// bound.
pub fn seal_frame(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = encrypt(key, &nonce, plaintext, &[])?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a session frame sealed by [`seal_frame`].
pub fn open_frame(key: &[u8; 32], frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < NONCE_LEN {
        return Err(CryptoError::InvalidNonce(format!(
            "frame too short to contain a nonce: {} bytes",
            frame.len()
        )));
    }
    let (nonce_bytes, ciphertext) = frame.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    decrypt(key, &nonce, ciphertext, &[])
}

/// Encrypt data using AES-256-GCM
///
/// # Arguments
///
/// * `key` - 32-byte encryption key
/// * `nonce` - 12-byte nonce (must be unique per message)
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data (can be empty)
///
/// # Returns
///
/// Ciphertext with authentication tag appended
pub fn encrypt(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(nonce, payload)
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM encryption failed: {}", e)))
}

/// Decrypt data using AES-256-GCM
///
/// # Arguments
///
/// * `key` - 32-byte encryption key
/// * `nonce` - 12-byte nonce (must match encryption nonce)
/// * `ciphertext` - Data to decrypt (includes authentication tag)
/// * `aad` - Additional authenticated data (must match encryption AAD)
///
/// # Returns
///
/// Decrypted plaintext if authentication succeeds
pub fn decrypt(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| CryptoError::Decryption(format!("AES-GCM decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let key = [0u8; 32];
        let nonce = [1u8; 12];
        let plaintext = b"hello world";
        let aad = b"metadata";

        let ciphertext = encrypt(&key, &nonce, plaintext, aad).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext, aad).unwrap();

        assert_eq!(plaintext, decrypted.as_slice());
    }

    #[test]
    fn test_aes_gcm_wrong_key() {
        let key1 = [0u8; 32];
        let key2 = [1u8; 32];
        let nonce = [1u8; 12];
        let plaintext = b"secret";

        let ciphertext = encrypt(&key1, &nonce, plaintext, &[]).unwrap();
        let result = decrypt(&key2, &nonce, &ciphertext, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn test_aes_gcm_wrong_aad() {
        let key = [0u8; 32];
        let nonce = [1u8; 12];
        let plaintext = b"secret";
        let aad1 = b"metadata1";
        let aad2 = b"metadata2";

        let ciphertext = encrypt(&key, &nonce, plaintext, aad1).unwrap();
        let result = decrypt(&key, &nonce, &ciphertext, aad2);

        assert!(result.is_err());
    }

    #[test]
    fn test_seal_open_frame_roundtrip() {
        let key = [9u8; 32];
        let plaintext = br#"{"type":"chat","payload":{"text":"hi"}}"#;

        let frame = seal_frame(&key, plaintext).unwrap();
        assert_eq!(frame.len(), NONCE_LEN + plaintext.len() + 16);

        let opened = open_frame(&key, &frame).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_seal_frame_nonces_differ() {
        let key = [9u8; 32];
        let a = seal_frame(&key, b"same plaintext").unwrap();
        let b = seal_frame(&key, b"same plaintext").unwrap();
        assert_ne!(a, b, "random nonce must vary between frames");
    }

    #[test]
    fn test_open_frame_rejects_short_input() {
        let key = [9u8; 32];
        assert!(open_frame(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_open_frame_rejects_tampered_ciphertext() {
        let key = [9u8; 32];
        let mut frame = seal_frame(&key, b"hello").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(open_frame(&key, &frame).is_err());
    }
}
