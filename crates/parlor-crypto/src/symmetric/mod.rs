//! Symmetric encryption primitives
//!
//! The relay's control-plane codec only ever negotiates one cipher suite
//! (AES-256-GCM with a per-frame random nonce), so unlike the library this
//! crate started from there is no suite negotiation here.

pub mod aes_gcm;
pub mod session;

pub use aes_gcm::{decrypt as aes_decrypt, encrypt as aes_encrypt, open_frame, seal_frame};
pub use session::{generate_session_key, generate_session_token};
