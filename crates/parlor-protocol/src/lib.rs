//! # parlor-protocol
//!
//! Control-plane wire format for the meeting relay: the length-prefixed
//! framed codec (plaintext and AES-GCM variants) and the tagged message
//! types carried inside it.

#![forbid(unsafe_code)]

pub mod error;
pub mod wire;

pub use error::ProtocolError;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
