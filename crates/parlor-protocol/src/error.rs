//! Protocol-layer error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or parsing control-plane messages.
///
/// These map onto the "protocol/framing errors" row of the behavioral error
/// taxonomy: every variant here is fatal for the connection that produced
/// it. Soft errors (bad credentials, unauthorized kick, oversize file) are
/// not protocol errors — they are valid frames carrying `{"ok": false, ...}`
/// and are handled as ordinary replies, not failures.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame parsed as JSON but did not match any known command/reply shape.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize an outgoing message.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// Failed to parse or decrypt an incoming frame.
    #[error("decoding error: {0}")]
    DecodingError(String),

    /// Underlying I/O error while reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
