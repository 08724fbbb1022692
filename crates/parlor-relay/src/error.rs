//! Relay error taxonomy
//!
//! Mirrors §7's behavioral taxonomy, not a type hierarchy: each variant
//! here carries the information a caller needs to decide whether a
//! connection is fatally dead or should just get a soft `{"ok": false}`
//! reply and keep going (see [`RelayError::is_fatal`]).

use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised while servicing a connection or background task.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Short read, malformed length prefix, or AEAD verification failure.
    /// Fatal for the offending connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] parlor_protocol::ProtocolError),

    /// Missing fields, wrong password, or a duplicate online login. Soft:
    /// reply `{"ok": false, "error": ...}` and keep the connection open.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Kick by a non-owner, or a command requiring room membership issued
    /// outside a room. Soft.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Oversize file, oversize chunk, or rate limit exceeded. Soft; the
    /// frame is dropped after the reply is sent.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// DM to an offline user, chunk for an unknown transfer id. Soft.
    #[error("routing miss: {0}")]
    RoutingMiss(String),

    /// Credential or session-store I/O failure. Logged at error level; the
    /// owning task terminates, the listener is not restarted by this error
    /// alone.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Underlying I/O error (socket read/write, bind failure).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether this error should terminate the connection (vs. being
    /// reported as a soft `{"ok": false}` reply while the connection stays
    /// open).
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Protocol(_) | RelayError::Io(_))
    }

    /// The string to place in a soft error reply's `error` field. Fatal
    /// variants are never rendered this way; callers should close the
    /// connection instead of replying.
    pub fn as_reply_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_is_not_fatal() {
        let e = RelayError::Auth("bad password".into());
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_io_error_is_fatal() {
        let e = RelayError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x"));
        assert!(e.is_fatal());
    }

    #[test]
    fn test_reply_message_matches_display() {
        let e = RelayError::RoutingMiss("user offline".into());
        assert_eq!(e.as_reply_message(), "routing miss: user offline");
    }
}
