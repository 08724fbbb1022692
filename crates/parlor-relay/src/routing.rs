//! Relay/routing (C6)
//!
//! Room broadcast and direct-message primitives, plus the file-transfer
//! caps from the source's `file_transfer.py`: 20 MiB per file, 1.5 MiB per
//! chunk after base64 decode, 5 `file_meta` frames per rolling 60-second
//! window per user.

use crate::room::RoomRegistry;
use serde_json::Value;

/// Default individual file size cap in bytes (20 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;
/// Default individual chunk size cap in bytes, after base64 decode (1.5 MB).
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 1_500_000;

/// Fan out `message` to every member of `room` except `exclude`. A failed
/// send to one peer (offline, closed inbox) must not abort the rest.
pub fn broadcast_room(registry: &RoomRegistry, room: &str, exclude: &str, message: Value) {
    for member in registry.members(room) {
        if member != exclude {
            let _ = registry.send_to(&member, message.clone());
        }
    }
}

/// Deliver `message` to a single named user. Returns `false` if the
/// recipient is offline, so the caller can reply with a soft error.
pub fn send_dm(registry: &RoomRegistry, to: &str, message: Value) -> bool {
    registry.send_to(to, message)
}

/// Route a room-scoped or direct message depending on whether `to` was
/// supplied: DM if present, otherwise broadcast to `room` excluding
/// `from`. Returns `false` only for a DM to an offline user; room
/// broadcasts with no members are not an error.
pub fn relay(
    registry: &RoomRegistry,
    from: &str,
    room: Option<&str>,
    to: Option<&str>,
    message: Value,
) -> bool {
    if let Some(to) = to {
        send_dm(registry, to, message)
    } else if let Some(room) = room {
        broadcast_room(registry, room, from, message);
        true
    } else {
        false
    }
}

/// Whether a declared file size is within the cap.
pub fn check_file_size(size: u64, max_file_size: u64) -> bool {
    size <= max_file_size
}

/// Whether a decoded chunk is within the cap.
pub fn check_chunk_size(decoded_len: usize, max_chunk_size: u64) -> bool {
    (decoded_len as u64) <= max_chunk_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Notify};

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        registry.join("bob", "R", None);
        let (alice_tx, mut alice_rx) = mpsc::channel(4);
        let (bob_tx, mut bob_rx) = mpsc::channel(4);
        registry.register_client("alice", alice_tx, Arc::new(Notify::new()));
        registry.register_client("bob", bob_tx, Arc::new(Notify::new()));

        broadcast_room(&registry, "R", "alice", serde_json::json!({"text": "hi"}));

        assert!(alice_rx.try_recv().is_err());
        let got = bob_rx.recv().await.unwrap();
        assert_eq!(got["text"], "hi");
    }

    #[test]
    fn test_dm_to_offline_user_fails() {
        let registry = RoomRegistry::new();
        assert!(!send_dm(&registry, "ghost", serde_json::json!({})));
    }

    #[test]
    fn test_relay_prefers_dm_over_room() {
        let registry = RoomRegistry::new();
        registry.join("bob", "R", None);
        let (tx, _rx) = mpsc::channel(4);
        registry.register_client("bob", tx, Arc::new(Notify::new()));
        assert!(relay(&registry, "alice", Some("R"), Some("bob"), serde_json::json!({})));
    }

    #[test]
    fn test_file_size_cap() {
        assert!(check_file_size(DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FILE_SIZE));
        assert!(!check_file_size(DEFAULT_MAX_FILE_SIZE + 1, DEFAULT_MAX_FILE_SIZE));
    }

    #[test]
    fn test_chunk_size_cap() {
        assert!(check_chunk_size(1_500_000, DEFAULT_MAX_CHUNK_SIZE));
        assert!(!check_chunk_size(1_500_001, DEFAULT_MAX_CHUNK_SIZE));
    }
}
