//! Control-plane message types
//!
//! Client commands arrive as `{"type": ..., "payload": {...}, "id": ...}`; the
//! adjacently-tagged [`ClientCommand`] representation produces exactly that
//! shape, with [`Envelope`] carrying the optional correlation `id` alongside
//! it. Server replies are not uniform enough for a single tagged enum — some
//! carry `ok`, push notifications add `from` instead — so they're built with
//! the small helpers below rather than one do-everything type.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A command sent from client to server, tagged by `type` with its fields
/// nested under `payload`. Variants with no fields still carry an empty
/// payload object so the envelope shape stays uniform on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Authenticate, or auto-register an unknown username, creating a session.
    Login {
        /// Account name.
        username: String,
        /// Cleartext password, hashed server-side before comparison.
        password: String,
    },
    /// End the session and close the connection.
    Logout {},
    /// List rooms and their member counts.
    ListRooms {},
    /// Ensure a room exists. Idempotent.
    CreateRoom {
        /// Room name.
        room: String,
    },
    /// Join a room, implicitly leaving the current one if any.
    JoinRoom {
        /// Room name.
        room: String,
    },
    /// Leave the current room.
    LeaveRoom {},
    /// Broadcast a chat message to the sender's current room.
    Chat {
        /// Message body.
        text: String,
    },
    /// Send a direct message to a named user.
    Dm {
        /// Recipient username.
        to: String,
        /// Message body.
        text: String,
    },
    /// Announce an incoming file transfer.
    FileMeta {
        /// Transfer id, allocated by the sender.
        transfer_id: String,
        /// Original filename.
        name: String,
        /// Declared size in bytes, checked against the server cap.
        size: u64,
        /// Direct recipient; absent forwards to the sender's current room.
        to: Option<String>,
    },
    /// A base64-encoded chunk of a previously announced transfer.
    FileChunk {
        /// Transfer id this chunk belongs to.
        transfer_id: String,
        /// Base64-encoded chunk bytes.
        data: String,
        /// Chunk sequence number.
        index: u64,
        /// Direct recipient; absent forwards to the sender's current room.
        to: Option<String>,
    },
    /// Marks a transfer complete; no further chunks follow.
    FileComplete {
        /// Transfer id being closed out.
        transfer_id: String,
        /// Direct recipient; absent forwards to the sender's current room.
        to: Option<String>,
    },
    /// Registers the sender's UDP source port for a media kind.
    UdpRegister {
        /// Which media kind this port serves.
        media: MediaKind,
        /// UDP port the client is listening on.
        port: u16,
    },
    /// Owner-only: removes a user from the sender's current room.
    Kick {
        /// Username to remove.
        user: String,
    },
    /// Keepalive; always answered with `pong`.
    Ping {},
}

/// A UDP media kind, as registered by `udp_register` and carried in the
/// media-plane packet header (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// 16-bit PCM voice frames.
    Voice,
    /// Opaque video frames (typically JPEG).
    Video,
}

/// Top-level envelope: a tagged command plus an optional client-supplied
/// correlation id, echoed back verbatim on the reply.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// The tagged command itself.
    #[serde(flatten)]
    pub command: ClientCommand,
    /// Correlation id, if the client supplied one.
    #[serde(default)]
    pub id: Option<String>,
}

/// Room name plus live member count, as returned by `list_rooms`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    /// Room name.
    pub name: String,
    /// Number of members currently joined.
    pub member_count: usize,
}

/// Builds the success reply to a `login` command.
pub fn login_ok(token: &str, aes_key_b64: &str) -> Value {
    json!({ "ok": true, "type": "login_ok", "token": token, "aes_key_b64": aes_key_b64 })
}

/// Builds a bare acknowledgement reply, e.g. for `create_room` or `kick`.
pub fn ack() -> Value {
    json!({ "ok": true, "type": "ok" })
}

/// Builds the `list_rooms` reply.
pub fn rooms_list(rooms: &[RoomSummary]) -> Value {
    json!({ "ok": true, "type": "rooms_list", "rooms": rooms })
}

/// Builds the `join_room` reply carrying the current member list.
pub fn joined(room: &str, members: &[String]) -> Value {
    json!({ "ok": true, "type": "joined", "room": room, "members": members })
}

/// Builds the universal soft-error reply: `{"ok": false, "error": ...}`.
pub fn error_reply(error: impl Into<String>) -> Value {
    json!({ "ok": false, "error": error.into() })
}

/// Builds a push notification fanned out to room peers or a DM target —
/// the same `type`/`payload` envelope shape as client commands, with an
/// added `from` naming the originating user.
pub fn push(kind: &str, from: &str, payload: Value) -> Value {
    json!({ "type": kind, "from": from, "payload": payload })
}

/// Attaches a correlation id to an already-built reply, if one was supplied
/// on the originating request.
pub fn attach_id(mut value: Value, id: Option<&str>) -> Value {
    if let Some(id) = id {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_command_round_trips() {
        let raw = r#"{"type":"login","payload":{"username":"alice","password":"pw"}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        match env.command {
            ClientCommand::Login { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "pw");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(env.id, None);
    }

    #[test]
    fn test_envelope_carries_correlation_id() {
        let raw = r#"{"type":"ping","payload":{},"id":"abc123"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(env.command, ClientCommand::Ping {}));
        assert_eq!(env.id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_unit_variants_accept_empty_payload() {
        let raw = r#"{"type":"list_rooms","payload":{}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(env.command, ClientCommand::ListRooms {}));
    }

    #[test]
    fn test_file_meta_optional_to_defaults_none() {
        let raw = r#"{"type":"file_meta","payload":{"transfer_id":"t1","name":"a.bin","size":10}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        match env.command {
            ClientCommand::FileMeta { to, .. } => assert_eq!(to, None),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let raw = r#"{"type":"not_a_command","payload":{}}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn test_login_ok_shape() {
        let v = login_ok("deadbeef", "base64==");
        assert_eq!(v["ok"], true);
        assert_eq!(v["type"], "login_ok");
        assert_eq!(v["token"], "deadbeef");
        assert_eq!(v["aes_key_b64"], "base64==");
    }

    #[test]
    fn test_error_reply_shape() {
        let v = error_reply("Username in use");
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "Username in use");
    }

    #[test]
    fn test_push_shape_matches_s3() {
        let v = push("chat", "alice", json!({ "text": "hi" }));
        assert_eq!(v["type"], "chat");
        assert_eq!(v["from"], "alice");
        assert_eq!(v["payload"]["text"], "hi");
    }

    #[test]
    fn test_attach_id_inserts_field() {
        let v = attach_id(ack(), Some("xyz"));
        assert_eq!(v["id"], "xyz");
    }

    #[test]
    fn test_attach_id_noop_without_id() {
        let v = attach_id(ack(), None);
        assert!(v.get("id").is_none());
    }
}
