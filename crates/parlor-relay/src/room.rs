//! Room registry and client index (C4)
//!
//! Named multi-member rooms keyed by room name, plus the client index
//! mapping an online username to the inbox it drains and writes from (the
//! "map-of-writers" pattern from the teacher's design notes, generalized
//! from a single writer handle to a channel so the router never holds a
//! lock across a network write).

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// A frame queued for a connection's writer task. Tagged rather than
/// inferred from shared key state, so the login_ok transition point
/// (invariant 5: it is always the last plaintext frame) can never race
/// against a broadcast landing in the same inbox.
#[derive(Debug, Clone)]
pub enum OutgoingFrame {
    /// Written with the plaintext codec.
    Plain(Value),
    /// Encrypted with the connection's session key before writing.
    Secure(Value),
    /// Write `Secure(value)`, then shut the connection down. Used to
    /// force-disconnect a kicked user after its terminal reply.
    CloseAfter(Value),
}

/// Per-connection inbox: the router posts outbound frames here; the
/// connection task drains it and writes to the socket. Every frame routed
/// through the client index or a room broadcast is, by construction, sent
/// to an already-authenticated peer, so [`RoomRegistry::send_to`] always
/// tags it [`OutgoingFrame::Secure`].
pub type Inbox = mpsc::Sender<OutgoingFrame>;

/// What the client index keeps per online user: the inbox its writer task
/// drains, and a signal its read loop selects on so a forced close (kick)
/// doesn't have to wait for the peer to notice a half-closed socket.
struct ClientHandle {
    inbox: Inbox,
    kill: Arc<Notify>,
}

struct RoomState {
    members: HashSet<String>,
    owner: Option<String>,
}

/// Name and live member count, as returned by `list_rooms`.
pub struct RoomSummary {
    /// Room name.
    pub name: String,
    /// Number of members currently joined.
    pub member_count: usize,
}

/// Errors from room operations.
#[derive(Debug, PartialEq, Eq)]
pub enum RoomError {
    /// The kicker is not the room's recorded owner.
    NotOwner,
    /// The kick target is not a member of that room.
    TargetNotInRoom,
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => write!(f, "only the room owner may kick"),
            Self::TargetNotInRoom => write!(f, "user is not in that room"),
        }
    }
}

impl std::error::Error for RoomError {}

/// Rooms plus the username→inbox client index.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, RoomState>,
    clients: DashMap<String, ClientHandle>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an online client's inbox and the kill signal its read loop
    /// selects on. Replaces any prior registration for the same username
    /// (the caller is responsible for having already rejected a
    /// duplicate-online login at the session layer).
    pub fn register_client(&self, username: &str, inbox: Inbox, kill: Arc<Notify>) {
        self.clients.insert(username.to_string(), ClientHandle { inbox, kill });
    }

    /// Remove a client from the index, e.g. on disconnect.
    pub fn unregister_client(&self, username: &str) {
        self.clients.remove(username);
    }

    /// Whether `username` has a registered inbox (is reachable for routing).
    pub fn is_registered(&self, username: &str) -> bool {
        self.clients.contains_key(username)
    }

    /// Post `message` to `username`'s inbox. Returns `false` if the user is
    /// offline or their inbox is closed — callers must not treat that as
    /// fatal to their own connection.
    pub fn send_to(&self, username: &str, message: Value) -> bool {
        match self.clients.get(username) {
            Some(handle) => handle.inbox.try_send(OutgoingFrame::Secure(message)).is_ok(),
            None => false,
        }
    }

    /// Post a terminal `message` to `username`'s inbox, wake its read loop
    /// via the kill signal so it stops blocking on the socket, and have the
    /// writer task shut the connection down once the message is written
    /// (`kick`). Returns `false` if the user is already offline.
    pub fn close_with(&self, username: &str, message: Value) -> bool {
        match self.clients.get(username) {
            Some(handle) => {
                let sent = handle.inbox.try_send(OutgoingFrame::CloseAfter(message)).is_ok();
                handle.kill.notify_one();
                sent
            }
            None => false,
        }
    }

    /// Ensure a room exists. Idempotent; does not affect membership.
    pub fn create_room(&self, name: &str) {
        self.rooms.entry(name.to_string()).or_insert_with(|| RoomState {
            members: HashSet::new(),
            owner: None,
        });
    }

    /// List all rooms and their member counts.
    pub fn list(&self) -> Vec<RoomSummary> {
        self.rooms
            .iter()
            .map(|entry| RoomSummary {
                name: entry.key().clone(),
                member_count: entry.value().members.len(),
            })
            .collect()
    }

    /// Current members of `room`, or an empty vec if it doesn't exist.
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Join `user` into `room`, implicitly leaving `previous_room` first if
    /// given. The first member to join an empty or newly created room
    /// becomes its owner. Returns the member snapshot after the join.
    pub fn join(&self, user: &str, room: &str, previous_room: Option<&str>) -> Vec<String> {
        if let Some(prev) = previous_room {
            if prev != room {
                self.leave(user, prev);
            }
        }

        let mut entry = self.rooms.entry(room.to_string()).or_insert_with(|| RoomState {
            members: HashSet::new(),
            owner: None,
        });
        if entry.members.is_empty() {
            entry.owner = Some(user.to_string());
        }
        entry.members.insert(user.to_string());
        entry.members.iter().cloned().collect()
    }

    /// Remove `user` from `room`. Garbage-collects the room if it becomes
    /// empty. A no-op if the user or room isn't present.
    /// Removes `user` from `room`. Returns `false` if `user` was already
    /// absent (already removed by a concurrent [`RoomRegistry::kick`], or
    /// called twice), so a caller can tell a real departure from a no-op and
    /// skip announcing one that already happened under another name.
    pub fn leave(&self, user: &str, room: &str) -> bool {
        let mut remove_room = false;
        let was_member = if let Some(mut state) = self.rooms.get_mut(room) {
            let removed = state.members.remove(user);
            if state.owner.as_deref() == Some(user) {
                state.owner = None;
            }
            remove_room = state.members.is_empty();
            removed
        } else {
            false
        };
        if remove_room {
            self.rooms.remove(room);
        }
        was_member
    }

    /// Owner-only removal of `target` from `room`. The target's connection
    /// must still be disconnected by the caller; this only updates
    /// membership and returns success so the caller can notify and
    /// force-close.
    pub fn kick(&self, owner: &str, target: &str, room: &str) -> Result<(), RoomError> {
        let mut remove_room = false;
        let result = {
            let Some(mut state) = self.rooms.get_mut(room) else {
                return Err(RoomError::TargetNotInRoom);
            };
            if state.owner.as_deref() != Some(owner) {
                return Err(RoomError::NotOwner);
            }
            if !state.members.remove(target) {
                return Err(RoomError::TargetNotInRoom);
            }
            remove_room = state.members.is_empty();
            Ok(())
        };
        if remove_room {
            self.rooms.remove(room);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_joiner_becomes_owner() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        assert_eq!(registry.kick("alice", "bob", "R"), Err(RoomError::TargetNotInRoom));
        registry.join("bob", "R", None);
        assert_eq!(registry.kick("bob", "alice", "R"), Err(RoomError::NotOwner));
    }

    #[test]
    fn test_kick_removes_member_and_succeeds_for_owner() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        registry.join("bob", "R", None);
        assert!(registry.kick("alice", "bob", "R").is_ok());
        assert_eq!(registry.members("R"), vec!["alice".to_string()]);
    }

    #[test]
    fn test_join_implicitly_leaves_previous_room() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R1", None);
        registry.join("alice", "R2", Some("R1"));
        assert!(registry.members("R1").is_empty());
        assert_eq!(registry.members("R2"), vec!["alice".to_string()]);
        // R1 should have been garbage-collected once empty
        assert!(registry.list().iter().all(|r| r.name != "R1"));
    }

    #[test]
    fn test_create_room_is_idempotent() {
        let registry = RoomRegistry::new();
        registry.create_room("R");
        registry.create_room("R");
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_leave_twice_is_noop() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        registry.leave("alice", "R");
        registry.leave("alice", "R");
        assert!(registry.members("R").is_empty());
    }

    #[test]
    fn test_empty_room_garbage_collected() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        registry.leave("alice", "R");
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_owner_forgotten_when_room_recreated() {
        let registry = RoomRegistry::new();
        registry.join("alice", "R", None);
        registry.leave("alice", "R");
        registry.join("bob", "R", None);
        // bob is the new owner of the recreated room; alice already left it,
        // so she isn't a removable target even though she owned the room
        // the first time around.
        assert_eq!(registry.kick("bob", "alice", "R"), Err(RoomError::TargetNotInRoom));
        assert_eq!(registry.kick("alice", "bob", "R"), Err(RoomError::NotOwner));
    }

    #[tokio::test]
    async fn test_send_to_registered_client() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register_client("alice", tx, Arc::new(Notify::new()));
        assert!(registry.send_to("alice", serde_json::json!({"a": 1})));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg["a"], 1);
    }

    #[test]
    fn test_send_to_unregistered_client_fails() {
        let registry = RoomRegistry::new();
        assert!(!registry.send_to("ghost", serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_close_with_notifies_kill_signal() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let kill = Arc::new(Notify::new());
        registry.register_client("alice", tx, kill.clone());
        assert!(registry.close_with("alice", serde_json::json!({"type": "kicked"})));
        assert!(matches!(rx.recv().await, Some(OutgoingFrame::CloseAfter(_))));
        kill.notified().await;
    }
}
