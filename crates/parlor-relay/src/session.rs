//! Session registry (C2)
//!
//! In-memory username → (token, session key, timestamps) map. Sessions are
//! never persisted — a restart logs everyone out, which is the explicitly
//! ephemeral behavior this system aims for.

use dashmap::DashMap;
use parlor_crypto::symmetric::{generate_session_key, generate_session_token};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct Session {
    token: String,
    key: [u8; 32],
    #[allow(dead_code)]
    created_at: u64,
    last_seen: u64,
}

/// Registry of live sessions, at most one per username.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `username` currently has a live session.
    pub fn is_online(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    /// Create a fresh session for `username`, replacing any existing one.
    /// Returns the session token and AES-GCM key.
    pub fn create(&self, username: &str) -> (String, [u8; 32]) {
        let token = generate_session_token();
        let key = generate_session_key();
        let now = now_secs();
        self.sessions.insert(
            username.to_string(),
            Session {
                token: token.clone(),
                key,
                created_at: now,
                last_seen: now,
            },
        );
        (token, key)
    }

    /// Update the last-activity timestamp for `username`. A no-op if the
    /// session is already gone.
    pub fn touch(&self, username: &str) {
        if let Some(mut session) = self.sessions.get_mut(username) {
            session.last_seen = now_secs();
        }
    }

    /// End `username`'s session.
    pub fn end(&self, username: &str) {
        self.sessions.remove(username);
    }

    /// Look up the AES-GCM session key for `username`.
    pub fn lookup_key(&self, username: &str) -> Option<[u8; 32]> {
        self.sessions.get(username).map(|s| s.key)
    }

    /// Verify that `token` matches the live session for `username`.
    #[allow(dead_code)]
    pub fn verify_token(&self, username: &str, token: &str) -> bool {
        self.sessions
            .get(username)
            .map(|s| s.token == token)
            .unwrap_or(false)
    }

    /// Seconds since a session's last recorded activity. The control
    /// server enforces its own idle timeout via a read-loop timeout rather
    /// than polling this; kept for diagnostics.
    #[allow(dead_code)]
    pub fn idle_secs(&self, username: &str) -> Option<u64> {
        self.sessions
            .get(username)
            .map(|s| now_secs().saturating_sub(s.last_seen))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
