//! TCP control server (C5)
//!
//! Per-connection state machine: UNAUTH -> AUTH -> IN_ROOM, dispatched
//! entirely inside [`dispatch`]. Each connection owns two tasks: the one
//! running this module's read loop, and a writer task draining the
//! connection's `Inbox`. A slow peer only ever loses queued broadcasts
//! (the inbox is bounded and posts with `try_send`); it never stalls a
//! room broadcast headed to other members.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;

use parlor_protocol::wire::{
    ack, attach_id, error_reply, joined, login_ok, push, read_plain_value, read_secure_value,
    rooms_list, write_plain, write_secure, ClientCommand, Envelope, MediaKind, RoomSummary,
};
use parlor_protocol::ProtocolError;

use crate::config::RelayConfig;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::room::{OutgoingFrame, RoomRegistry};
use crate::routing;
use crate::session::SessionRegistry;

/// Everything reachable from every connection task.
pub struct RelayState {
    /// Resolved server configuration.
    pub config: RelayConfig,
    /// Durable username -> (salt, hash) store.
    pub credentials: CredentialStore,
    /// Live username -> (token, key) sessions.
    pub sessions: SessionRegistry,
    /// Rooms and the online-client index.
    pub rooms: RoomRegistry,
    file_rate: Mutex<RateLimiter<String>>,
}

impl RelayState {
    /// Build shared state from a validated config and an already-loaded
    /// credential store.
    pub fn new(config: RelayConfig, credentials: CredentialStore) -> Self {
        let limit = config.file_meta_rate_limit;
        Self {
            config,
            credentials,
            sessions: SessionRegistry::new(),
            rooms: RoomRegistry::new(),
            file_rate: Mutex::new(RateLimiter::new(limit, Duration::from_secs(60))),
        }
    }
}

/// Per-connection state owned exclusively by that connection's read loop.
struct ConnState {
    username: Option<String>,
    room: Option<String>,
    /// Declared UDP source ports per media kind (`udp_register`). Purely
    /// informational bookkeeping: the UDP relay's own membership table is
    /// driven entirely by packets arriving on the media ports, not by this.
    #[allow(dead_code)]
    udp_endpoints: HashMap<MediaKind, SocketAddr>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            username: None,
            room: None,
            udp_endpoints: HashMap::new(),
        }
    }
}

/// Accept loop for the control-plane TCP listener. Returns once `shutdown`
/// fires, after which no further connections are accepted; in-flight
/// connections run to their own natural completion.
pub async fn run_tcp_listener(
    state: Arc<RelayState>,
    addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control-plane TCP listener bound");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
                    }
                    handle_connection(state, stream, peer_addr).await;
                });
            }
            _ = shutdown.changed() => {
                tracing::info!("control-plane listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(state: Arc<RelayState>, stream: TcpStream, peer_addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel::<OutgoingFrame>(64);
    let key_cell: Arc<Mutex<Option<[u8; 32]>>> = Arc::new(Mutex::new(None));
    let kill = Arc::new(Notify::new());

    let writer_handle = tokio::spawn(writer_task(write_half, rx, key_cell.clone()));

    let mut conn = ConnState::new();
    read_loop(&state, read_half, &tx, &key_cell, &kill, &mut conn, peer_addr).await;

    cleanup(&state, &conn).await;
    drop(tx);
    let _ = writer_handle.await;
    tracing::debug!(%peer_addr, user = ?conn.username, "connection closed");
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<OutgoingFrame>,
    key_cell: Arc<Mutex<Option<[u8; 32]>>>,
) {
    while let Some(frame) = rx.recv().await {
        let (value_result, close_after) = match frame {
            OutgoingFrame::Plain(value) => (write_plain(&mut writer, &value).await, false),
            OutgoingFrame::Secure(value) => {
                let key = *key_cell.lock().unwrap();
                match key {
                    Some(key) => (write_secure(&mut writer, &key, &value).await, false),
                    None => continue,
                }
            }
            OutgoingFrame::CloseAfter(value) => {
                let key = *key_cell.lock().unwrap();
                match key {
                    Some(key) => (write_secure(&mut writer, &key, &value).await, true),
                    None => (write_plain(&mut writer, &value).await, true),
                }
            }
        };
        if let Err(e) = value_result {
            tracing::debug!(error = %e, "write failed, closing connection");
            break;
        }
        if close_after {
            tracing::debug!("closing connection after terminal frame");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

enum ReadOutcome {
    Value(Value),
    SoftError(&'static str),
    Close,
}

async fn read_one<R: AsyncRead + Unpin>(
    reader: &mut R,
    key: Option<[u8; 32]>,
    idle: Duration,
    peer_addr: SocketAddr,
) -> ReadOutcome {
    if let Some(key) = key {
        match timeout(idle, read_secure_value(reader, &key)).await {
            Ok(Ok(v)) => ReadOutcome::Value(v),
            Ok(Err(e)) => {
                tracing::debug!(%peer_addr, error = %e, "secure frame error, closing");
                ReadOutcome::Close
            }
            Err(_) => {
                tracing::debug!(%peer_addr, "idle timeout");
                ReadOutcome::Close
            }
        }
    } else {
        match timeout(idle, read_plain_value(reader)).await {
            Ok(Ok(v)) => ReadOutcome::Value(v),
            Ok(Err(ProtocolError::DecodingError(_))) => ReadOutcome::SoftError("malformed frame"),
            Ok(Err(e)) => {
                tracing::debug!(%peer_addr, error = %e, "plain frame error, closing");
                ReadOutcome::Close
            }
            Err(_) => {
                tracing::debug!(%peer_addr, "idle timeout before authentication");
                ReadOutcome::Close
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    state: &Arc<RelayState>,
    mut reader: R,
    tx: &mpsc::Sender<OutgoingFrame>,
    key_cell: &Arc<Mutex<Option<[u8; 32]>>>,
    kill: &Arc<Notify>,
    conn: &mut ConnState,
    peer_addr: SocketAddr,
) {
    let idle = Duration::from_secs(state.config.idle_timeout_secs);

    loop {
        let key = *key_cell.lock().unwrap();

        let outcome = tokio::select! {
            _ = kill.notified() => {
                tracing::debug!(%peer_addr, "read loop closed by forced disconnect");
                return;
            }
            outcome = read_one(&mut reader, key, idle, peer_addr) => outcome,
        };

        let value = match outcome {
            ReadOutcome::Value(v) => v,
            ReadOutcome::SoftError(msg) => {
                let _ = tx.try_send(OutgoingFrame::Plain(error_reply(msg)));
                continue;
            }
            ReadOutcome::Close => return,
        };

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(_) => {
                let reply = error_reply("unknown or malformed command");
                let _ = tx.try_send(tag_for(conn, reply));
                continue;
            }
        };

        dispatch(state, tx, key_cell, kill, conn, envelope.command, envelope.id.as_deref(), peer_addr).await;
    }
}

/// Tags a reply frame by the connection's current auth state: plaintext
/// before login, secure after. Never used for the `login_ok` reply itself,
/// which is always `Plain` regardless of when `conn.username` gets set.
fn tag_for(conn: &ConnState, value: Value) -> OutgoingFrame {
    if conn.username.is_some() {
        OutgoingFrame::Secure(value)
    } else {
        OutgoingFrame::Plain(value)
    }
}

async fn dispatch(
    state: &Arc<RelayState>,
    tx: &mpsc::Sender<OutgoingFrame>,
    key_cell: &Arc<Mutex<Option<[u8; 32]>>>,
    kill: &Arc<Notify>,
    conn: &mut ConnState,
    command: ClientCommand,
    id: Option<&str>,
    peer_addr: SocketAddr,
) {
    if let ClientCommand::Login { username, password } = command {
        handle_login(state, tx, key_cell, kill, conn, username, password, id).await;
        return;
    }

    let Some(username) = conn.username.clone() else {
        let reply = attach_id(error_reply("not authenticated"), id);
        let _ = tx.try_send(OutgoingFrame::Plain(reply));
        return;
    };
    state.sessions.touch(&username);

    let reply = match command {
        ClientCommand::Login { .. } => unreachable!("handled above"),
        ClientCommand::Logout {} => {
            let _ = tx.try_send(OutgoingFrame::Secure(attach_id(ack(), id)));
            return;
        }
        ClientCommand::ListRooms {} => {
            let rooms: Vec<RoomSummary> = state
                .rooms
                .list()
                .into_iter()
                .map(|r| RoomSummary {
                    name: r.name,
                    member_count: r.member_count,
                })
                .collect();
            rooms_list(&rooms)
        }
        ClientCommand::CreateRoom { room } => {
            state.rooms.create_room(&room);
            ack()
        }
        ClientCommand::JoinRoom { room } => {
            let previous = conn.room.clone();
            let members = state.rooms.join(&username, &room, previous.as_deref());
            conn.room = Some(room.clone());
            routing::broadcast_room(
                &state.rooms,
                &room,
                &username,
                push("participant_joined", &username, json!({ "room": room })),
            );
            joined(&room, &members)
        }
        ClientCommand::LeaveRoom {} => {
            if let Some(room) = conn.room.take() {
                state.rooms.leave(&username, &room);
                routing::broadcast_room(
                    &state.rooms,
                    &room,
                    &username,
                    push("participant_left", &username, json!({ "room": room })),
                );
            }
            ack()
        }
        ClientCommand::Chat { text } => {
            if let Some(room) = &conn.room {
                routing::broadcast_room(
                    &state.rooms,
                    room,
                    &username,
                    push("chat", &username, json!({ "text": text })),
                );
                return;
            }
            error_reply("not in a room")
        }
        ClientCommand::Dm { to, text } => {
            let delivered = routing::send_dm(&state.rooms, &to, push("dm", &username, json!({ "text": text })));
            if delivered {
                return;
            }
            error_reply("User offline")
        }
        ClientCommand::FileMeta { transfer_id, name, size, to } => {
            if !routing::check_file_size(size, state.config.max_file_size) {
                error_reply(format!(
                    "File too large (max {}MB)",
                    state.config.max_file_size / (1024 * 1024)
                ))
            } else if !state.file_rate.lock().unwrap().check(username.clone()) {
                error_reply("rate limit exceeded")
            } else {
                let payload = json!({ "transfer_id": transfer_id, "name": name, "size": size });
                if routing::relay(&state.rooms, &username, conn.room.as_deref(), to.as_deref(), push("file_meta", &username, payload)) {
                    return;
                }
                error_reply("User offline")
            }
        }
        ClientCommand::FileChunk { transfer_id, data, index, to } => {
            let decoded_len = base64::engine::general_purpose::STANDARD
                .decode(&data)
                .map(|b| b.len())
                .unwrap_or(usize::MAX);
            if !routing::check_chunk_size(decoded_len, state.config.max_chunk_size) {
                error_reply(format!(
                    "Chunk too large (max {}MB)",
                    state.config.max_chunk_size / (1024 * 1024)
                ))
            } else {
                let payload = json!({ "transfer_id": transfer_id, "data": data, "index": index });
                routing::relay(&state.rooms, &username, conn.room.as_deref(), to.as_deref(), push("file_chunk", &username, payload));
                return;
            }
        }
        ClientCommand::FileComplete { transfer_id, to } => {
            let payload = json!({ "transfer_id": transfer_id });
            routing::relay(&state.rooms, &username, conn.room.as_deref(), to.as_deref(), push("file_complete", &username, payload));
            return;
        }
        ClientCommand::UdpRegister { media, port } => {
            conn.udp_endpoints.insert(media, SocketAddr::new(peer_addr.ip(), port));
            ack()
        }
        ClientCommand::Kick { user } => {
            let Some(room) = conn.room.clone() else {
                return with_soft_reply(tx, id, error_reply("not in a room"));
            };
            match state.rooms.kick(&username, &user, &room) {
                Ok(()) => {
                    state.rooms.close_with(
                        &user,
                        push("kicked", &username, json!({ "room": room })),
                    );
                    routing::broadcast_room(
                        &state.rooms,
                        &room,
                        &username,
                        push("participant_kicked", &user, json!({ "room": room })),
                    );
                    ack()
                }
                Err(e) => error_reply(e.to_string()),
            }
        }
        ClientCommand::Ping {} => json!({ "ok": true, "type": "pong" }),
    };

    let _ = tx.try_send(OutgoingFrame::Secure(attach_id(reply, id)));
}

fn with_soft_reply(tx: &mpsc::Sender<OutgoingFrame>, id: Option<&str>, reply: Value) {
    let _ = tx.try_send(OutgoingFrame::Secure(attach_id(reply, id)));
}

async fn handle_login(
    state: &Arc<RelayState>,
    tx: &mpsc::Sender<OutgoingFrame>,
    key_cell: &Arc<Mutex<Option<[u8; 32]>>>,
    kill: &Arc<Notify>,
    conn: &mut ConnState,
    username: String,
    password: String,
    id: Option<&str>,
) {
    if conn.username.is_some() {
        let reply = attach_id(error_reply("already authenticated"), id);
        let _ = tx.try_send(OutgoingFrame::Plain(reply));
        return;
    }
    if username.is_empty() {
        let reply = attach_id(error_reply("username must not be empty"), id);
        let _ = tx.try_send(OutgoingFrame::Plain(reply));
        return;
    }
    if state.sessions.is_online(&username) {
        let reply = attach_id(error_reply("Username in use"), id);
        let _ = tx.try_send(OutgoingFrame::Plain(reply));
        return;
    }

    let known = state.credentials.exists(&username);
    if known {
        if !state.credentials.verify(&username, &password).await {
            let reply = attach_id(error_reply("invalid credentials"), id);
            let _ = tx.try_send(OutgoingFrame::Plain(reply));
            return;
        }
    } else if state.config.require_registration {
        let reply = attach_id(error_reply("unknown user"), id);
        let _ = tx.try_send(OutgoingFrame::Plain(reply));
        return;
    } else {
        match state.credentials.add(&username, &password).await {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "failed to register new user");
                let reply = attach_id(error_reply("internal error"), id);
                let _ = tx.try_send(OutgoingFrame::Plain(reply));
                return;
            }
        }
    }

    let (token, key) = state.sessions.create(&username);
    *key_cell.lock().unwrap() = Some(key);
    conn.username = Some(username.clone());

    let key_b64 = base64::engine::general_purpose::STANDARD.encode(key);
    let reply = attach_id(login_ok(&token, &key_b64), id);
    let _ = tx.try_send(OutgoingFrame::Plain(reply));

    // Registered only after the plaintext login_ok has already been
    // enqueued: any frame another task posts to this inbox from now on is
    // tagged Secure by `RoomRegistry::send_to`, so ordering on the wire
    // (§8 invariant 5) falls out of enqueue order, not timing.
    state.rooms.register_client(&username, tx.clone(), kill.clone());
}

async fn cleanup(state: &Arc<RelayState>, conn: &ConnState) {
    let Some(username) = &conn.username else { return };

    if let Some(room) = &conn.room {
        // `leave` returns `false` if a concurrent `kick` already removed
        // this user from the room — that path already broadcasts
        // `participant_kicked`, so announcing `participant_left` here too
        // would double up on the same departure.
        if state.rooms.leave(username, room) {
            routing::broadcast_room(
                &state.rooms,
                room,
                username,
                push("participant_left", username, json!({ "room": room })),
            );
        }
    }
    state.rooms.unregister_client(username);
    state.sessions.end(username);
}
