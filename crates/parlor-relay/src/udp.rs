//! UDP media relay (C7)
//!
//! One `UdpRelay` instance per media kind (voice, video): separate
//! membership tables so a video-only participant never appears in the
//! voice fan-out. The wire format is the `HPH1`-magic binary header
//! (§4.7); the source tree has at least one other ad hoc framing and this
//! module deliberately implements only this one.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::interval;

use crate::error::Result;
use crate::rate_limit::RateLimiter;

const MAGIC: &[u8; 4] = b"HPH1";
const HEADER_LEN: usize = 13; // magic(4) + type(1) + room_len(2) + user_len(2) + seq(4)

const TYPE_VOICE: u8 = 1;
const TYPE_VIDEO: u8 = 2;
const TYPE_JOIN: u8 = 10;
const TYPE_LEAVE: u8 = 11;
const TYPE_KEEPALIVE: u8 = 12;

struct Packet<'a> {
    kind: u8,
    room: &'a str,
    user: &'a str,
    #[allow(dead_code)]
    seq: u32,
}

/// Parses one datagram, rejecting bad magic or truncated length fields.
/// Never panics on attacker-controlled input; malformed packets are the
/// caller's cue to drop silently (§7: no UDP error replies, amplification
/// risk).
fn parse(buf: &[u8]) -> Option<Packet<'_>> {
    if buf.len() < HEADER_LEN || &buf[0..4] != MAGIC {
        return None;
    }
    let kind = buf[4];
    let room_len = u16::from_be_bytes([buf[5], buf[6]]) as usize;
    let user_len = u16::from_be_bytes([buf[7], buf[8]]) as usize;
    let seq = u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]);

    if buf.len() < HEADER_LEN + room_len + user_len {
        return None;
    }
    let room = std::str::from_utf8(&buf[HEADER_LEN..HEADER_LEN + room_len]).ok()?;
    let user_start = HEADER_LEN + room_len;
    let user = std::str::from_utf8(&buf[user_start..user_start + user_len]).ok()?;

    Some(Packet { kind, room, user, seq })
}

struct Endpoint {
    #[allow(dead_code)]
    user: String,
    last_seen: Instant,
}

/// Per-room membership keyed by source address, plus the per-username
/// packet rate limit, for a single media kind.
pub struct UdpRelay {
    rooms: DashMap<String, DashMap<SocketAddr, Endpoint>>,
    rate: Mutex<RateLimiter<String>>,
    liveness: Duration,
}

impl UdpRelay {
    /// Build a relay with the given liveness window and per-second packet
    /// ceiling (sliding 1-second window, per source username).
    pub fn new(liveness: Duration, rate_limit_pps: u32) -> Self {
        Self {
            rooms: DashMap::new(),
            rate: Mutex::new(RateLimiter::new(rate_limit_pps, Duration::from_secs(1))),
            liveness,
        }
    }

    fn register(&self, room: &str, user: &str, addr: SocketAddr) {
        let members = self.rooms.entry(room.to_string()).or_default();
        members.insert(
            addr,
            Endpoint {
                user: user.to_string(),
                last_seen: Instant::now(),
            },
        );
    }

    fn remove(&self, room: &str, addr: &SocketAddr) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(addr);
        }
    }

    fn peers_excluding(&self, room: &str, exclude: &SocketAddr) -> Vec<SocketAddr> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .map(|e| *e.key())
                    .filter(|addr| addr != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evict endpoints idle past the liveness window and drop any room
    /// left with no members (§8 invariant 4).
    pub fn sweep(&self) {
        let now = Instant::now();
        let liveness = self.liveness;
        let mut emptied = Vec::new();
        for room in self.rooms.iter() {
            room.value().retain(|_, ep| now.duration_since(ep.last_seen) < liveness);
            if room.value().is_empty() {
                emptied.push(room.key().clone());
            }
        }
        for room in emptied {
            self.rooms.remove(&room);
        }
    }

    #[cfg(test)]
    fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

/// Runs one UDP media listener to completion, or until `shutdown` fires.
pub async fn run_udp_listener(
    relay: Arc<UdpRelay>,
    addr: &str,
    media: &'static str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    tracing::info!(%addr, media, "UDP listener bound");
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = received?;
                handle_packet(&relay, &socket, &buf[..len], src).await;
            }
            _ = shutdown.changed() => {
                tracing::info!(media, "UDP listener shutting down");
                return Ok(());
            }
        }
    }
}

/// Periodically sweeps `relay` for stale endpoints until `shutdown` fires.
pub async fn run_liveness_sweeper(relay: Arc<UdpRelay>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => relay.sweep(),
            _ = shutdown.changed() => return,
        }
    }
}

async fn handle_packet(relay: &UdpRelay, socket: &UdpSocket, datagram: &[u8], src: SocketAddr) {
    let Some(packet) = parse(datagram) else { return };

    if !relay.rate.lock().unwrap().check(packet.user.to_string()) {
        return;
    }

    match packet.kind {
        TYPE_JOIN | TYPE_KEEPALIVE => {
            relay.register(packet.room, packet.user, src);
        }
        TYPE_LEAVE => {
            relay.remove(packet.room, &src);
        }
        TYPE_VOICE | TYPE_VIDEO => {
            relay.register(packet.room, packet.user, src);
            for peer in relay.peers_excluding(packet.room, &src) {
                let _ = socket.send_to(datagram, peer).await;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(kind: u8, room: &str, user: &str, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(kind);
        buf.extend_from_slice(&(room.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(user.len() as u16).to_be_bytes());
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(room.as_bytes());
        buf.extend_from_slice(user.as_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_parse_round_trip() {
        let raw = build_packet(TYPE_VOICE, "R", "alice", 42, b"abc");
        let packet = parse(&raw).unwrap();
        assert_eq!(packet.kind, TYPE_VOICE);
        assert_eq!(packet.room, "R");
        assert_eq!(packet.user, "alice");
        assert_eq!(packet.seq, 42);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut raw = build_packet(TYPE_VOICE, "R", "alice", 1, b"");
        raw[0] = b'X';
        assert!(parse(&raw).is_none());
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let raw = build_packet(TYPE_VOICE, "R", "alice", 1, b"");
        assert!(parse(&raw[..HEADER_LEN]).is_none());
    }

    #[test]
    fn test_join_then_leave_clears_membership() {
        let relay = UdpRelay::new(Duration::from_secs(20), 100);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        relay.register("R", "alice", addr);
        assert_eq!(relay.member_count("R"), 1);
        relay.remove("R", &addr);
        assert_eq!(relay.member_count("R"), 0);
    }

    #[test]
    fn test_peers_excluding_source() {
        let relay = UdpRelay::new(Duration::from_secs(20), 100);
        let alice: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let bob: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        relay.register("R", "alice", alice);
        relay.register("R", "bob", bob);
        let peers = relay.peers_excluding("R", &alice);
        assert_eq!(peers, vec![bob]);
    }

    #[test]
    fn test_sweep_evicts_stale_and_drops_empty_room() {
        let relay = UdpRelay::new(Duration::from_millis(1), 100);
        let addr: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        relay.register("R", "alice", addr);
        std::thread::sleep(Duration::from_millis(5));
        relay.sweep();
        assert_eq!(relay.member_count("R"), 0);
        assert!(relay.rooms.get("R").is_none());
    }
}
