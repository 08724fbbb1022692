//! Wire protocol encoding/decoding

pub mod codec;
pub mod messages;

pub use codec::{read_plain, read_plain_value, read_secure, read_secure_value, write_plain, write_secure};
pub use messages::{
    ack, attach_id, error_reply, joined, login_ok, push, rooms_list, ClientCommand, Envelope,
    MediaKind, RoomSummary,
};
