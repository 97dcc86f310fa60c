//! Wire protocol shared by the room server and its clients.
//!
//! - [`codec`]: resumable frame decoding and symmetric encoding
//! - [`message`]: the bounded, length-delimited chat record
//! - [`auth`]: the credential handshake record
//! - [`lobby`]: bincode payloads of the lobby world room
//! - [`history`]: the ring buffer of recent chat messages

pub mod auth;
pub mod codec;
pub mod error;
pub mod history;
pub mod lobby;
pub mod message;

pub use codec::{Decode, FrameFormat, Packet};
pub use error::ProtocolError;
pub use history::ChatHistory;
pub use message::{Message, MessageType};

/// Identifies a room on the wire.
pub type ChannelId = u16;
/// Connection-scoped player id, reused after the connection is gone.
pub type PlayerId = u16;

/// Room 0: the default room every client lands in. It is never closed.
pub const LOBBY_CHANNEL: ChannelId = 0;

/// Action codes carried in the routed header. Their meaning belongs to the
/// room module handling the packet; these are the ones the bundled rooms and
/// the dispatcher agree on.
pub mod action {
    /// Enter a room. The dispatcher synthesizes one on admission.
    pub const JOIN: u8 = 1;
    /// Lobby position update.
    pub const MOVE: u8 = 2;
    /// Payload is a [`crate::Message`] record.
    pub const CHAT: u8 = 3;
    /// Payload is a [`crate::auth::AuthRequest`] record.
    pub const AUTH: u8 = 4;
    /// Lobby trigger zone notification.
    pub const ZONE_ENTERED: u8 = 5;
    pub const PLAYER_LEFT: u8 = 6;
    /// Server to client UTF-8 text (rejections, auth results).
    pub const NOTICE: u8 = 255;
}
