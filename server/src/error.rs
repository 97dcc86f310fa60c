use shared::{ChannelId, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("client table is full ({max} connections)")]
    ClientTableFull { max: usize },

    #[error("room table is full ({max} rooms)")]
    RoomTableFull { max: usize },

    #[error("room {0} is already active")]
    RoomActive(ChannelId),

    #[error("room {0} not found")]
    RoomNotFound(ChannelId),

    #[error("room {0} is reserved and cannot be closed")]
    ReservedRoom(ChannelId),
}

/// Why an outbound frame did not reach its recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,

    #[error("no connection for player {0}")]
    UnknownPlayer(u16),

    #[error("no connected user named `{0}`")]
    UnknownName(String),

    #[error("outbound queue holds {queued} bytes, limit is {limit}")]
    Backlog { queued: usize, limit: usize },

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// Failure inside a credential backend. Treated as "try again later", never
/// as a verdict on the credentials themselves.
#[derive(Debug, Error)]
#[error("credential store unavailable: {0}")]
pub struct CredentialError(pub String);
