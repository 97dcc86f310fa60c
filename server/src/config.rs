//! Process configuration for the room server.

use std::time::Duration;

use shared::codec::MAX_PAYLOAD;
use shared::history::DEFAULT_HISTORY;
use shared::{FrameFormat, PlayerId};

use crate::error::ServerError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CLIENTS: usize = 64;
pub const DEFAULT_MAX_ROOMS: usize = 50;
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);
pub const DEFAULT_OUTBOUND_LIMIT: usize = 256 * 1024;

/// Which room layout the server starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Length-prefixed chat records, room 0 is a chat channel.
    #[default]
    Chat,
    /// Routed frames, room 0 is the lobby world and room 1 a chat channel.
    Lobby,
}

impl Mode {
    pub fn frame_format(self) -> FrameFormat {
        match self {
            Mode::Chat => FrameFormat::LengthPrefixed,
            Mode::Lobby => FrameFormat::Routed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub max_rooms: usize,
    pub max_payload: usize,
    /// Upper bound on how long the loop waits before ticking every room.
    pub tick: Duration,
    pub history: usize,
    pub format: FrameFormat,
    /// Connections silent for longer than this are dropped. Off by default.
    pub idle_timeout: Option<Duration>,
    /// Bytes allowed to pile up for a peer that stopped reading.
    pub outbound_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_rooms: DEFAULT_MAX_ROOMS,
            max_payload: MAX_PAYLOAD,
            tick: DEFAULT_TICK,
            history: DEFAULT_HISTORY,
            format: FrameFormat::LengthPrefixed,
            idle_timeout: None,
            outbound_limit: DEFAULT_OUTBOUND_LIMIT,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_clients == 0 {
            return Err(ServerError::Config("max_clients must be at least 1".into()));
        }
        // Ids are u16 and 0 is never handed out
        if self.max_clients > usize::from(PlayerId::MAX) {
            return Err(ServerError::Config(format!(
                "max_clients must be at most {}",
                PlayerId::MAX
            )));
        }
        if self.max_rooms == 0 {
            return Err(ServerError::Config("max_rooms must be at least 1".into()));
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ServerError::Config(format!(
                "max_payload must be within 1..={MAX_PAYLOAD}"
            )));
        }
        if self.tick.is_zero() {
            return Err(ServerError::Config("tick interval must be non-zero".into()));
        }
        if self.outbound_limit < self.format.max_frame_len(self.max_payload) {
            return Err(ServerError::Config(
                "outbound_limit must hold at least one full frame".into(),
            ));
        }
        Ok(())
    }
}
