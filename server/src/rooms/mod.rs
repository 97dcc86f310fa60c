//! Room modules bundled with the server.

pub mod chat;
pub mod lobby;

pub use chat::ChatChannel;
pub use lobby::{LobbyWorld, TriggerZone};

use shared::{ChannelId, LOBBY_CHANNEL};

use crate::config::Mode;
use crate::room::RoomModule;

/// Chat channel next to the lobby world in [`Mode::Lobby`].
pub const CHAT_CHANNEL: ChannelId = 1;

/// Rooms a mode starts with, room 0 first.
pub fn layout(mode: Mode, history: usize) -> Vec<(ChannelId, Box<dyn RoomModule>)> {
    match mode {
        Mode::Chat => vec![(LOBBY_CHANNEL, Box::new(ChatChannel::new(history)) as Box<dyn RoomModule>)],
        Mode::Lobby => vec![
            (LOBBY_CHANNEL, Box::new(LobbyWorld::default()) as Box<dyn RoomModule>),
            (CHAT_CHANNEL, Box::new(ChatChannel::new(history))),
        ],
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        let chat = layout(Mode::Chat, 8);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].0, LOBBY_CHANNEL);
        assert_eq!(chat[0].1.name(), "chat");

        let lobby: Vec<(ChannelId, String)> = layout(Mode::Lobby, 8)
            .into_iter()
            .map(|(id, module)| (id, module.name().to_string()))
            .collect();
        assert_eq!(
            lobby,
            vec![(0, "lobby".to_string()), (CHAT_CHANNEL, "chat".to_string())]
        );
    }
}
