//! Chat channel room.
//!
//! Speaks [`Message`] records under [`action::CHAT`]. The room keeps a short
//! history that every newcomer gets replayed before the user count update.

use log::{debug, warn};
use shared::history::DEFAULT_HISTORY;
use shared::message::{MAX_TEXT_LEN, SERVER_NAME};
use shared::{action, ChatHistory, Message, MessageType, PlayerId};

use crate::client_manager::ANONYMOUS;
use crate::room::{RoomContext, RoomLogic, RoomModule};

const HELP: &str = "Commands: /list, /help, /quit. Use /whisper <name> in the client to talk privately.";

pub struct ChatChannel {
    history: usize,
}

impl ChatChannel {
    pub fn new(history: usize) -> Self {
        Self { history }
    }
}

impl Default for ChatChannel {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl RoomModule for ChatChannel {
    fn name(&self) -> &str {
        "chat"
    }

    fn create(&self) -> Box<dyn RoomLogic> {
        Box::new(ChatRoom::new(self.history))
    }
}

pub struct ChatRoom {
    history: ChatHistory,
}

impl ChatRoom {
    pub fn new(history: usize) -> Self {
        Self {
            history: ChatHistory::new(history),
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    fn on_join(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId) {
        for message in self.history.replay() {
            send(ctx, player, message);
        }
        broadcast_user_count(ctx);
    }

    fn on_message(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId, mut message: Message) {
        if ctx.is_anonymous(player) {
            adopt_name(ctx, player, &message.sender);
        }
        message.sender = ctx.display_name(player).unwrap_or(ANONYMOUS).to_string();

        match message.kind {
            MessageType::Broadcast => {
                if message.text.is_empty() {
                    return;
                }
                match message.encode() {
                    Ok(bytes) => {
                        ctx.broadcast(action::CHAT, &bytes, Some(player));
                        self.history.record(message);
                    }
                    Err(e) => warn!("Dropping chat message from client {}: {}", player, e),
                }
            }
            MessageType::Whisper => whisper(ctx, player, message),
            MessageType::Command => self.command(ctx, player, &message.text),
            MessageType::CommandResponse | MessageType::UserCount => {
                debug!(
                    "Ignoring server-only message type {:?} from client {}",
                    message.kind, player
                );
            }
        }
    }

    fn command(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId, text: &str) {
        let command = text.split_whitespace().next().unwrap_or_default();
        match command {
            "/list" => list_users(ctx, player),
            "/help" => reply(ctx, player, HELP),
            "/quit" => {
                reply(ctx, player, "Goodbye");
                ctx.disconnect(player, "quit");
            }
            other => reply(ctx, player, &format!("Unknown command: {other}")),
        }
    }
}

impl RoomLogic for ChatRoom {
    fn on_action(
        &mut self,
        ctx: &mut RoomContext<'_>,
        player: PlayerId,
        action: u8,
        payload: &[u8],
    ) {
        match action {
            action::JOIN => self.on_join(ctx, player),
            action::CHAT => match Message::decode(payload) {
                Ok(message) => self.on_message(ctx, player, message),
                Err(e) => ctx.protocol_violation(player, &e),
            },
            other => debug!(
                "Chat room {} ignoring action {} from client {}",
                ctx.room_id(),
                other,
                player
            ),
        }
    }

    fn on_player_leave(&mut self, ctx: &mut RoomContext<'_>, _player: PlayerId) {
        broadcast_user_count(ctx);
    }
}

/// The first message of an anonymous connection introduces it.
fn adopt_name(ctx: &mut RoomContext<'_>, player: PlayerId, name: &str) {
    if name.is_empty() || name == ANONYMOUS || name == SERVER_NAME {
        return;
    }
    if ctx.find_player(name).is_some() {
        reply(ctx, player, &format!("Name {name} is already in use"));
        return;
    }
    ctx.set_display_name(player, name);
}

fn whisper(ctx: &mut RoomContext<'_>, player: PlayerId, message: Message) {
    if message.target.is_empty() {
        reply(ctx, player, "Whisper needs a target");
        return;
    }
    let bytes = match message.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Dropping whisper from client {}: {}", player, e);
            return;
        }
    };

    match ctx.unicast_by_name(&message.target, action::CHAT, &bytes) {
        Some(recipient) if recipient != player => {
            ctx.unicast(player, action::CHAT, &bytes);
        }
        Some(_) => {}
        None => reply(ctx, player, "User not found"),
    }
}

fn list_users(ctx: &mut RoomContext<'_>, player: PlayerId) {
    let names: Vec<String> = ctx
        .members()
        .into_iter()
        .filter_map(|id| ctx.display_name(id).map(str::to_string))
        .collect();

    let mut line = format!("Users online ({}):", names.len());
    for name in names {
        if line.len() + name.len() + 1 > MAX_TEXT_LEN {
            reply(ctx, player, &line);
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&name);
    }
    reply(ctx, player, &line);
}

fn broadcast_user_count(ctx: &mut RoomContext<'_>) {
    let count = ctx.player_count();
    match Message::user_count(count).encode() {
        Ok(bytes) => {
            ctx.broadcast(action::CHAT, &bytes, None);
        }
        Err(e) => warn!("Failed to encode user count: {}", e),
    }
}

fn reply(ctx: &mut RoomContext<'_>, player: PlayerId, text: &str) {
    send(ctx, player, &Message::response(text));
}

fn send(ctx: &mut RoomContext<'_>, player: PlayerId, message: &Message) {
    match message.encode() {
        Ok(bytes) => {
            ctx.unicast(player, action::CHAT, &bytes);
        }
        Err(e) => warn!("Failed to encode message for client {}: {}", player, e),
    }
}
