//! Lobby world room: players walk around a shared 2D space and get told when
//! they step into a trigger zone leading to another room.

use std::collections::BTreeMap;

use log::{debug, warn};
use shared::lobby::{
    decode_payload, encode_payload, PlayerLeft, PlayerPosition, Position, ZoneEntered,
    PLAYER_RADIUS, SPAWN,
};
use shared::{action, ChannelId, PlayerId};

use crate::room::{RoomContext, RoomLogic, RoomModule};
use crate::rooms::CHAT_CHANNEL;

/// Axis-aligned rectangle that points at another room.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerZone {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub target: ChannelId,
}

impl TriggerZone {
    /// Circle-rectangle overlap against a player of `radius` at `pos`.
    pub fn contains(&self, pos: Position, radius: f32) -> bool {
        let nearest_x = pos.x.clamp(self.x, self.x + self.width);
        let nearest_y = pos.y.clamp(self.y, self.y + self.height);
        let dx = pos.x - nearest_x;
        let dy = pos.y - nearest_y;
        dx * dx + dy * dy <= radius * radius
    }
}

pub fn default_zones() -> Vec<TriggerZone> {
    vec![TriggerZone {
        name: "chat".to_string(),
        x: 600.0,
        y: -150.0,
        width: 75.0,
        height: 75.0,
        target: CHAT_CHANNEL,
    }]
}

pub struct LobbyWorld {
    zones: Vec<TriggerZone>,
}

impl LobbyWorld {
    pub fn new(zones: Vec<TriggerZone>) -> Self {
        Self { zones }
    }
}

impl Default for LobbyWorld {
    fn default() -> Self {
        Self::new(default_zones())
    }
}

impl RoomModule for LobbyWorld {
    fn name(&self) -> &str {
        "lobby"
    }

    fn create(&self) -> Box<dyn RoomLogic> {
        Box::new(LobbyRoom::new(self.zones.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Avatar {
    pos: Position,
    /// Zone the player is standing in; cleared once they step out, so a zone
    /// fires only once per visit.
    in_zone: Option<usize>,
}

impl Avatar {
    fn spawn() -> Self {
        Self {
            pos: SPAWN,
            in_zone: None,
        }
    }
}

pub struct LobbyRoom {
    zones: Vec<TriggerZone>,
    players: BTreeMap<PlayerId, Avatar>,
}

impl LobbyRoom {
    pub fn new(zones: Vec<TriggerZone>) -> Self {
        Self {
            zones,
            players: BTreeMap::new(),
        }
    }

    pub fn position(&self, player: PlayerId) -> Option<Position> {
        self.players.get(&player).map(|a| a.pos)
    }

    fn on_join(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId) {
        self.players.insert(player, Avatar::spawn());

        for (&id, avatar) in &self.players {
            let update = PlayerPosition {
                player: id,
                x: avatar.pos.x,
                y: avatar.pos.y,
            };
            if let Ok(payload) = encode_payload(&update) {
                ctx.unicast(player, action::MOVE, &payload);
            }
        }
        broadcast_position(ctx, player, SPAWN);
    }

    fn on_move(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId, payload: &[u8]) {
        let pos: Position = match decode_payload(payload) {
            Ok(pos) => pos,
            Err(e) => {
                warn!("Ignoring malformed move from client {}: {}", player, e);
                return;
            }
        };
        if !pos.x.is_finite() || !pos.y.is_finite() {
            warn!("Ignoring non-finite move from client {}", player);
            return;
        }

        self.players.entry(player).or_insert_with(Avatar::spawn).pos = pos;
        broadcast_position(ctx, player, pos);
    }
}

fn broadcast_position(ctx: &mut RoomContext<'_>, player: PlayerId, pos: Position) {
    let update = PlayerPosition {
        player,
        x: pos.x,
        y: pos.y,
    };
    match encode_payload(&update) {
        Ok(payload) => {
            ctx.broadcast(action::MOVE, &payload, Some(player));
        }
        Err(e) => warn!("Failed to encode position of client {}: {}", player, e),
    }
}

impl RoomLogic for LobbyRoom {
    fn on_action(
        &mut self,
        ctx: &mut RoomContext<'_>,
        player: PlayerId,
        action: u8,
        payload: &[u8],
    ) {
        match action {
            action::JOIN => self.on_join(ctx, player),
            action::MOVE => self.on_move(ctx, player, payload),
            other => debug!("Lobby ignoring action {} from client {}", other, player),
        }
    }

    fn on_tick(&mut self, ctx: &mut RoomContext<'_>) {
        for (&player, avatar) in self.players.iter_mut() {
            let zone = self
                .zones
                .iter()
                .position(|zone| zone.contains(avatar.pos, PLAYER_RADIUS));

            if let Some(idx) = zone.filter(|_| zone != avatar.in_zone) {
                let entered = &self.zones[idx];
                let notice = ZoneEntered {
                    room: entered.target,
                    name: entered.name.clone(),
                };
                if let Ok(payload) = encode_payload(&notice) {
                    ctx.unicast(player, action::ZONE_ENTERED, &payload);
                }
            }
            avatar.in_zone = zone;
        }
    }

    fn on_player_leave(&mut self, ctx: &mut RoomContext<'_>, player: PlayerId) {
        if self.players.remove(&player).is_none() {
            return;
        }
        match encode_payload(&PlayerLeft { player }) {
            Ok(payload) => {
                ctx.broadcast(action::PLAYER_LEFT, &payload, Some(player));
            }
            Err(e) => warn!("Failed to encode departure of client {}: {}", player, e),
        }
    }
}
