//! The contract between the dispatcher and pluggable room logic.
//!
//! A [`RoomModule`] is a factory registered under a room id; the registry
//! asks it for a fresh [`RoomLogic`] whenever the room is (re)created. The
//! logic owns all per-room state. The dispatcher never looks inside it and
//! only ever calls it from the loop task, so it needs no locking.
//!
//! Callbacks get a [`RoomContext`] for talking back to players. Sends take
//! effect immediately; moving a player to another room is queued and
//! applied once the current callback has returned.

use log::warn;
use shared::{ChannelId, PlayerId, ProtocolError};

use crate::client_manager::ANONYMOUS;
use crate::delivery::Delivery;

pub trait RoomModule: Send {
    fn name(&self) -> &str;

    fn create(&self) -> Box<dyn RoomLogic>;
}

pub trait RoomLogic: Send {
    /// Handles one packet from `player`. [`shared::action::JOIN`] with an
    /// empty payload is delivered whenever a player enters the room.
    fn on_action(
        &mut self,
        ctx: &mut RoomContext<'_>,
        player: PlayerId,
        action: u8,
        payload: &[u8],
    );

    /// Runs once per loop iteration, after every action of that iteration.
    fn on_tick(&mut self, _ctx: &mut RoomContext<'_>) {}

    /// `player` has left the room or disconnected and no longer receives
    /// broadcasts.
    fn on_player_leave(&mut self, _ctx: &mut RoomContext<'_>, _player: PlayerId) {}

    fn on_destroy(&mut self) {}
}

/// Work a room asks the dispatcher to do after its callback returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRequest {
    Move { player: PlayerId, to: ChannelId },
}

pub struct RoomContext<'a> {
    room: ChannelId,
    delivery: Delivery<'a>,
    requests: &'a mut Vec<RoomRequest>,
}

impl<'a> RoomContext<'a> {
    pub fn new(room: ChannelId, delivery: Delivery<'a>, requests: &'a mut Vec<RoomRequest>) -> Self {
        Self {
            room,
            delivery,
            requests,
        }
    }

    pub fn room_id(&self) -> ChannelId {
        self.room
    }

    /// Sends to every member of this room except `exclude`.
    pub fn broadcast(&mut self, action: u8, payload: &[u8], exclude: Option<PlayerId>) -> usize {
        self.delivery
            .broadcast_to_room(self.room, action, payload, exclude)
    }

    /// Sends to every admitted player on the server.
    pub fn broadcast_all(&mut self, action: u8, payload: &[u8], exclude: Option<PlayerId>) -> usize {
        self.delivery
            .broadcast_all(self.room, action, payload, exclude)
    }

    pub fn unicast(&mut self, player: PlayerId, action: u8, payload: &[u8]) -> bool {
        self.delivery
            .unicast(player, self.room, action, payload)
            .is_ok()
    }

    /// Delivers to whoever currently uses `name`, in any room.
    pub fn unicast_by_name(&mut self, name: &str, action: u8, payload: &[u8]) -> Option<PlayerId> {
        self.delivery
            .unicast_by_name(name, self.room, action, payload)
            .ok()
    }

    /// Players currently in this room, in table order.
    pub fn members(&self) -> Vec<PlayerId> {
        self.delivery.clients().members_of(self.room)
    }

    pub fn player_count(&self) -> usize {
        self.members().len()
    }

    pub fn display_name(&self, player: PlayerId) -> Option<&str> {
        self.delivery
            .clients()
            .get(player)
            .map(|c| c.display_name.as_str())
    }

    pub fn set_display_name(&mut self, player: PlayerId, name: &str) {
        if let Some(conn) = self.delivery.clients_mut().get_mut(player) {
            conn.display_name = name.to_string();
        }
    }

    pub fn is_anonymous(&self, player: PlayerId) -> bool {
        self.display_name(player).map_or(true, |name| name == ANONYMOUS)
    }

    pub fn find_player(&self, name: &str) -> Option<PlayerId> {
        self.delivery.clients().find_by_name(name)
    }

    /// Drops the connection right away. Its departure is reported to the
    /// room through `on_player_leave` once the current callback returns.
    pub fn disconnect(&mut self, player: PlayerId, reason: &str) {
        self.delivery.clients_mut().mark_invalid(player, reason);
    }

    pub fn protocol_violation(&mut self, player: PlayerId, err: &ProtocolError) {
        warn!(
            "Protocol violation from client {} in room {}: {}",
            player, self.room, err
        );
        self.disconnect(player, "protocol violation");
    }

    pub fn move_player(&mut self, player: PlayerId, to: ChannelId) {
        self.requests.push(RoomRequest::Move { player, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::ClientTable;
    use crate::delivery::DeliverySettings;
    use crate::socket::mock::MockSocket;
    use shared::codec::MAX_PAYLOAD;
    use shared::{action, FrameFormat, Packet};

    fn settings() -> DeliverySettings {
        DeliverySettings {
            format: FrameFormat::Routed,
            max_payload: MAX_PAYLOAD,
            outbound_limit: 1 << 16,
        }
    }

    fn table(rooms: &[ChannelId]) -> (ClientTable, Vec<MockSocket>) {
        let mut table = ClientTable::new(8, 1024);
        let mut sockets = Vec::new();
        for &room in rooms {
            let socket = MockSocket::new();
            let id = table
                .add_client(socket.boxed(), "127.0.0.1:1".parse().unwrap())
                .unwrap();
            let conn = table.get_mut(id).unwrap();
            conn.admitted = true;
            conn.room = room;
            sockets.push(socket);
        }
        (table, sockets)
    }

    #[test]
    fn test_context_scopes_broadcast_to_room() {
        let (mut table, sockets) = table(&[3, 0, 3]);
        let mut requests = Vec::new();
        let mut ctx = RoomContext::new(3, Delivery::new(&mut table, settings()), &mut requests);

        assert_eq!(ctx.members(), vec![1, 3]);
        assert_eq!(ctx.broadcast(action::MOVE, &[1, 2], None), 2);
        assert!(sockets[1].written().is_empty());
        assert_eq!(
            sockets[2].frames(FrameFormat::Routed),
            vec![Packet::new(3, action::MOVE, vec![1, 2])]
        );
    }

    #[test]
    fn test_context_names() {
        let (mut table, _) = table(&[0, 0]);
        let mut requests = Vec::new();
        let mut ctx = RoomContext::new(0, Delivery::new(&mut table, settings()), &mut requests);

        assert!(ctx.is_anonymous(1));
        ctx.set_display_name(1, "alice");
        assert!(!ctx.is_anonymous(1));
        assert_eq!(ctx.display_name(1), Some("alice"));
        assert_eq!(ctx.find_player("alice"), Some(1));
        assert!(ctx.is_anonymous(42));
    }

    #[test]
    fn test_disconnect_is_immediate_and_move_is_deferred() {
        let (mut table, _) = table(&[0, 0]);
        let mut requests = Vec::new();
        {
            let mut ctx =
                RoomContext::new(0, Delivery::new(&mut table, settings()), &mut requests);
            ctx.disconnect(1, "kicked");
            ctx.move_player(2, 5);
            assert_eq!(ctx.player_count(), 1);
        }

        assert_eq!(requests, vec![RoomRequest::Move { player: 2, to: 5 }]);
        assert_eq!(table.get(2).unwrap().room, 0);
        assert_eq!(table.take_departures().len(), 1);
    }
}
