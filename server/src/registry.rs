//! Bounded table of active rooms.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use log::{error, info};
use shared::{ChannelId, LOBBY_CHANNEL};

use crate::error::ServerError;
use crate::room::{RoomLogic, RoomModule};

pub struct Room {
    pub id: ChannelId,
    module: Box<dyn RoomModule>,
    logic: Box<dyn RoomLogic>,
}

impl Room {
    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn logic_mut(&mut self) -> &mut dyn RoomLogic {
        self.logic.as_mut()
    }

    fn destroy(&mut self) {
        let id = self.id;
        let logic = &mut self.logic;
        if panic::catch_unwind(AssertUnwindSafe(|| logic.on_destroy())).is_err() {
            error!("Room {} panicked while being destroyed", id);
        }
    }
}

/// Rooms keyed by id, iterated in ascending id order.
pub struct RoomRegistry {
    rooms: BTreeMap<ChannelId, Room>,
    max_rooms: usize,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            max_rooms,
        }
    }

    pub fn register(&mut self, id: ChannelId, module: Box<dyn RoomModule>) -> Result<(), ServerError> {
        if self.rooms.contains_key(&id) {
            return Err(ServerError::RoomActive(id));
        }
        if self.rooms.len() >= self.max_rooms {
            return Err(ServerError::RoomTableFull {
                max: self.max_rooms,
            });
        }

        let logic = module.create();
        info!("Room {} ({}) registered", id, module.name());
        self.rooms.insert(id, Room { id, module, logic });
        Ok(())
    }

    pub fn lookup(&self, id: ChannelId) -> Result<&Room, ServerError> {
        self.rooms.get(&id).ok_or(ServerError::RoomNotFound(id))
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Result<&mut Room, ServerError> {
        self.rooms.get_mut(&id).ok_or(ServerError::RoomNotFound(id))
    }

    /// Destroys a room's state and frees its id. Room 0 cannot be closed.
    pub fn unregister(&mut self, id: ChannelId) -> Result<(), ServerError> {
        if id == LOBBY_CHANNEL {
            return Err(ServerError::ReservedRoom(id));
        }
        let mut room = self.rooms.remove(&id).ok_or(ServerError::RoomNotFound(id))?;
        room.destroy();
        info!("Room {} ({}) unregistered", id, room.name());
        Ok(())
    }

    /// Throws the room's state away and starts over from its module.
    pub fn reset(&mut self, id: ChannelId) -> Result<(), ServerError> {
        let room = self.get_mut(id)?;
        room.destroy();
        room.logic = room.module.create();
        info!("Room {} ({}) recreated", id, room.name());
        Ok(())
    }

    pub fn destroy_all(&mut self) {
        for (_, mut room) in std::mem::take(&mut self.rooms) {
            room.destroy();
        }
    }

    pub fn is_active(&self, id: ChannelId) -> bool {
        self.rooms.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.rooms.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
