//! Outbound fan-out with per-recipient failure isolation.
//!
//! Every frame goes through the same codec the inbound side decodes with.
//! A failed send marks only its recipient invalid; the connection stays in
//! the table until compaction, so callers can keep iterating.

use bytes::Bytes;
use log::{debug, warn};
use shared::codec::encode;
use shared::{action, ChannelId, FrameFormat, Message, Packet, PlayerId, ProtocolError, LOBBY_CHANNEL};

use crate::client_manager::ClientTable;
use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub format: FrameFormat,
    pub max_payload: usize,
    /// Queued bytes tolerated for a peer that is not reading.
    pub outbound_limit: usize,
}

/// Encodes a short server notice in whatever shape the framing can carry.
///
/// Routed connections get a [`action::NOTICE`] packet with UTF-8 text;
/// length-prefixed connections only understand chat records, so they get a
/// command response from the server.
pub fn notice_frame(
    format: FrameFormat,
    text: &str,
    max_payload: usize,
) -> Result<Bytes, ProtocolError> {
    let packet = match format {
        FrameFormat::Routed => Packet::new(LOBBY_CHANNEL, action::NOTICE, text.as_bytes()),
        FrameFormat::LengthPrefixed => {
            Packet::new(LOBBY_CHANNEL, action::CHAT, Message::response(text).encode()?)
        }
    };
    encode(format, &packet, max_payload)
}

pub struct Delivery<'a> {
    clients: &'a mut ClientTable,
    settings: DeliverySettings,
}

impl<'a> Delivery<'a> {
    pub fn new(clients: &'a mut ClientTable, settings: DeliverySettings) -> Self {
        Self { clients, settings }
    }

    pub fn clients(&self) -> &ClientTable {
        self.clients
    }

    pub fn clients_mut(&mut self) -> &mut ClientTable {
        self.clients
    }

    pub fn settings(&self) -> DeliverySettings {
        self.settings
    }

    fn frame(&self, channel: ChannelId, action: u8, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        encode(
            self.settings.format,
            &Packet::new(channel, action, payload),
            self.settings.max_payload,
        )
    }

    /// Sends to every member of `room` except `exclude`. Returns how many
    /// recipients accepted the frame.
    pub fn broadcast_to_room(
        &mut self,
        room: ChannelId,
        action: u8,
        payload: &[u8],
        exclude: Option<PlayerId>,
    ) -> usize {
        let recipients = self.clients.members_of(room);
        self.fan_out(room, recipients, action, payload, exclude)
    }

    /// Like [`Delivery::broadcast_to_room`], but to every admitted connection
    /// regardless of room. The frame is labeled with `channel`.
    pub fn broadcast_all(
        &mut self,
        channel: ChannelId,
        action: u8,
        payload: &[u8],
        exclude: Option<PlayerId>,
    ) -> usize {
        let recipients: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|c| c.is_valid() && c.admitted)
            .map(|c| c.id)
            .collect();
        self.fan_out(channel, recipients, action, payload, exclude)
    }

    fn fan_out(
        &mut self,
        channel: ChannelId,
        recipients: Vec<PlayerId>,
        action: u8,
        payload: &[u8],
        exclude: Option<PlayerId>,
    ) -> usize {
        let frame = match self.frame(channel, action, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping broadcast on channel {}: {}", channel, e);
                return 0;
            }
        };

        recipients
            .into_iter()
            .filter(|&id| Some(id) != exclude)
            .filter(|&id| self.send_frame(id, &frame).is_ok())
            .count()
    }

    pub fn unicast(
        &mut self,
        player: PlayerId,
        channel: ChannelId,
        action: u8,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        if self.clients.get(player).is_none() {
            return Err(DeliveryError::UnknownPlayer(player));
        }
        let frame = self.frame(channel, action, payload)?;
        self.send_frame(player, &frame)
    }

    /// Delivers to the admitted connection currently using `name`.
    pub fn unicast_by_name(
        &mut self,
        name: &str,
        channel: ChannelId,
        action: u8,
        payload: &[u8],
    ) -> Result<PlayerId, DeliveryError> {
        let player = self
            .clients
            .find_by_name(name)
            .ok_or_else(|| DeliveryError::UnknownName(name.to_string()))?;
        self.unicast(player, channel, action, payload)?;
        Ok(player)
    }

    pub fn notice(&mut self, player: PlayerId, text: &str) -> Result<(), DeliveryError> {
        let frame = notice_frame(self.settings.format, text, self.settings.max_payload)?;
        self.send_frame(player, &frame)
    }

    fn send_frame(&mut self, player: PlayerId, frame: &[u8]) -> Result<(), DeliveryError> {
        let limit = self.settings.outbound_limit;
        let conn = self
            .clients
            .get_mut(player)
            .ok_or(DeliveryError::UnknownPlayer(player))?;

        match conn.queue(frame, limit) {
            Ok(()) => Ok(()),
            Err(DeliveryError::Closed) => Err(DeliveryError::Closed),
            Err(e) => {
                warn!("Send to client {} failed: {}", player, e);
                self.clients.mark_invalid(player, "send failed");
                Err(e)
            }
        }
    }

    /// Retries queued output on every valid connection.
    pub fn flush_all(&mut self) {
        let mut failed = Vec::new();
        for conn in self.clients.iter_mut() {
            if !conn.is_valid() || conn.queued_output() == 0 {
                continue;
            }
            if let Err(e) = conn.flush() {
                debug!("Flush to client {} failed: {}", conn.id, e);
                failed.push(conn.id);
            }
        }
        for id in failed {
            self.clients.mark_invalid(id, "send failed");
        }
    }
}
