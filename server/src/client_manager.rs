//! Connection table for the room server
//!
//! Connections live in a dense vector in accept order so the dispatcher can
//! drain them in table order. Player ids come from a separate free-list and
//! stay stable while the vector is compacted; an id only becomes reusable
//! once its slot has actually been reclaimed.
//!
//! Removal is always deferred: [`ClientTable::mark_invalid`] closes the
//! socket and records a [`Departure`], but the entry stays in the vector
//! until [`ClientTable::compact`] runs at the end of a loop iteration. Nothing
//! that happens while the table is being walked can shift it under the walker.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use log::{debug, info};
use shared::codec::{peek_header, try_decode};
use shared::{ChannelId, Decode, FrameFormat, Packet, PlayerId, ProtocolError, LOBBY_CHANNEL};

use crate::error::{DeliveryError, ServerError};
use crate::socket::Socket;

/// Display name of a connection that has not introduced itself yet.
pub const ANONYMOUS: &str = "Anonymous";

/// What a single read produced.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete packets in arrival order.
    pub packets: Vec<Packet>,
    /// The peer closed the stream or the read failed hard.
    pub disconnected: bool,
    /// Set when the buffered bytes broke the framing contract. Packets decoded
    /// before the offending frame are still in `packets`.
    pub violation: Option<ProtocolError>,
}

/// Left behind by [`ClientTable::mark_invalid`] so the owning room can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub player: PlayerId,
    pub room: ChannelId,
    /// Whether the connection was a room member when it went away.
    pub admitted: bool,
}

pub struct Connection {
    pub id: PlayerId,
    pub addr: SocketAddr,
    /// Distinguishes this connection from a later one that reuses `id`.
    pub session: u64,
    socket: Option<Box<dyn Socket>>,
    inbound: Vec<u8>,
    used: usize,
    pending_payload_len: usize,
    outbound: BytesMut,
    pub room: ChannelId,
    pub display_name: String,
    valid: bool,
    /// Member of `room`. False while a credential check is outstanding.
    pub admitted: bool,
    pub auth_in_flight: bool,
    /// Set by the wait step when the socket reported readiness.
    pub(crate) readable: bool,
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(
        id: PlayerId,
        session: u64,
        socket: Box<dyn Socket>,
        addr: SocketAddr,
        inbound_capacity: usize,
    ) -> Self {
        Self {
            id,
            addr,
            session,
            socket: Some(socket),
            inbound: vec![0; inbound_capacity],
            used: 0,
            pending_payload_len: 0,
            outbound: BytesMut::new(),
            room: LOBBY_CHANNEL,
            display_name: ANONYMOUS.to_string(),
            valid: true,
            admitted: false,
            auth_in_flight: false,
            readable: false,
            last_seen: Instant::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    pub fn is_anonymous(&self) -> bool {
        self.display_name == ANONYMOUS
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.used
    }

    /// Payload length of the frame whose header is already buffered, 0 while
    /// waiting for a header.
    pub fn pending_payload_len(&self) -> usize {
        self.pending_payload_len
    }

    pub fn queued_output(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub(crate) fn socket(&self) -> Option<&dyn Socket> {
        self.socket.as_deref()
    }

    /// Performs one non-blocking read into the free tail of the inbound
    /// buffer and decodes every complete frame now available.
    pub fn on_readable(&mut self, format: FrameFormat, max_payload: usize) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        self.readable = false;

        let Some(socket) = self.socket.as_deref() else {
            outcome.disconnected = true;
            return outcome;
        };

        let read = match socket.try_read(&mut self.inbound[self.used..]) {
            Ok(0) => {
                outcome.disconnected = true;
                return outcome;
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return outcome;
            }
            Err(e) => {
                debug!("Read from client {} failed: {}", self.id, e);
                outcome.disconnected = true;
                return outcome;
            }
        };
        self.used += read;
        self.last_seen = Instant::now();

        let mut offset = 0;
        loop {
            match try_decode(format, &self.inbound[offset..self.used], max_payload) {
                Ok(Decode::Packet(packet, consumed)) => {
                    offset += consumed;
                    outcome.packets.push(packet);
                }
                Ok(Decode::NeedMoreData) => break,
                Err(e) => {
                    outcome.violation = Some(e);
                    break;
                }
            }
        }

        if outcome.violation.is_some() {
            // Nothing after a broken frame can be trusted.
            self.used = 0;
            self.pending_payload_len = 0;
            return outcome;
        }

        self.inbound.copy_within(offset..self.used, 0);
        self.used -= offset;
        self.pending_payload_len = match peek_header(format, &self.inbound[..self.used], max_payload)
        {
            Ok(Some(header)) => header.payload_len,
            _ => 0,
        };
        outcome
    }

    /// Appends an encoded frame and pushes as much as the socket takes.
    pub(crate) fn queue(&mut self, frame: &[u8], limit: usize) -> Result<(), DeliveryError> {
        if !self.valid || self.socket.is_none() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.extend_from_slice(frame);
        self.flush()?;
        if self.outbound.len() > limit {
            return Err(DeliveryError::Backlog {
                queued: self.outbound.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Writes queued output until it is drained or the socket would block.
    pub(crate) fn flush(&mut self) -> Result<(), DeliveryError> {
        let Some(socket) = self.socket.as_deref() else {
            return Err(DeliveryError::Closed);
        };
        while !self.outbound.is_empty() {
            match socket.try_write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.is_some() {
            let _ = self.flush();
            self.socket = None;
            self.outbound.clear();
        }
    }
}

/// Manages every accepted connection.
pub struct ClientTable {
    connections: Vec<Connection>,
    index: HashMap<PlayerId, usize>,
    free_ids: BTreeSet<PlayerId>,
    next_id: PlayerId,
    next_session: u64,
    max_clients: usize,
    inbound_capacity: usize,
    departures: Vec<Departure>,
}

impl ClientTable {
    /// `inbound_capacity` must hold one maximum-size frame.
    pub fn new(max_clients: usize, inbound_capacity: usize) -> Self {
        Self {
            connections: Vec::with_capacity(max_clients),
            index: HashMap::new(),
            free_ids: BTreeSet::new(),
            next_id: 1,
            next_session: 1,
            max_clients,
            inbound_capacity,
            departures: Vec::new(),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Slots held by invalid connections count until the next compaction.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_clients
    }

    /// Registers a new connection in room 0, not yet admitted.
    ///
    /// On a full table the socket is dropped, which closes it; callers that
    /// want to send a rejection check [`ClientTable::is_full`] first.
    pub fn add_client(
        &mut self,
        socket: Box<dyn Socket>,
        addr: SocketAddr,
    ) -> Result<PlayerId, ServerError> {
        if self.is_full() {
            return Err(ServerError::ClientTableFull {
                max: self.max_clients,
            });
        }

        let id = match self.free_ids.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                id
            }
        };
        let session = self.next_session;
        self.next_session += 1;

        info!("Client {} connected from {}", id, addr);
        self.index.insert(id, self.connections.len());
        self.connections
            .push(Connection::new(id, session, socket, addr, self.inbound_capacity));
        Ok(id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Connection> {
        let slot = *self.index.get(&id)?;
        self.connections.get(slot)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Connection> {
        let slot = *self.index.get(&id)?;
        self.connections.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    /// Ids of every entry, valid or not, in table order.
    pub fn ids(&self) -> Vec<PlayerId> {
        self.connections.iter().map(|c| c.id).collect()
    }

    /// Valid, admitted connections currently assigned to `room`.
    pub fn members_of(&self, room: ChannelId) -> Vec<PlayerId> {
        self.connections
            .iter()
            .filter(|c| c.valid && c.admitted && c.room == room)
            .map(|c| c.id)
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<PlayerId> {
        self.connections
            .iter()
            .find(|c| c.valid && c.admitted && c.display_name == name)
            .map(|c| c.id)
    }

    /// Flags a connection for removal and closes its socket. Returns false
    /// if it was unknown or already invalid, so the close happens once.
    pub fn mark_invalid(&mut self, id: PlayerId, reason: &str) -> bool {
        let Some(conn) = self.get_mut(id) else {
            return false;
        };
        if !conn.valid {
            return false;
        }

        conn.valid = false;
        conn.close();
        let departure = Departure {
            player: conn.id,
            room: conn.room,
            admitted: conn.admitted,
        };
        info!("Client {} disconnected: {}", id, reason);
        self.departures.push(departure);
        true
    }

    /// Hands out departures recorded since the last call.
    pub fn take_departures(&mut self) -> Vec<Departure> {
        std::mem::take(&mut self.departures)
    }

    /// Points every valid connection in `from` at `to` and returns their ids
    /// in table order.
    pub fn reassign_room(&mut self, from: ChannelId, to: ChannelId) -> Vec<PlayerId> {
        let mut moved = Vec::new();
        for conn in self.connections.iter_mut().filter(|c| c.valid && c.room == from) {
            conn.room = to;
            moved.push(conn.id);
        }
        moved
    }

    /// Marks every connection silent for longer than `timeout` invalid.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .connections
            .iter()
            .filter(|c| c.valid && c.is_timed_out(timeout))
            .map(|c| c.id)
            .collect();

        for id in &timed_out {
            self.mark_invalid(*id, "idle timeout");
        }
        timed_out
    }

    /// Removes invalid entries, keeping survivors in their relative order,
    /// and releases their ids for reuse.
    pub fn compact(&mut self) -> Vec<PlayerId> {
        let removed: Vec<PlayerId> = self
            .connections
            .iter()
            .filter(|c| !c.valid)
            .map(|c| c.id)
            .collect();
        if removed.is_empty() {
            return removed;
        }

        self.connections.retain(|c| c.valid);
        self.free_ids.extend(removed.iter().copied());
        self.index = self
            .connections
            .iter()
            .enumerate()
            .map(|(slot, c)| (c.id, slot))
            .collect();
        removed
    }

    pub fn close_all(&mut self, reason: &str) {
        for id in self.ids() {
            self.mark_invalid(id, reason);
        }
    }

    /// Returns the number of entries, including those awaiting compaction
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
