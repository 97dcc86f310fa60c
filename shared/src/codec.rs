//! Frame codec shared by the server and the client.
//!
//! Two framings travel over the same byte streams:
//!
//! ```text
//! Routed          | channel: u16 | action: u8 | len: u16 | payload (len bytes) |
//! LengthPrefixed  | len: u16 | chat record (len bytes) |
//! ```
//!
//! All integers are big-endian. Both are "read a fixed header, then read
//! `len` more bytes verbatim", so a single resumable decoder handles both.
//! A length-prefixed frame surfaces as a [`Packet`] on channel 0 carrying
//! [`action::CHAT`], which lets the dispatcher route both variants the same way.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::{action, ChannelId, LOBBY_CHANNEL};

/// Size of the routed header: channel (2) + action (1) + length (2).
pub const ROUTED_HEADER_LEN: usize = 5;
/// Size of the length-prefixed header.
pub const PREFIX_HEADER_LEN: usize = 2;
/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    /// Generic room dispatcher framing.
    #[default]
    Routed,
    /// Chat-only framing: a bare length prefix in front of a chat record.
    LengthPrefixed,
}

impl FrameFormat {
    pub fn header_len(self) -> usize {
        match self {
            FrameFormat::Routed => ROUTED_HEADER_LEN,
            FrameFormat::LengthPrefixed => PREFIX_HEADER_LEN,
        }
    }

    /// Bytes a receive buffer needs to always hold one complete frame.
    pub fn max_frame_len(self, max_payload: usize) -> usize {
        self.header_len() + max_payload.min(MAX_PAYLOAD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: ChannelId,
    pub action: u8,
    pub payload_len: usize,
}

/// One complete unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: ChannelId,
    pub action: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(channel: ChannelId, action: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            action,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// A complete packet and the number of bytes it occupied.
    Packet(Packet, usize),
    /// Not enough bytes buffered yet; nothing was consumed.
    NeedMoreData,
}

/// Parses the header at the front of `buf` if it is complete.
///
/// The declared length is checked against `max_payload` here, before any
/// payload byte is requested.
pub fn peek_header(
    format: FrameFormat,
    buf: &[u8],
    max_payload: usize,
) -> Result<Option<FrameHeader>, ProtocolError> {
    if buf.len() < format.header_len() {
        return Ok(None);
    }

    let header = match format {
        FrameFormat::Routed => FrameHeader {
            channel: u16::from_be_bytes([buf[0], buf[1]]),
            action: buf[2],
            payload_len: u16::from_be_bytes([buf[3], buf[4]]) as usize,
        },
        FrameFormat::LengthPrefixed => FrameHeader {
            channel: LOBBY_CHANNEL,
            action: action::CHAT,
            payload_len: u16::from_be_bytes([buf[0], buf[1]]) as usize,
        },
    };

    if header.payload_len > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            len: header.payload_len,
            max: max_payload,
        });
    }

    Ok(Some(header))
}

/// Attempts to decode one packet from the front of `buf`.
///
/// Never mutates `buf`; on success the caller drops `consumed` bytes from the
/// front of its buffer and calls again.
pub fn try_decode(
    format: FrameFormat,
    buf: &[u8],
    max_payload: usize,
) -> Result<Decode, ProtocolError> {
    let header = match peek_header(format, buf, max_payload)? {
        Some(header) => header,
        None => return Ok(Decode::NeedMoreData),
    };

    let start = format.header_len();
    let end = start + header.payload_len;
    if buf.len() < end {
        return Ok(Decode::NeedMoreData);
    }

    let packet = Packet {
        channel: header.channel,
        action: header.action,
        payload: buf[start..end].to_vec(),
    };
    Ok(Decode::Packet(packet, end))
}

/// Serializes a packet with the same framing [`try_decode`] expects.
///
/// In the length-prefixed format the channel and action are implied and
/// therefore not written.
pub fn encode(
    format: FrameFormat,
    packet: &Packet,
    max_payload: usize,
) -> Result<Bytes, ProtocolError> {
    let len = packet.payload.len();
    let limit = max_payload.min(MAX_PAYLOAD);
    if len > limit {
        return Err(ProtocolError::PayloadTooLarge { len, max: limit });
    }

    let mut out = BytesMut::with_capacity(format.header_len() + len);
    if format == FrameFormat::Routed {
        out.put_u16(packet.channel);
        out.put_u8(packet.action);
    }
    out.put_u16(len as u16);
    out.put_slice(&packet.payload);
    Ok(out.freeze())
}
