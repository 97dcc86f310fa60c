//! Chat message record.
//!
//! ```text
//! | type: u8 | sender_len: u8 | sender | target_len: u8 | target | text_len: u16 | text |
//! ```
//!
//! Every string carries its own length and is checked against its bound on
//! both encode and decode, so a hostile length can never spill into the next
//! field.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_TEXT_LEN: usize = 1024;

/// Name the server uses for its own responses.
pub const SERVER_NAME: &str = "Server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Broadcast = 0,
    Whisper = 1,
    Command = 2,
    CommandResponse = 3,
    UserCount = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Broadcast,
            1 => MessageType::Whisper,
            2 => MessageType::Command,
            3 => MessageType::CommandResponse,
            4 => MessageType::UserCount,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub sender: String,
    /// Empty means everyone.
    pub target: String,
    pub text: String,
}

impl Message {
    pub fn broadcast(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Broadcast,
            sender: sender.into(),
            target: String::new(),
            text: text.into(),
        }
    }

    pub fn whisper(
        sender: impl Into<String>,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageType::Whisper,
            sender: sender.into(),
            target: target.into(),
            text: text.into(),
        }
    }

    pub fn command(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Command,
            sender: sender.into(),
            target: String::new(),
            text: text.into(),
        }
    }

    /// A private reply from the server.
    pub fn response(text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::CommandResponse,
            sender: SERVER_NAME.to_string(),
            target: String::new(),
            text: text.into(),
        }
    }

    pub fn user_count(count: usize) -> Self {
        Self {
            kind: MessageType::UserCount,
            sender: SERVER_NAME.to_string(),
            target: String::new(),
            text: count.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = BytesMut::with_capacity(
            5 + self.sender.len() + self.target.len() + self.text.len(),
        );
        out.put_u8(self.kind as u8);
        put_short_str(&mut out, "sender", &self.sender, MAX_NAME_LEN)?;
        put_short_str(&mut out, "target", &self.target, MAX_NAME_LEN)?;
        put_long_str(&mut out, "text", &self.text, MAX_TEXT_LEN)?;
        Ok(out.to_vec())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated("type"));
        }
        let kind = MessageType::try_from(buf.get_u8())?;
        let sender = get_short_str(&mut buf, "sender", MAX_NAME_LEN)?;
        let target = get_short_str(&mut buf, "target", MAX_NAME_LEN)?;
        let text = get_long_str(&mut buf, "text", MAX_TEXT_LEN)?;
        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            kind,
            sender,
            target,
            text,
        })
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ProtocolError> {
    if value.len() > max {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Writes a string with a one byte length prefix.
pub(crate) fn put_short_str(
    out: &mut BytesMut,
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ProtocolError> {
    check_len(field, value, max.min(u8::MAX as usize))?;
    out.put_u8(value.len() as u8);
    out.put_slice(value.as_bytes());
    Ok(())
}

/// Writes a string with a two byte length prefix.
pub(crate) fn put_long_str(
    out: &mut BytesMut,
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ProtocolError> {
    check_len(field, value, max.min(u16::MAX as usize))?;
    out.put_u16(value.len() as u16);
    out.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn get_short_str(
    buf: &mut &[u8],
    field: &'static str,
    max: usize,
) -> Result<String, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u8() as usize;
    take_str(buf, field, len, max)
}

pub(crate) fn get_long_str(
    buf: &mut &[u8],
    field: &'static str,
    max: usize,
) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    take_str(buf, field, len, max)
}

fn take_str(
    buf: &mut &[u8],
    field: &'static str,
    len: usize,
    max: usize,
) -> Result<String, ProtocolError> {
    if len > max {
        return Err(ProtocolError::FieldTooLong { field, len, max });
    }
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    let raw = &buf[..len];
    let value = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(value)
}
