//! Credential handshake record sent on [`crate::action::AUTH`].
//!
//! ```text
//! | mode: u8 | name_len: u8 | name | password_len: u8 | password |
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::{get_short_str, put_short_str, MAX_NAME_LEN};

pub const MAX_PASSWORD_LEN: usize = 64;
pub const MIN_NAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login = 0,
    Register = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub mode: AuthMode,
    pub name: String,
    pub password: String,
}

impl AuthRequest {
    pub fn login(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Login,
            name: name.into(),
            password: password.into(),
        }
    }

    pub fn register(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Register,
            name: name.into(),
            password: password.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = BytesMut::with_capacity(3 + self.name.len() + self.password.len());
        out.put_u8(self.mode as u8);
        put_short_str(&mut out, "name", &self.name, MAX_NAME_LEN)?;
        put_short_str(&mut out, "password", &self.password, MAX_PASSWORD_LEN)?;
        Ok(out.to_vec())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated("mode"));
        }
        let mode = match buf.get_u8() {
            0 => AuthMode::Login,
            1 => AuthMode::Register,
            other => return Err(ProtocolError::Payload(format!("unknown auth mode {other}"))),
        };
        let name = get_short_str(&mut buf, "name", MAX_NAME_LEN)?;
        let password = get_short_str(&mut buf, "password", MAX_PASSWORD_LEN)?;
        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(buf.remaining()));
        }
        Ok(Self {
            mode,
            name,
            password,
        })
    }

    /// Client-side sanity rules, mirrored by the server before it touches the store.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.chars().count() < MIN_NAME_LEN {
            return Err("Username too short");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err("Password too short");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let req = AuthRequest::register("alice", "hunter22");
        assert_eq!(AuthRequest::decode(&req.encode().unwrap()).unwrap(), req);
    }

    #[test]
    fn test_password_bound() {
        let req = AuthRequest::login("alice", "p".repeat(MAX_PASSWORD_LEN + 1));
        assert!(matches!(
            req.encode(),
            Err(ProtocolError::FieldTooLong { field: "password", .. })
        ));
    }

    #[test]
    fn test_unknown_mode() {
        assert!(matches!(
            AuthRequest::decode(&[7, 0, 0]),
            Err(ProtocolError::Payload(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert_eq!(AuthRequest::login("al", "secret").validate(), Err("Username too short"));
        assert_eq!(AuthRequest::login("alice", "abc").validate(), Err("Password too short"));
        assert!(AuthRequest::login("alice", "abcd").validate().is_ok());
    }
}
