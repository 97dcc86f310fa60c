//! Payloads of the lobby world room. Module-defined, so they travel as
//! bincode inside routed frames.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::{ChannelId, PlayerId};

/// Where a player appears when joining the lobby.
pub const SPAWN: Position = Position { x: 0.0, y: 250.0 };
pub const PLAYER_RADIUS: f32 = 20.0;

/// Body of a client `MOVE`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Body of a server `MOVE`: someone else's position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub player: PlayerId,
    pub x: f32,
    pub y: f32,
}

/// Body of `ZONE_ENTERED`: the player walked into a trigger zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEntered {
    pub room: ChannelId,
    pub name: String,
}

/// Body of `PLAYER_LEFT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub player: PlayerId,
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(value)?)
}

pub fn decode_payload<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_position_is_two_floats() {
        let bytes = encode_payload(&Position { x: 1.5, y: -2.0 }).unwrap();
        assert_eq!(bytes.len(), 8);
        let back: Position = decode_payload(&bytes).unwrap();
        assert_approx_eq!(back.x, 1.5);
        assert_approx_eq!(back.y, -2.0);
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let result: Result<Position, _> = decode_payload(&[0, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::Payload(_))));
    }

    #[test]
    fn test_zone_entered_payload() {
        let zone = ZoneEntered {
            room: 2,
            name: "tetris".into(),
        };
        let back: ZoneEntered = decode_payload(&encode_payload(&zone).unwrap()).unwrap();
        assert_eq!(back, zone);
    }
}
