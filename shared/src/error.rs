use thiserror::Error;

/// Violations of the wire contract.
///
/// Any of these is fatal to the connection that produced it: the server
/// tears the connection down without interpreting further bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("declared payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("field `{field}` is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("record truncated while reading `{0}`")]
    Truncated(&'static str),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("{0} unexpected trailing bytes after record")]
    TrailingBytes(usize),

    #[error("malformed payload: {0}")]
    Payload(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Payload(err.to_string())
    }
}
