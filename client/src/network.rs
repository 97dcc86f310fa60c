//! TCP connection to a room server.

use bytes::{Buf, BytesMut};
use log::{debug, trace};
use shared::auth::AuthRequest;
use shared::codec::{encode, try_decode, MAX_PAYLOAD};
use shared::{action, ChannelId, Decode, FrameFormat, Message, Packet, ProtocolError, LOBBY_CHANNEL};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Credentials(&'static str),

    #[error("login needs routed framing")]
    LoginUnsupported,

    #[error("could not host a server: {0}")]
    Host(String),
}

/// Something the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Chat(Message),
    /// Plain text from the server itself (rejections, login results).
    Notice(String),
    /// Any other packet, for room modules the client has no view of.
    Other(Packet),
}

pub struct ChatClient {
    stream: TcpStream,
    format: FrameFormat,
    buffer: BytesMut,
    /// Room outgoing chat records are addressed to.
    channel: ChannelId,
}

impl ChatClient {
    pub async fn connect(addr: impl ToSocketAddrs, format: FrameFormat) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", stream.peer_addr()?);
        Ok(Self {
            stream,
            format,
            buffer: BytesMut::with_capacity(format.max_frame_len(MAX_PAYLOAD)),
            channel: LOBBY_CHANNEL,
        })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream.peer_addr()?)
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let frame = encode(self.format, packet, MAX_PAYLOAD)?;
        trace!(
            "Sending action {} on channel {} ({} bytes)",
            packet.action,
            packet.channel,
            frame.len()
        );
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), ClientError> {
        let packet = Packet::new(self.channel, action::CHAT, message.encode()?);
        self.send_packet(&packet).await
    }

    /// Moves to another room. Later chat records go there.
    pub async fn join(&mut self, channel: ChannelId) -> Result<(), ClientError> {
        self.send_packet(&Packet::new(channel, action::JOIN, Vec::new()))
            .await?;
        self.channel = channel;
        Ok(())
    }

    pub async fn login(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate(AuthRequest::login(name, password)).await
    }

    pub async fn register(&mut self, name: &str, password: &str) -> Result<(), ClientError> {
        self.authenticate(AuthRequest::register(name, password))
            .await
    }

    /// Sends the request; the verdict arrives later as a [`ServerEvent::Notice`].
    async fn authenticate(&mut self, request: AuthRequest) -> Result<(), ClientError> {
        if self.format != FrameFormat::Routed {
            return Err(ClientError::LoginUnsupported);
        }
        request.validate().map_err(ClientError::Credentials)?;
        let packet = Packet::new(LOBBY_CHANNEL, action::AUTH, request.encode()?);
        self.send_packet(&packet).await
    }

    /// Waits for the next complete packet. `None` once the server hung up.
    ///
    /// Cancel safe: bytes read before a cancellation stay buffered.
    pub async fn recv(&mut self) -> Result<Option<Packet>, ClientError> {
        loop {
            if let Decode::Packet(packet, consumed) =
                try_decode(self.format, &self.buffer, MAX_PAYLOAD)?
            {
                self.buffer.advance(consumed);
                return Ok(Some(packet));
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if !self.buffer.is_empty() {
                    debug!("Server closed with {} bytes of a partial frame", self.buffer.len());
                }
                return Ok(None);
            }
        }
    }

    pub async fn recv_event(&mut self) -> Result<Option<ServerEvent>, ClientError> {
        let Some(packet) = self.recv().await? else {
            return Ok(None);
        };
        let event = match packet.action {
            action::CHAT => ServerEvent::Chat(Message::decode(&packet.payload)?),
            action::NOTICE => {
                ServerEvent::Notice(String::from_utf8_lossy(&packet.payload).into_owned())
            }
            _ => ServerEvent::Other(packet),
        };
        Ok(Some(event))
    }

    /// Next chat record, skipping everything else.
    pub async fn recv_message(&mut self) -> Result<Option<Message>, ClientError> {
        while let Some(event) = self.recv_event().await? {
            if let ServerEvent::Chat(message) = event {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
