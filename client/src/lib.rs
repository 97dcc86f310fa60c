//! # Chat Client Library
//!
//! Client side of the room server: a framed TCP connection, line composition
//! and rendering, and an optional in-process server for hosting a session.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::ChatClient`] speaks either wire format:
//! - Length-prefixed chat records for a chat-mode server
//! - Routed frames for a lobby-mode server, including login and room joins
//! - Partial reads stay buffered, so `recv` can sit in a `select!`
//!
//! ### Input Module (`input`)
//! Turns typed lines into chat records:
//! - Plain lines are broadcasts
//! - `/whisper <name>` addresses the next line to one user
//! - Other `/` lines are server commands
//!
//! ### Host Module (`host`)
//! Runs a server on a separate OS thread with its own runtime, so one
//! process can host a session and join it.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::{render, Composer, Line};
//! use client::network::ChatClient;
//! use shared::FrameFormat;
//!
//! # async fn demo() -> Result<(), client::network::ClientError> {
//! let mut client = ChatClient::connect("127.0.0.1:8080", FrameFormat::LengthPrefixed).await?;
//! let mut composer = Composer::new("alice");
//!
//! if let Line::Send(message) = composer.compose("hello everyone") {
//!     client.send_message(&message).await?;
//! }
//! while let Some(message) = client.recv_message().await? {
//!     println!("{}", render(&message, composer.name()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod host;
pub mod input;
pub mod network;
