//! # Room Server Library
//!
//! A multiplexed TCP server that routes framed packets to pluggable "rooms"
//! (chat channels, a lobby world, or any other [`room::RoomModule`]) and fans
//! their replies back out to one, several, or all participants.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Every accepted client gets a slot in the [`client_manager::ClientTable`]:
//! - Partial reads are buffered until a whole frame is available
//! - Oversized or malformed frames close that one connection
//! - A full table answers new clients with a short notice before closing
//!
//! ### Room Dispatch
//! Each packet names a channel. Packets for the sender's current room go to
//! that room's logic; a `JOIN` on another active channel moves the sender
//! there. Rooms get a tick every loop iteration whether or not anyone spoke.
//!
//! ### Delivery
//! Rooms answer through a [`room::RoomContext`]. A recipient whose socket
//! fails, or who stops reading, is dropped without disturbing anyone else.
//!
//! ## Architecture Design
//!
//! ### Single-Task Event Loop
//! [`network::Server`] owns every table and runs all room logic on one task.
//! No room ever needs a lock, and a connection is never removed while the
//! table is being walked: removals are deferred to the end of the iteration.
//!
//! ### Credential Checks Off the Loop
//! With a [`credentials::CredentialStore`] configured, new connections must
//! log in before joining room 0. The check runs on tokio's blocking pool and
//! reports back through a channel the loop polls while waiting.
//!
//! ### Failure Containment
//! A panic inside a room callback is caught. A regular room is closed and its
//! players are sent back to room 0; room 0 itself is recreated.
//!
//! ## Module Organization
//!
//! - [`config`]: process configuration and the chat/lobby modes
//! - [`socket`]: the non-blocking stream abstraction the loop polls
//! - [`client_manager`]: connection slots, read buffers and deferred removal
//! - [`delivery`]: broadcast and unicast with per-recipient isolation
//! - [`room`]: the room module contract
//! - [`registry`]: the bounded room table
//! - [`credentials`]: login and registration
//! - [`rooms`]: the bundled chat channel and lobby world
//! - [`network`]: the dispatcher loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{Mode, ServerConfig};
//! use server::network::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Chat mode: length-prefixed chat records, room 0 is a chat channel
//!     let mut server = Server::from_mode(config, Mode::Chat, None).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod network;
pub mod registry;
pub mod room;
pub mod rooms;
pub mod socket;

pub use error::{CredentialError, DeliveryError, ServerError};
