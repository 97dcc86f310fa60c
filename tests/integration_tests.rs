//! Integration tests over real loopback TCP
//!
//! Every test hosts its own server on an ephemeral port and talks to it with
//! the client library or with raw sockets.

use assert_approx_eq::assert_approx_eq;
use client::host::HostedServer;
use client::network::{ChatClient, ServerEvent};
use server::config::{Mode, ServerConfig};
use server::credentials::{CredentialStore, InMemoryCredentialStore};
use server::rooms::CHAT_CHANNEL;
use shared::lobby::{
    decode_payload, encode_payload, PlayerLeft, PlayerPosition, Position, ZoneEntered,
};
use shared::{action, Message, MessageType, Packet, LOBBY_CHANNEL};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn config() -> ServerConfig {
    ServerConfig {
        port: 0,
        tick: Duration::from_millis(5),
        ..ServerConfig::default()
    }
}

async fn host(config: ServerConfig, mode: Mode) -> HostedServer {
    HostedServer::spawn(config, mode, None).await.unwrap()
}

async fn stop(server: HostedServer) {
    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .unwrap();
}

async fn connect(server: &HostedServer, mode: Mode) -> ChatClient {
    ChatClient::connect(server.addr(), mode.frame_format())
        .await
        .unwrap()
}

async fn next_message(client: &mut ChatClient) -> Message {
    timeout(PATIENCE, client.recv_message())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
        .expect("server closed the connection")
}

async fn next_event(client: &mut ChatClient) -> ServerEvent {
    timeout(PATIENCE, client.recv_event())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
        .expect("server closed the connection")
}

/// Skips ahead to the user count update announcing `count` users.
async fn expect_user_count(client: &mut ChatClient, count: usize) {
    loop {
        let message = next_message(client).await;
        if message.kind == MessageType::UserCount && message.text == count.to_string() {
            return;
        }
    }
}

async fn expect_silence(client: &mut ChatClient) {
    if let Ok(event) = timeout(QUIET, client.recv_event()).await {
        panic!("expected nothing, got {:?}", event);
    }
}

/// CHAT ROOM TESTS
mod chat_tests {
    use super::*;

    /// Three clients in one room: a broadcast reaches the other two only
    #[tokio::test]
    async fn broadcast_reaches_everyone_but_sender() {
        let server = host(config(), Mode::Chat).await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;
        let mut b = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 2).await;
        expect_user_count(&mut b, 2).await;
        let mut c = connect(&server, Mode::Chat).await;
        for client in [&mut a, &mut b, &mut c] {
            expect_user_count(client, 3).await;
        }

        a.send_message(&Message::broadcast("alice", "hi"))
            .await
            .unwrap();
        for client in [&mut b, &mut c] {
            assert_eq!(
                next_message(client).await,
                Message::broadcast("alice", "hi")
            );
        }
        expect_silence(&mut a).await;

        drop(c);
        expect_user_count(&mut a, 2).await;
        expect_user_count(&mut b, 2).await;

        stop(server).await;
    }

    /// Newcomers get the recent history, oldest first, before the user count
    #[tokio::test]
    async fn history_replayed_in_order() {
        let server = host(config(), Mode::Chat).await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;
        for text in ["one", "two", "three"] {
            a.send_message(&Message::broadcast("alice", text))
                .await
                .unwrap();
        }
        // The reply proves the broadcasts before it were handled
        a.send_message(&Message::command("alice", "/list"))
            .await
            .unwrap();
        let listing = next_message(&mut a).await;
        assert_eq!(listing.kind, MessageType::CommandResponse);
        assert_eq!(listing.text, "Users online (1): alice");

        let mut b = connect(&server, Mode::Chat).await;
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(next_message(&mut b).await);
        }
        let texts: Vec<&str> = received.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", "2"]);
        assert!(received[..3].iter().all(|m| m.sender == "alice"));

        stop(server).await;
    }

    /// A whisper reaches its target and echoes to the sender, nobody else
    #[tokio::test]
    async fn whisper_is_private() {
        let server = host(config(), Mode::Chat).await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;
        let mut b = connect(&server, Mode::Chat).await;
        expect_user_count(&mut b, 2).await;
        let mut c = connect(&server, Mode::Chat).await;
        for client in [&mut a, &mut b, &mut c] {
            expect_user_count(client, 3).await;
        }

        // First messages introduce the names
        a.send_message(&Message::broadcast("alice", "i am alice"))
            .await
            .unwrap();
        next_message(&mut b).await;
        next_message(&mut c).await;
        b.send_message(&Message::broadcast("bob", "i am bob"))
            .await
            .unwrap();
        next_message(&mut a).await;
        next_message(&mut c).await;

        let whisper = Message::whisper("alice", "bob", "psst");
        a.send_message(&whisper).await.unwrap();
        assert_eq!(next_message(&mut b).await, whisper);
        assert_eq!(next_message(&mut a).await, whisper);
        expect_silence(&mut c).await;

        a.send_message(&Message::whisper("alice", "nobody", "hello?"))
            .await
            .unwrap();
        assert_eq!(
            next_message(&mut a).await,
            Message::response("User not found")
        );

        stop(server).await;
    }

    /// /quit says goodbye and closes the connection
    #[tokio::test]
    async fn quit_closes_connection() {
        let server = host(config(), Mode::Chat).await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;
        a.send_message(&Message::command("alice", "/quit"))
            .await
            .unwrap();
        assert_eq!(next_message(&mut a).await, Message::response("Goodbye"));

        let end = timeout(PATIENCE, a.recv()).await.unwrap();
        assert!(matches!(end, Ok(None) | Err(_)));

        stop(server).await;
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// A full table answers with a notice and hangs up
    #[tokio::test]
    async fn server_full_rejects_with_notice() {
        let server = host(
            ServerConfig {
                max_clients: 1,
                ..config()
            },
            Mode::Chat,
        )
        .await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;

        let mut b = connect(&server, Mode::Chat).await;
        let rejection = next_message(&mut b).await;
        assert_eq!(rejection.kind, MessageType::CommandResponse);
        assert_eq!(rejection.text, "Server full, try again later");
        let end = timeout(PATIENCE, b.recv()).await.unwrap();
        assert!(matches!(end, Ok(None) | Err(_)));

        // The admitted client is untouched
        a.send_message(&Message::command("alice", "/list"))
            .await
            .unwrap();
        assert_eq!(next_message(&mut a).await.text, "Users online (1): alice");

        stop(server).await;
    }

    /// A frame declaring too large a payload closes only its sender
    #[tokio::test]
    async fn oversized_frame_closes_only_offender() {
        let server = host(
            ServerConfig {
                max_payload: 64,
                ..config()
            },
            Mode::Chat,
        )
        .await;

        let mut a = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 1).await;
        let mut b = connect(&server, Mode::Chat).await;
        expect_user_count(&mut a, 2).await;
        expect_user_count(&mut b, 2).await;

        let mut rogue = TcpStream::connect(server.addr()).await.unwrap();
        expect_user_count(&mut a, 3).await;
        expect_user_count(&mut b, 3).await;
        rogue.write_all(&1000u16.to_be_bytes()).await.unwrap();

        // Whatever was queued before the close, the stream ends
        let mut sink = Vec::new();
        let closed = timeout(PATIENCE, rogue.read_to_end(&mut sink)).await;
        assert!(closed.is_ok());

        expect_user_count(&mut a, 2).await;
        expect_user_count(&mut b, 2).await;
        a.send_message(&Message::broadcast("alice", "still here"))
            .await
            .unwrap();
        assert_eq!(next_message(&mut b).await.text, "still here");

        stop(server).await;
    }
}

/// LOBBY TESTS
mod lobby_tests {
    use super::*;

    fn position(packet: &Packet) -> Option<PlayerPosition> {
        (packet.action == action::MOVE)
            .then(|| decode_payload(&packet.payload).ok())
            .flatten()
    }

    async fn next_position(client: &mut ChatClient) -> PlayerPosition {
        loop {
            if let ServerEvent::Other(packet) = next_event(client).await {
                if let Some(pos) = position(&packet) {
                    return pos;
                }
            }
        }
    }

    /// Moves fan out to the other players of the lobby
    #[tokio::test]
    async fn move_fans_out() {
        let server = host(config(), Mode::Lobby).await;

        let mut a = connect(&server, Mode::Lobby).await;
        let a_spawn = next_position(&mut a).await;
        let a_id = a_spawn.player;

        let mut b = connect(&server, Mode::Lobby).await;
        let mut seen = vec![next_position(&mut b).await, next_position(&mut b).await];
        seen.sort_by_key(|p| p.player);
        assert_eq!(seen[0].player, a_id);
        let b_id = seen[1].player;
        assert_eq!(next_position(&mut a).await.player, b_id);

        let step = encode_payload(&Position { x: 5.0, y: -7.5 }).unwrap();
        a.send_packet(&Packet::new(LOBBY_CHANNEL, action::MOVE, step))
            .await
            .unwrap();

        let update = next_position(&mut b).await;
        assert_eq!(update.player, a_id);
        assert_approx_eq!(update.x, 5.0);
        assert_approx_eq!(update.y, -7.5);
        expect_silence(&mut a).await;

        stop(server).await;
    }

    /// Walking into the chat zone tells the player where it leads
    #[tokio::test]
    async fn zone_entry_is_announced() {
        let server = host(config(), Mode::Lobby).await;

        let mut a = connect(&server, Mode::Lobby).await;
        next_position(&mut a).await;

        let step = encode_payload(&Position { x: 630.0, y: -120.0 }).unwrap();
        a.send_packet(&Packet::new(LOBBY_CHANNEL, action::MOVE, step))
            .await
            .unwrap();

        let entered = loop {
            if let ServerEvent::Other(packet) = next_event(&mut a).await {
                if packet.action == action::ZONE_ENTERED {
                    break decode_payload::<ZoneEntered>(&packet.payload).unwrap();
                }
            }
        };
        assert_eq!(
            entered,
            ZoneEntered {
                room: CHAT_CHANNEL,
                name: "chat".to_string()
            }
        );

        // Standing still in the zone does not repeat the notice
        expect_silence(&mut a).await;

        stop(server).await;
    }

    /// Joining the chat channel takes a player out of the lobby
    #[tokio::test]
    async fn joining_chat_leaves_lobby() {
        let server = host(config(), Mode::Lobby).await;

        let mut a = connect(&server, Mode::Lobby).await;
        let a_id = next_position(&mut a).await.player;
        let mut b = connect(&server, Mode::Lobby).await;
        next_position(&mut b).await;
        next_position(&mut b).await;
        next_position(&mut a).await;

        a.join(CHAT_CHANNEL).await.unwrap();
        assert_eq!(next_message(&mut a).await, Message::user_count(1));

        let left = loop {
            if let ServerEvent::Other(packet) = next_event(&mut b).await {
                if packet.action == action::PLAYER_LEFT {
                    break decode_payload::<PlayerLeft>(&packet.payload).unwrap();
                }
            }
        };
        assert_eq!(left, PlayerLeft { player: a_id });

        stop(server).await;
    }
}

/// LOGIN TESTS
mod auth_tests {
    use super::*;

    async fn host_with_accounts() -> HostedServer {
        let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
        HostedServer::spawn(config(), Mode::Lobby, Some(store))
            .await
            .unwrap()
    }

    async fn next_notice(client: &mut ChatClient) -> String {
        loop {
            if let ServerEvent::Notice(text) = next_event(client).await {
                return text;
            }
        }
    }

    /// Registered users chat under the name they logged in with
    #[tokio::test]
    async fn register_then_chat() {
        let server = host_with_accounts().await;

        let mut a = connect(&server, Mode::Lobby).await;
        assert_eq!(next_notice(&mut a).await, "Please log in or register");
        a.register("alice", "secret").await.unwrap();
        assert_eq!(next_notice(&mut a).await, "Welcome, alice");
        a.join(CHAT_CHANNEL).await.unwrap();
        expect_user_count(&mut a, 1).await;

        let mut b = connect(&server, Mode::Lobby).await;
        assert_eq!(next_notice(&mut b).await, "Please log in or register");
        b.register("bob", "hunter2").await.unwrap();
        assert_eq!(next_notice(&mut b).await, "Welcome, bob");
        b.join(CHAT_CHANNEL).await.unwrap();
        expect_user_count(&mut a, 2).await;
        expect_user_count(&mut b, 2).await;

        a.send_message(&Message::broadcast("mallory", "hello bob"))
            .await
            .unwrap();
        assert_eq!(
            next_message(&mut b).await,
            Message::broadcast("alice", "hello bob")
        );

        stop(server).await;
    }

    /// Failed logins leave the connection open for another try
    #[tokio::test]
    async fn rejected_login_can_retry() {
        let server = host_with_accounts().await;

        let mut a = connect(&server, Mode::Lobby).await;
        assert_eq!(next_notice(&mut a).await, "Please log in or register");
        a.login("carol", "secret").await.unwrap();
        assert_eq!(next_notice(&mut a).await, "User does not exist");

        a.register("carol", "secret").await.unwrap();
        assert_eq!(next_notice(&mut a).await, "Welcome, carol");
        a.close().await.unwrap();

        let mut b = connect(&server, Mode::Lobby).await;
        assert_eq!(next_notice(&mut b).await, "Please log in or register");
        b.login("carol", "wrong").await.unwrap();
        assert_eq!(next_notice(&mut b).await, "Wrong password");
        b.login("carol", "secret").await.unwrap();
        assert_eq!(next_notice(&mut b).await, "Welcome, carol");

        stop(server).await;
    }
}
