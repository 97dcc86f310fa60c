//! Performance benchmarks for the hot paths of the room server

use client::host::HostedServer;
use client::network::ChatClient;
use server::config::{Mode, ServerConfig};
use shared::codec::{encode, try_decode, MAX_PAYLOAD};
use shared::{action, ChatHistory, Decode, FrameFormat, Message, MessageType, Packet};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Benchmarks routed frame encoding and decoding
#[test]
fn benchmark_frame_codec() {
    let packet = Packet::new(3, action::MOVE, vec![7u8; 64]);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let frame = encode(FrameFormat::Routed, &packet, MAX_PAYLOAD).unwrap();
        match try_decode(FrameFormat::Routed, &frame, MAX_PAYLOAD).unwrap() {
            Decode::Packet(decoded, consumed) => {
                assert_eq!(consumed, frame.len());
                assert_eq!(decoded.payload.len(), 64);
            }
            Decode::NeedMoreData => panic!("complete frame reported as partial"),
        }
    }

    let duration = start.elapsed();
    println!(
        "Frame codec: {} round trips in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks decoding a buffer packed with many small frames
#[test]
fn benchmark_decode_stream() {
    let mut stream = Vec::new();
    for i in 0..10_000u32 {
        let text = format!("message number {}", i);
        let record = Message::broadcast("alice", text).encode().unwrap();
        let frame = encode(
            FrameFormat::LengthPrefixed,
            &Packet::new(0, action::CHAT, record),
            MAX_PAYLOAD,
        )
        .unwrap();
        stream.extend_from_slice(&frame);
    }

    let start = Instant::now();
    let mut rest = &stream[..];
    let mut count = 0;
    while let Ok(Decode::Packet(packet, consumed)) =
        try_decode(FrameFormat::LengthPrefixed, rest, MAX_PAYLOAD)
    {
        let message = Message::decode(&packet.payload).unwrap();
        assert_eq!(message.kind, MessageType::Broadcast);
        rest = &rest[consumed..];
        count += 1;
    }

    let duration = start.elapsed();
    println!(
        "Stream decode: {} frames ({} bytes) in {:?}",
        count,
        stream.len(),
        duration
    );

    assert_eq!(count, 10_000);
    assert!(rest.is_empty());
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the history ring under constant overwrite
#[test]
fn benchmark_history_ring() {
    let mut history = ChatHistory::new(8);
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        history.record(Message::broadcast("alice", i.to_string()));
    }

    let duration = start.elapsed();
    println!("History ring: {} records in {:?}", iterations, duration);

    let last: Vec<String> = history.replay().map(|m| m.text.clone()).collect();
    assert_eq!(last.len(), 8);
    assert_eq!(last[7], (iterations - 1).to_string());
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a broadcast fanning out to many connected clients
#[tokio::test]
async fn benchmark_broadcast_fan_out() {
    let config = ServerConfig {
        port: 0,
        tick: Duration::from_millis(5),
        ..ServerConfig::default()
    };
    let server = HostedServer::spawn(config, Mode::Chat, None).await.unwrap();

    let listeners = 32;
    let mut clients = Vec::with_capacity(listeners);
    for n in 1..=listeners {
        let mut client = ChatClient::connect(server.addr(), Mode::Chat.frame_format())
            .await
            .unwrap();
        // Wait until the server has seen this client join
        loop {
            let message = client.recv_message().await.unwrap().unwrap();
            if message.kind == MessageType::UserCount && message.text == n.to_string() {
                break;
            }
        }
        clients.push(client);
    }
    let mut sender = ChatClient::connect(server.addr(), Mode::Chat.frame_format())
        .await
        .unwrap();

    let rounds = 20;
    let start = Instant::now();
    for round in 0..rounds {
        sender
            .send_message(&Message::broadcast("sender", format!("round {}", round)))
            .await
            .unwrap();
    }

    for client in &mut clients {
        let mut received = 0;
        while received < rounds {
            let message = timeout(Duration::from_secs(10), client.recv_message())
                .await
                .expect("fan-out stalled")
                .unwrap()
                .unwrap();
            if message.kind == MessageType::Broadcast {
                received += 1;
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Broadcast fan-out: {} messages to {} clients in {:?}",
        rounds, listeners, duration
    );

    // Should complete in under 10 seconds
    assert!(duration.as_secs() < 10);

    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .unwrap();
}
