use clap::Parser;
use client::host::{auth_mode, HostedServer};
use client::input::{render, Composer, Line};
use client::network::{ChatClient, ServerEvent};
use log::{debug, info, warn};
use server::config::{Mode, ServerConfig};
use server::credentials::{CredentialStore, InMemoryCredentialStore};
use server::rooms::CHAT_CHANNEL;
use shared::auth::AuthMode;
use shared::history::DEFAULT_HISTORY;
use shared::{ChatHistory, MessageType};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Name shown to other users
    #[arg(short = 'n', long)]
    name: String,

    /// Wire format and room layout of the server
    #[arg(short = 'm', long, value_enum, default_value = "chat")]
    mode: Mode,

    /// Log in with this password (lobby mode)
    #[arg(long)]
    password: Option<String>,

    /// Register the name instead of logging in (implied by --host)
    #[arg(long, requires = "password")]
    register: bool,

    /// Start a server on the --server address and join it
    #[arg(long)]
    host: bool,

    /// Messages kept for /history
    #[arg(long, default_value_t = DEFAULT_HISTORY)]
    history: usize,
}

/// Reads stdin on a plain thread: a blocking read cannot be cancelled, and
/// it must not keep the runtime alive at exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let hosted = if args.host {
        let config = ServerConfig {
            host: args.server.ip().to_string(),
            port: args.server.port(),
            history: args.history,
            ..ServerConfig::default()
        };
        // Whoever hosts with a password gets a fresh account store
        let credentials = args
            .password
            .as_ref()
            .map(|_| Arc::new(InMemoryCredentialStore::new()) as Arc<dyn CredentialStore>);
        Some(HostedServer::spawn(config, args.mode, credentials).await?)
    } else {
        None
    };
    let addr = hosted.as_ref().map_or(args.server, HostedServer::addr);

    info!("Connecting to: {}", addr);
    let mut client = ChatClient::connect(addr, args.mode.frame_format()).await?;

    let lobby = args.mode == Mode::Lobby;
    let mut joined = false;
    match &args.password {
        Some(password) => match auth_mode(args.host, args.register) {
            AuthMode::Register => client.register(&args.name, password).await?,
            AuthMode::Login => client.login(&args.name, password).await?,
        },
        None if lobby => {
            client.join(CHAT_CHANNEL).await?;
            joined = true;
        }
        None => {}
    }

    let mut composer = Composer::new(&args.name);
    let mut history = ChatHistory::new(args.history);
    let mut lines = spawn_stdin_reader();
    println!("{}", composer.prompt());

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match composer.compose(&line) {
                    Line::Empty => {}
                    Line::Target(_) => println!("{}", composer.prompt()),
                    Line::ShowHistory => {
                        for message in history.replay() {
                            println!("{}", render(message, composer.name()));
                        }
                    }
                    Line::Send(message) => {
                        client.send_message(&message).await?;
                        // Broadcasts are not echoed back to their sender
                        if message.kind == MessageType::Broadcast {
                            history.record(message);
                        }
                    }
                }
            }
            event = client.recv_event() => match event? {
                Some(ServerEvent::Chat(message)) => {
                    println!("{}", render(&message, composer.name()));
                    if matches!(message.kind, MessageType::Broadcast | MessageType::Whisper) {
                        history.record(message);
                    }
                }
                Some(ServerEvent::Notice(text)) => {
                    println!("[Server] {}", text);
                    if lobby && !joined && text.starts_with("Welcome") {
                        client.join(CHAT_CHANNEL).await?;
                        joined = true;
                    }
                }
                Some(ServerEvent::Other(packet)) => {
                    debug!("Ignoring action {} on channel {}", packet.action, packet.channel);
                }
                None => {
                    warn!("Server closed the connection");
                    break;
                }
            }
        }
    }

    if let Some(hosted) = hosted {
        tokio::task::spawn_blocking(move || hosted.shutdown()).await?;
    }
    Ok(())
}
