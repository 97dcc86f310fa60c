use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use server::config::{Mode, ServerConfig};
use server::credentials::{CredentialStore, InMemoryCredentialStore};
use server::network::Server;

/// Parses command-line arguments, binds the listener and runs the room loop
/// until Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Listen on every interface instead of the given host
        #[clap(long)]
        public: bool,
        /// Room layout and wire format
        #[clap(short, long, value_enum, default_value = "chat")]
        mode: Mode,
        /// Upper bound between room ticks in milliseconds
        #[clap(short, long, default_value = "50")]
        tick_ms: u64,
        /// Maximum number of simultaneous connections
        #[clap(long, default_value = "64")]
        max_clients: usize,
        /// Maximum number of active rooms
        #[clap(long, default_value = "50")]
        max_rooms: usize,
        /// Largest accepted payload in bytes
        #[clap(long, default_value = "65535")]
        max_payload: usize,
        /// Chat messages replayed to newcomers
        #[clap(long, default_value = "8")]
        history: usize,
        /// Drop connections silent for this many seconds
        #[clap(long)]
        idle_timeout_secs: Option<u64>,
        /// Bytes queued for a slow client before it is dropped
        #[clap(long, default_value = "262144")]
        outbound_limit: usize,
        /// Require clients to log in or register first (lobby mode only)
        #[clap(long)]
        auth: bool,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        host: if args.public {
            "0.0.0.0".to_string()
        } else {
            args.host
        },
        port: args.port,
        max_clients: args.max_clients,
        max_rooms: args.max_rooms,
        max_payload: args.max_payload,
        tick: Duration::from_millis(args.tick_ms),
        history: args.history,
        idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
        outbound_limit: args.outbound_limit,
        ..ServerConfig::default()
    };

    let credentials = args
        .auth
        .then(|| Arc::new(InMemoryCredentialStore::new()) as Arc<dyn CredentialStore>);

    let mut server = Server::from_mode(config, args.mode, credentials).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown();
        }
    }

    Ok(())
}
