//! Host-and-join: run a server next to the client.
//!
//! The server gets its own OS thread and its own single-threaded runtime, so
//! the client's runtime and the server loop never share a scheduler. The only
//! thing crossing back is the bound address.

use log::{error, info};
use server::config::{Mode, ServerConfig};
use server::credentials::CredentialStore;
use server::network::{Server, StopHandle};
use shared::auth::AuthMode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use crate::network::ClientError;

pub struct HostedServer {
    addr: SocketAddr,
    stop: StopHandle,
    thread: JoinHandle<()>,
}

impl HostedServer {
    pub async fn spawn(
        config: ServerConfig,
        mode: Mode,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self, ClientError> {
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("roomcast-host".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut server = match Server::from_mode(config, mode, credentials).await {
                        Ok(server) => server,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let ready = server
                        .local_addr()
                        .map(|addr| (addr, server.stop_handle()))
                        .ok_or_else(|| "server has no listener".to_string());
                    if ready_tx.send(ready).is_err() {
                        return;
                    }
                    if let Err(e) = server.run().await {
                        error!("Hosted server stopped: {}", e);
                    }
                });
            })?;

        let (addr, stop) = ready_rx
            .await
            .map_err(|_| ClientError::Host("server thread exited early".to_string()))?
            .map_err(ClientError::Host)?;
        info!("Hosting a {:?} server on {}", mode, addr);

        Ok(Self { addr, stop, thread })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the loop and waits for the thread. The loop notices within one
    /// tick.
    pub fn shutdown(self) {
        self.stop.stop();
        if self.thread.join().is_err() {
            error!("Hosted server thread panicked");
        }
    }
}

/// How to authenticate against a server. A hosted server starts with an
/// empty account store, so the only thing that can succeed there is
/// registering.
pub fn auth_mode(hosting: bool, register: bool) -> AuthMode {
    if hosting || register {
        AuthMode::Register
    } else {
        AuthMode::Login
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChatClient;
    use shared::{Message, MessageType};
    use std::time::Duration;

    #[test]
    fn test_hosting_always_registers() {
        assert_eq!(auth_mode(true, false), AuthMode::Register);
        assert_eq!(auth_mode(true, true), AuthMode::Register);
        assert_eq!(auth_mode(false, true), AuthMode::Register);
        assert_eq!(auth_mode(false, false), AuthMode::Login);
    }

    #[tokio::test]
    async fn test_host_and_join() {
        let config = ServerConfig {
            port: 0,
            tick: Duration::from_millis(5),
            ..ServerConfig::default()
        };
        let host = HostedServer::spawn(config, Mode::Chat, None).await.unwrap();

        let mut client = ChatClient::connect(host.addr(), Mode::Chat.frame_format())
            .await
            .unwrap();
        let count = client.recv_message().await.unwrap().unwrap();
        assert_eq!(count.kind, MessageType::UserCount);
        assert_eq!(count, Message::user_count(1));

        drop(client);
        tokio::task::spawn_blocking(move || host.shutdown())
            .await
            .unwrap();
    }
}
