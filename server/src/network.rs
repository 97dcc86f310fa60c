//! Server network layer: the single-task dispatcher loop
//!
//! One iteration of [`Server::run_once`] is one wake-up:
//!
//! 1. **Wait** until the listener, a connection or a finished credential
//!    check is ready, or the tick interval elapses.
//! 2. **Accept** pending connections into room 0 (or reject them politely).
//! 3. **Drain** every readable connection in table order and route each
//!    decoded packet to its room.
//! 4. **Tick** every active room in id order.
//! 5. **Flush** queued output and drop idle connections.
//! 6. **Compact** the client table.
//!
//! Room callbacks never run concurrently, and nothing but the wait step
//! ever suspends. Departures and room moves requested from inside a callback
//! are settled right after it returns, before the next connection is drained.

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;

use log::{debug, error, info, trace, warn};
use shared::auth::AuthRequest;
use shared::{action, ChannelId, FrameFormat, Packet, PlayerId, ProtocolError, LOBBY_CHANNEL};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::client_manager::ClientTable;
use crate::config::{Mode, ServerConfig};
use crate::credentials::{authenticate, AuthVerdict, CredentialStore};
use crate::delivery::{notice_frame, Delivery, DeliverySettings};
use crate::error::ServerError;
use crate::registry::RoomRegistry;
use crate::room::{RoomContext, RoomLogic, RoomModule, RoomRequest};
use crate::rooms;
use crate::socket::Socket;

/// Upper bound on connections accepted per wake-up.
const ACCEPT_BATCH: usize = 64;
/// Upper bound on settle rounds per call; leftovers wait for the next one.
const SETTLE_ROUNDS: usize = 32;

const SERVER_FULL: &str = "Server full, try again later";
const LOGIN_PROMPT: &str = "Please log in or register";

/// Outcome of a credential check, sent back from the blocking pool.
#[derive(Debug)]
struct AuthResult {
    player: PlayerId,
    session: u64,
    name: String,
    verdict: AuthVerdict,
}

/// Asks a running [`Server::run`] loop to stop at its next wake-up.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Main server owning every connection and every room
pub struct Server {
    config: ServerConfig,
    listener: Option<TcpListener>,
    clients: ClientTable,
    rooms: RoomRegistry,
    settings: DeliverySettings,
    credentials: Option<Arc<dyn CredentialStore>>,
    requests: Vec<RoomRequest>,
    failed_rooms: Vec<ChannelId>,
    accepted: Vec<(TcpStream, SocketAddr)>,
    auth_tx: mpsc::UnboundedSender<AuthResult>,
    auth_rx: mpsc::UnboundedReceiver<AuthResult>,
    auth_results: Vec<AuthResult>,
    stop: StopHandle,
}

impl Server {
    /// Binds the listener and registers `lobby` as room 0.
    pub async fn bind(config: ServerConfig, lobby: Box<dyn RoomModule>) -> Result<Self, ServerError> {
        let mut server = Self::detached(config, lobby)?;
        let addr = server.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", listener.local_addr()?);
        server.listener = Some(listener);
        Ok(server)
    }

    /// A server without a listener. Connections come in through
    /// [`Server::attach`].
    pub fn detached(config: ServerConfig, lobby: Box<dyn RoomModule>) -> Result<Self, ServerError> {
        config.validate()?;

        let mut rooms = RoomRegistry::new(config.max_rooms);
        rooms.register(LOBBY_CHANNEL, lobby)?;
        let settings = DeliverySettings {
            format: config.format,
            max_payload: config.max_payload,
            outbound_limit: config.outbound_limit,
        };
        let clients = ClientTable::new(
            config.max_clients,
            config.format.max_frame_len(config.max_payload),
        );
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            listener: None,
            clients,
            rooms,
            settings,
            credentials: None,
            requests: Vec::new(),
            failed_rooms: Vec::new(),
            accepted: Vec::new(),
            auth_tx,
            auth_rx,
            auth_results: Vec::new(),
            stop: StopHandle::default(),
        })
    }

    /// Builds and binds a server with the rooms `mode` starts with.
    pub async fn from_mode(
        mut config: ServerConfig,
        mode: Mode,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self, ServerError> {
        config.format = mode.frame_format();
        let mut layout = rooms::layout(mode, config.history).into_iter();
        let (_, lobby) = layout
            .next()
            .ok_or_else(|| ServerError::Config(format!("{mode:?} mode has no room 0")))?;

        let mut server = Self::bind(config, lobby).await?;
        for (id, module) in layout {
            server.register_room(id, module)?;
        }
        if let Some(store) = credentials {
            server = server.with_credentials(store)?;
        }
        Ok(server)
    }

    /// Requires every new connection to log in before it joins room 0.
    ///
    /// Only routed framing can carry the login record.
    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Result<Self, ServerError> {
        if self.config.format != FrameFormat::Routed {
            return Err(ServerError::Config(
                "login requires routed framing".to_string(),
            ));
        }
        self.credentials = Some(store);
        Ok(self)
    }

    pub fn register_room(&mut self, id: ChannelId, module: Box<dyn RoomModule>) -> Result<(), ServerError> {
        self.rooms.register(id, module)
    }

    /// Closes a room. Its members are moved to room 0.
    pub fn unregister_room(&mut self, id: ChannelId) -> Result<(), ServerError> {
        if id == LOBBY_CHANNEL {
            return Err(ServerError::ReservedRoom(id));
        }
        self.close_room(id)?;
        self.settle();
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Live connections, including those still waiting to log in.
    pub fn connection_count(&self) -> usize {
        self.clients.iter().filter(|c| c.is_valid()).count()
    }

    pub fn players_in_room(&self, room: ChannelId) -> usize {
        self.clients.members_of(room).len()
    }

    pub fn room_ids(&self) -> Vec<ChannelId> {
        self.rooms.ids()
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Adds an already connected stream as if it had just been accepted.
    pub fn attach(&mut self, socket: Box<dyn Socket>, addr: SocketAddr) -> Option<PlayerId> {
        if self.clients.is_full() {
            warn!(
                "Rejecting {}: client table full ({} connections)",
                addr,
                self.clients.max_clients()
            );
            self.reject(socket.as_ref());
            return None;
        }

        let id = match self.clients.add_client(socket, addr) {
            Ok(id) => id,
            Err(e) => {
                warn!("Rejecting {}: {}", addr, e);
                return None;
            }
        };

        if self.credentials.is_some() {
            self.notice(id, LOGIN_PROMPT);
        } else {
            self.admit(id);
        }
        self.settle();
        Some(id)
    }

    /// Best-effort notice on a socket that never made it into the table.
    fn reject(&self, socket: &dyn Socket) {
        match notice_frame(self.settings.format, SERVER_FULL, self.settings.max_payload) {
            Ok(frame) => {
                if let Err(e) = socket.try_write(&frame) {
                    debug!("Could not deliver rejection: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode rejection: {}", e),
        }
    }

    /// Runs iterations until [`StopHandle::stop`] is called, then shuts down.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!(
            "Server started with rooms {:?}, tick {:?}",
            self.rooms.ids(),
            self.config.tick
        );
        while !self.stop.is_stopped() {
            self.run_once().await;
        }
        self.shutdown();
        Ok(())
    }

    /// One full wait/accept/drain/tick/flush/compact iteration.
    pub async fn run_once(&mut self) {
        self.wait().await;
        self.accept_pending();
        self.apply_auth_results();
        self.drain();
        self.tick_rooms();
        self.housekeeping();
        self.settle();
        let removed = self.clients.compact();
        if !removed.is_empty() {
            debug!("Reclaimed slots of clients {:?}", removed);
        }
    }

    /// Closes every connection and destroys every room.
    pub fn shutdown(&mut self) {
        info!("Server shutting down");
        self.clients.close_all("server shutting down");
        self.settle();
        self.clients.compact();
        self.rooms.destroy_all();
        self.listener = None;
    }

    async fn wait(&mut self) {
        let listener = self.listener.as_ref();
        let clients = &mut self.clients;
        let accepted = &mut self.accepted;
        let auth_rx = &mut self.auth_rx;
        let auth_results = &mut self.auth_results;

        let ready = std::future::poll_fn(|cx| {
            let mut any = false;

            if let Some(listener) = listener {
                while accepted.len() < ACCEPT_BATCH {
                    match listener.poll_accept(cx) {
                        Poll::Ready(Ok(conn)) => {
                            accepted.push(conn);
                            any = true;
                        }
                        Poll::Ready(Err(e)) => {
                            warn!("Accept failed: {}", e);
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
            }

            for conn in clients.iter_mut().filter(|c| c.is_valid()) {
                let ready = conn
                    .socket()
                    .is_some_and(|socket| socket.poll_read_ready(cx).is_ready());
                if ready {
                    conn.readable = true;
                    any = true;
                }
            }

            while let Poll::Ready(Some(result)) = auth_rx.poll_recv(cx) {
                auth_results.push(result);
                any = true;
            }

            if any {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });

        // Elapsing is the tick; nothing to report.
        let _ = tokio::time::timeout(self.config.tick, ready).await;
    }

    fn accept_pending(&mut self) {
        for (stream, addr) in std::mem::take(&mut self.accepted) {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
            }
            self.attach(Box::new(stream), addr);
        }
    }

    fn drain(&mut self) {
        let format = self.settings.format;
        let max_payload = self.settings.max_payload;

        for id in self.clients.ids() {
            let Some(conn) = self.clients.get_mut(id) else {
                continue;
            };
            if !conn.is_valid() || !conn.readable {
                continue;
            }

            let outcome = conn.on_readable(format, max_payload);
            for packet in outcome.packets {
                if !self.clients.get(id).is_some_and(|c| c.is_valid()) {
                    break;
                }
                self.route(id, packet);
                self.settle();
            }

            if let Some(err) = outcome.violation {
                self.protocol_violation(id, &err);
            } else if outcome.disconnected {
                self.clients.mark_invalid(id, "connection closed by peer");
            }
            self.settle();
        }
    }

    fn route(&mut self, id: PlayerId, packet: Packet) {
        let Some(conn) = self.clients.get(id) else {
            return;
        };
        let (room, admitted) = (conn.room, conn.admitted);
        trace!(
            "Client {} sent action {} on channel {} ({} bytes)",
            id,
            packet.action,
            packet.channel,
            packet.payload.len()
        );

        if !admitted {
            if packet.action == action::AUTH && self.credentials.is_some() {
                self.begin_auth(id, &packet.payload);
            } else {
                debug!("Dropping action {} from client {} before login", packet.action, id);
            }
            return;
        }

        if packet.channel == room {
            self.dispatch(room, id, packet.action, &packet.payload);
        } else if packet.action == action::JOIN && self.rooms.is_active(packet.channel) {
            self.move_player(id, packet.channel);
        } else {
            warn!(
                "Dropping action {} from client {} for room {} (member of room {})",
                packet.action, id, packet.channel, room
            );
        }
    }

    fn dispatch(&mut self, room: ChannelId, player: PlayerId, action: u8, payload: &[u8]) {
        self.invoke(room, |logic, ctx| logic.on_action(ctx, player, action, payload));
    }

    /// Runs one room callback with panics contained to that room.
    fn invoke<F>(&mut self, room_id: ChannelId, f: F)
    where
        F: FnOnce(&mut dyn RoomLogic, &mut RoomContext<'_>),
    {
        if self.failed_rooms.contains(&room_id) {
            return;
        }
        let Ok(room) = self.rooms.get_mut(room_id) else {
            debug!("Skipping callback for inactive room {}", room_id);
            return;
        };

        let delivery = Delivery::new(&mut self.clients, self.settings);
        let mut ctx = RoomContext::new(room_id, delivery, &mut self.requests);
        let logic = room.logic_mut();
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(logic, &mut ctx)));

        if let Err(payload) = result {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Room {} ({}) panicked: {}", room_id, room.name(), reason);
            self.failed_rooms.push(room_id);
        }
    }

    /// Makes `player` a member of room 0.
    fn admit(&mut self, player: PlayerId) {
        let Some(conn) = self.clients.get_mut(player) else {
            return;
        };
        conn.admitted = true;
        conn.room = LOBBY_CHANNEL;
        self.dispatch(LOBBY_CHANNEL, player, action::JOIN, &[]);
    }

    fn move_player(&mut self, player: PlayerId, to: ChannelId) {
        if !self.rooms.is_active(to) {
            warn!("Client {} asked to move to inactive room {}", player, to);
            return;
        }
        let Some(conn) = self.clients.get_mut(player) else {
            return;
        };
        if !conn.is_valid() || !conn.admitted || conn.room == to {
            return;
        }

        let from = conn.room;
        conn.room = to;
        info!("Client {} moved from room {} to room {}", player, from, to);
        self.invoke(from, |logic, ctx| logic.on_player_leave(ctx, player));
        self.dispatch(to, player, action::JOIN, &[]);
    }

    /// Unregisters a room and moves its members to room 0.
    fn close_room(&mut self, id: ChannelId) -> Result<(), ServerError> {
        self.rooms.unregister(id)?;
        let moved = self.clients.reassign_room(id, LOBBY_CHANNEL);
        for player in moved {
            if self.clients.get(player).is_some_and(|c| c.admitted) {
                self.dispatch(LOBBY_CHANNEL, player, action::JOIN, &[]);
            }
        }
        Ok(())
    }

    fn disable_room(&mut self, id: ChannelId) {
        if id == LOBBY_CHANNEL {
            warn!("Recreating room {} after failure", id);
            if let Err(e) = self.rooms.reset(id) {
                error!("Could not recreate room {}: {}", id, e);
            }
            return;
        }
        warn!("Disabling room {} after failure", id);
        if let Err(e) = self.close_room(id) {
            error!("Could not close room {}: {}", id, e);
        }
    }

    /// Applies everything room callbacks left behind: departures, moves and
    /// failed rooms.
    fn settle(&mut self) {
        for _ in 0..SETTLE_ROUNDS {
            let departures = self.clients.take_departures();
            let requests = std::mem::take(&mut self.requests);
            let failed = std::mem::take(&mut self.failed_rooms);
            if departures.is_empty() && requests.is_empty() && failed.is_empty() {
                return;
            }

            for departure in departures.into_iter().filter(|d| d.admitted) {
                self.invoke(departure.room, |logic, ctx| {
                    logic.on_player_leave(ctx, departure.player)
                });
            }
            for request in requests {
                match request {
                    RoomRequest::Move { player, to } => self.move_player(player, to),
                }
            }
            for room in failed {
                self.disable_room(room);
            }
        }
        warn!("Room work still pending after {} rounds", SETTLE_ROUNDS);
    }

    fn tick_rooms(&mut self) {
        for id in self.rooms.ids() {
            self.invoke(id, |logic, ctx| logic.on_tick(ctx));
        }
    }

    fn housekeeping(&mut self) {
        Delivery::new(&mut self.clients, self.settings).flush_all();
        if let Some(timeout) = self.config.idle_timeout {
            let dropped = self.clients.check_timeouts(timeout);
            if !dropped.is_empty() {
                info!("Dropped idle clients {:?}", dropped);
            }
        }
    }

    fn protocol_violation(&mut self, player: PlayerId, err: &ProtocolError) {
        warn!("Protocol violation from client {}: {}", player, err);
        self.clients.mark_invalid(player, "protocol violation");
    }

    fn notice(&mut self, player: PlayerId, text: &str) {
        if let Err(e) = Delivery::new(&mut self.clients, self.settings).notice(player, text) {
            debug!("Notice to client {} not delivered: {}", player, e);
        }
    }

    fn begin_auth(&mut self, player: PlayerId, payload: &[u8]) {
        let Some(store) = self.credentials.clone() else {
            return;
        };
        let request = match AuthRequest::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                self.protocol_violation(player, &e);
                return;
            }
        };
        if let Err(reason) = request.validate() {
            self.notice(player, reason);
            return;
        }
        if self.clients.find_by_name(&request.name).is_some() {
            self.notice(player, "User already logged in");
            return;
        }

        let Some(conn) = self.clients.get_mut(player) else {
            return;
        };
        if conn.auth_in_flight {
            self.notice(player, "Login already in progress");
            return;
        }
        conn.auth_in_flight = true;
        let session = conn.session;

        debug!("Checking credentials of client {} as `{}`", player, request.name);
        let tx = self.auth_tx.clone();
        tokio::task::spawn_blocking(move || {
            let verdict = authenticate(store.as_ref(), &request);
            // The server may be gone by now; nothing to do then.
            let _ = tx.send(AuthResult {
                player,
                session,
                name: request.name,
                verdict,
            });
        });
    }

    fn apply_auth_results(&mut self) {
        for result in std::mem::take(&mut self.auth_results) {
            let current = self
                .clients
                .get(result.player)
                .is_some_and(|c| c.is_valid() && c.session == result.session);
            if !current {
                debug!("Discarding login result for departed client {}", result.player);
                continue;
            }
            let name_taken = self.clients.find_by_name(&result.name).is_some();

            let Some(conn) = self.clients.get_mut(result.player) else {
                continue;
            };
            conn.auth_in_flight = false;

            match result.verdict {
                AuthVerdict::Accepted if name_taken => {
                    self.notice(result.player, "User already logged in");
                }
                AuthVerdict::Accepted => {
                    conn.display_name = result.name.clone();
                    info!("Client {} logged in as {}", result.player, result.name);
                    self.notice(result.player, &format!("Welcome, {}", result.name));
                    self.admit(result.player);
                }
                AuthVerdict::Rejected(reason) => {
                    info!("Login of client {} rejected: {}", result.player, reason);
                    self.notice(result.player, &reason);
                }
            }
            self.settle();
        }
    }
}
