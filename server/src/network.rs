//! Server network layer: two-channel transport, message dispatch, and connection lifecycle

use crate::registry::{PlayerIdentity, SessionRegistry};
use crate::world::GameWorld;
use log::{debug, error, info, warn};
use shared::{
    decode_frame, encode_frame, ConnId, Frame, MapLayout, Message, DEFAULT_DATAGRAM_PORT,
    DEFAULT_RELIABLE_PORT, MAX_FRAME_BYTES,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Server startup configuration, usually filled in from the command line
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Port for the reliable, ordered control channel
    pub reliable_port: u16,
    /// Port for the unreliable movement channel
    pub datagram_port: u16,
    pub max_clients: usize,
    pub tick_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            reliable_port: DEFAULT_RELIABLE_PORT,
            datagram_port: DEFAULT_DATAGRAM_PORT,
            max_clients: 16,
            tick_rate: 60,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

/// Failure to bind one of the two listening sockets. Fatal at startup; the
/// server does not start and nothing retries.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to bind reliable channel on {addr}: {source}")]
    Reliable { addr: String, source: io::Error },
    #[error("failed to bind datagram channel on {addr}: {source}")]
    Datagram { addr: String, source: io::Error },
}

/// Transport-side record of one live connection
struct Peer {
    /// Remote address of the reliable channel
    addr: SocketAddr,
    /// Outbound queue drained by the connection's writer task
    reliable_tx: mpsc::UnboundedSender<Frame>,
    /// Datagram return address, unset until the client registers it
    datagram_addr: Option<SocketAddr>,
}

/// Connection table shared by the accept loop, the datagram loop, and the
/// per-connection tasks
struct PeerTable {
    peers: HashMap<ConnId, Peer>,
    by_datagram_addr: HashMap<SocketAddr, ConnId>,
    next_conn_id: ConnId,
    max_clients: usize,
}

impl PeerTable {
    fn new(max_clients: usize) -> Self {
        Self {
            peers: HashMap::new(),
            by_datagram_addr: HashMap::new(),
            next_conn_id: 1,
            max_clients,
        }
    }

    /// Assigns the next connection id, or None when the server is full
    fn add_peer(
        &mut self,
        addr: SocketAddr,
        reliable_tx: mpsc::UnboundedSender<Frame>,
    ) -> Option<ConnId> {
        if self.peers.len() >= self.max_clients {
            return None;
        }

        let conn = self.next_conn_id;
        self.next_conn_id += 1;

        self.peers.insert(
            conn,
            Peer {
                addr,
                reliable_tx,
                datagram_addr: None,
            },
        );

        Some(conn)
    }

    fn remove_peer(&mut self, conn: ConnId) -> Option<Peer> {
        let peer = self.peers.remove(&conn);
        if let Some(peer) = &peer {
            if let Some(addr) = peer.datagram_addr {
                self.by_datagram_addr.remove(&addr);
            }
        }
        peer
    }

    /// Records the datagram return address for a connection. Returns false
    /// for connection ids with no reliable-channel peer.
    fn register_datagram_addr(&mut self, conn: ConnId, addr: SocketAddr) -> bool {
        match self.peers.get_mut(&conn) {
            Some(peer) => {
                if let Some(old) = peer.datagram_addr.replace(addr) {
                    if old != addr {
                        self.by_datagram_addr.remove(&old);
                    }
                }
                self.by_datagram_addr.insert(addr, conn);
                true
            }
            None => false,
        }
    }

    fn conn_by_datagram_addr(&self, addr: SocketAddr) -> Option<ConnId> {
        self.by_datagram_addr.get(&addr).copied()
    }

    fn datagram_addr(&self, conn: ConnId) -> Option<SocketAddr> {
        self.peers.get(&conn).and_then(|peer| peer.datagram_addr)
    }

    fn reliable_sender(&self, conn: ConnId) -> Option<mpsc::UnboundedSender<Frame>> {
        self.peers.get(&conn).map(|peer| peer.reliable_tx.clone())
    }

    fn len(&self) -> usize {
        self.peers.len()
    }
}

/// Login acceptance policy, the single place rejection is decided. Returns
/// the cleaned display name, or None when the attempt must be ignored: the
/// connection is already bound, or the name is empty once surrounding
/// whitespace is trimmed. Rejection sends nothing back to the client.
fn screen_login(existing: Option<&PlayerIdentity>, name: &str) -> Option<String> {
    if existing.is_some() {
        return None;
    }

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(trimmed.to_string())
}

/// The session server: owns both channel sockets, the session registry, and
/// the world authority. Handler tasks share it through an `Arc`; there is no
/// global state.
pub struct Server {
    reliable: TcpListener,
    datagram: UdpSocket,
    registry: RwLock<SessionRegistry>,
    world: RwLock<GameWorld>,
    peers: RwLock<PeerTable>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    tick_duration: Duration,
}

impl Server {
    /// Binds both channels. A failure here is reported to the caller once
    /// and is fatal to server start.
    pub async fn bind(config: &ServerConfig) -> Result<Self, BindError> {
        let reliable_addr = format!("{}:{}", config.bind_addr, config.reliable_port);
        let reliable = match TcpListener::bind(&reliable_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                return Err(BindError::Reliable {
                    addr: reliable_addr,
                    source,
                })
            }
        };
        info!("Reliable channel listening on {}", reliable_addr);

        let datagram_addr = format!("{}:{}", config.bind_addr, config.datagram_port);
        let datagram = match UdpSocket::bind(&datagram_addr).await {
            Ok(socket) => socket,
            Err(source) => {
                return Err(BindError::Datagram {
                    addr: datagram_addr,
                    source,
                })
            }
        };
        info!("Datagram channel listening on {}", datagram_addr);

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Server {
            reliable,
            datagram,
            registry: RwLock::new(SessionRegistry::new()),
            world: RwLock::new(GameWorld::new(MapLayout::standard())),
            peers: RwLock::new(PeerTable::new(config.max_clients)),
            shutdown_tx,
            running: AtomicBool::new(true),
            tick_duration: config.tick_duration(),
        })
    }

    /// Local address of the reliable channel (useful when bound to port 0)
    pub fn reliable_addr(&self) -> io::Result<SocketAddr> {
        self.reliable.local_addr()
    }

    /// Local address of the datagram channel
    pub fn datagram_addr(&self) -> io::Result<SocketAddr> {
        self.datagram.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the accept loop for the reliable channel
    fn spawn_reliable_listener(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Catches a shutdown signalled before the subscribe above.
            if !self.is_running() {
                return;
            }

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = self.reliable.accept() => match accepted {
                        Ok((stream, addr)) => {
                            Arc::clone(&self).accept_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        });
    }

    /// Spawns the receive loop for the datagram channel
    fn spawn_datagram_listener(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Catches a shutdown signalled before the subscribe above.
            if !self.is_running() {
                return;
            }

            let mut buffer = [0u8; 2048];

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = self.datagram.recv_from(&mut buffer) => match received {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr).await,
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        });
    }

    /// Admits a newly accepted connection: assigns its id, starts its reader
    /// and writer tasks, and sends the register frame carrying the id
    async fn accept_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        // The shutdown broadcast reaches only receivers that existed when it
        // was sent. Subscribe both connection tasks first, then re-check
        // running to catch a signal that fired before the subscriptions.
        let writer_shutdown = self.shutdown_tx.subscribe();
        let reader_shutdown = self.shutdown_tx.subscribe();
        if !self.is_running() {
            // Dropping the stream closes it.
            debug!("Refusing connection from {}: server is shutting down", addr);
            return;
        }

        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();

        let conn = {
            let mut peers = self.peers.write().await;
            peers.add_peer(addr, reliable_tx)
        };

        let Some(conn) = conn else {
            warn!("Refusing connection from {}: server is full", addr);
            return;
        };

        info!("Client {} connected from {}", conn, addr);

        let (read_half, write_half) = stream.into_split();
        self.spawn_connection_writer(conn, write_half, reliable_rx, writer_shutdown);
        Arc::clone(&self).spawn_connection_reader(conn, read_half, reader_shutdown);

        self.send_reliable_frame(conn, Frame::Register { conn }).await;
    }

    /// Writer task: drains the connection's outbound queue onto the socket
    fn spawn_connection_writer(
        &self,
        conn: ConnId,
        mut write_half: OwnedWriteHalf,
        mut reliable_rx: mpsc::UnboundedReceiver<Frame>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    frame = reliable_rx.recv() => {
                        let Some(frame) = frame else { break };
                        match encode_frame(&frame) {
                            Ok(body) => {
                                if let Err(e) = write_framed(&mut write_half, &body).await {
                                    debug!("Write to connection {} failed: {}", conn, e);
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to encode frame for connection {}: {}", conn, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Reader task: decodes inbound frames and hands messages to the
    /// dispatcher; runs the disconnect transition when the stream ends
    fn spawn_connection_reader(
        self: Arc<Self>,
        conn: ConnId,
        mut read_half: OwnedReadHalf,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Shutdown teardown skips the departure broadcast;
                    // every connection is going away with us.
                    _ = shutdown_rx.recv() => return,
                    read = read_framed(&mut read_half) => match read {
                        Ok(body) => match decode_frame(&body) {
                            Ok(Frame::App(message)) => self.handle_message(conn, message).await,
                            Ok(Frame::Register { .. }) => {
                                debug!("Ignoring register frame on reliable channel from {}", conn);
                            }
                            Err(e) => {
                                warn!("Undecodable frame from connection {}: {}", conn, e);
                                break;
                            }
                        },
                        Err(e) => {
                            debug!("Connection {} closed: {}", conn, e);
                            break;
                        }
                    }
                }
            }

            self.handle_disconnect(conn).await;
        });
    }

    /// Handles one inbound datagram: registration frames bind the source
    /// address to a connection; application frames from unknown addresses
    /// are dropped
    async fn handle_datagram(&self, bytes: &[u8], addr: SocketAddr) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Undecodable datagram from {}: {}", addr, e);
                return;
            }
        };

        match frame {
            Frame::Register { conn } => {
                let registered = {
                    let mut peers = self.peers.write().await;
                    peers.register_datagram_addr(conn, addr)
                };

                if registered {
                    debug!("Connection {} registered datagram address {}", conn, addr);

                    // Echo the register frame back so the client knows its
                    // datagram route works.
                    match encode_frame(&Frame::Register { conn }) {
                        Ok(bytes) => {
                            if let Err(e) = self.datagram.send_to(&bytes, addr).await {
                                debug!("Register ack to {} failed: {}", addr, e);
                            }
                        }
                        Err(e) => error!("Failed to encode register ack: {}", e),
                    }
                } else {
                    warn!(
                        "Datagram registration for unknown connection {} from {}",
                        conn, addr
                    );
                }
            }
            Frame::App(message) => {
                let conn = {
                    let peers = self.peers.read().await;
                    peers.conn_by_datagram_addr(addr)
                };

                match conn {
                    Some(conn) => self.handle_message(conn, message).await,
                    None => debug!("Dropped datagram from unregistered address {}", addr),
                }
            }
        }
    }

    /// Routes one decoded message. Dispatch is channel-agnostic: a message
    /// is handled the same way whichever channel carried it.
    async fn handle_message(&self, conn: ConnId, message: Message) {
        match message {
            Message::Login { name } => self.handle_login(conn, name).await,
            Message::MovementState {
                id,
                position,
                linear_velocity,
            } => self.handle_movement(conn, id, position, linear_velocity).await,
            Message::PlayerJoinLeave { .. } => {
                // Join/leave events originate on the server only.
                debug!("Ignoring join/leave message from connection {}", conn);
            }
        }
    }

    /// Login: bind the identity, sync the late joiner, announce the join.
    /// The registry is held for the whole transition so a concurrent login
    /// cannot slip between the roster snapshot and the announcement.
    async fn handle_login(&self, conn: ConnId, name: String) {
        let mut registry = self.registry.write().await;

        // A login resolved from a datagram can still be in flight after its
        // connection is torn down. Once the peer is gone there is no
        // disconnect left to unbind, so the attempt must not bind.
        let peer_alive = {
            let peers = self.peers.read().await;
            peers.reliable_sender(conn).is_some()
        };
        if !peer_alive {
            debug!("Ignored login from vanished connection {}", conn);
            return;
        }

        let Some(clean_name) = screen_login(registry.lookup(conn), &name) else {
            debug!("Ignored login from connection {}", conn);
            return;
        };

        let identity = match registry.bind(conn, clean_name) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Ignored login from connection {}: {}", conn, e);
                return;
            }
        };

        let peer_states = {
            let mut world = self.world.write().await;
            world.add_player(identity.clone());
            world.snapshot_for(identity.id)
        };

        // Late-joiner sync: the new client learns every existing peer and
        // that peer's current movement state, all on the reliable channel.
        for state in &peer_states {
            self.send_reliable(
                conn,
                &Message::PlayerJoinLeave {
                    id: state.identity.id,
                    name: state.identity.name.clone(),
                    joined: true,
                },
            )
            .await;
            self.send_reliable(
                conn,
                &Message::MovementState {
                    id: state.identity.id,
                    position: state.position,
                    linear_velocity: state.linear_velocity,
                },
            )
            .await;
        }

        // Announce the join to everyone already active. The new client is
        // not echoed an event about itself.
        let join = Message::PlayerJoinLeave {
            id: identity.id,
            name: identity.name.clone(),
            joined: true,
        };
        for target in registry.active_conns() {
            if target != conn {
                self.send_reliable(target, &join).await;
            }
        }
    }

    /// Movement: reject unless the sender owns the id, record the state,
    /// relay to everyone else
    async fn handle_movement(
        &self,
        conn: ConnId,
        id: ConnId,
        position: (f32, f32),
        linear_velocity: (f32, f32),
    ) {
        let owns = {
            let registry = self.registry.read().await;
            registry.lookup(conn).map(|identity| identity.id) == Some(id)
        };

        if !owns {
            debug!(
                "Dropped movement for player {} from connection {}",
                id, conn
            );
            return;
        }

        {
            let mut world = self.world.write().await;
            world.update_movement(id, position, linear_velocity);
        }

        // Stale or dropped relays are acceptable; receivers always converge
        // on the most recently delivered state.
        self.broadcast_unreliable(
            &Message::MovementState {
                id,
                position,
                linear_velocity,
            },
            Some(conn),
        )
        .await;
    }

    /// Disconnect transition: drop the peer, unbind the identity, remove
    /// the player, and announce the departure. Pre-login connections leave
    /// silently. Safe to call more than once.
    async fn handle_disconnect(&self, conn: ConnId) {
        let removed = {
            let mut peers = self.peers.write().await;
            peers.remove_peer(conn)
        };

        if let Some(peer) = removed {
            info!("Client {} ({}) disconnected", conn, peer.addr);
        }

        let identity = {
            let mut registry = self.registry.write().await;
            registry.unbind(conn)
        };

        let Some(identity) = identity else { return };

        {
            let mut world = self.world.write().await;
            world.remove_player(identity.id);
        }

        self.broadcast_reliable(
            &Message::PlayerJoinLeave {
                id: identity.id,
                name: identity.name,
                joined: false,
            },
            Some(conn),
        )
        .await;
    }

    /// Queues a message on a connection's reliable channel
    async fn send_reliable(&self, conn: ConnId, message: &Message) {
        self.send_reliable_frame(conn, Frame::App(message.clone())).await;
    }

    async fn send_reliable_frame(&self, conn: ConnId, frame: Frame) {
        let sender = {
            let peers = self.peers.read().await;
            peers.reliable_sender(conn)
        };

        match sender {
            // A closed queue means the writer task already exited; the
            // disconnect transition cleans up behind it.
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => debug!("No reliable route for connection {}", conn),
        }
    }

    /// Queues a message to every active connection except `exclude`. The
    /// target set is the roster at call time; a connection torn down
    /// mid-broadcast simply misses the message.
    async fn broadcast_reliable(&self, message: &Message, exclude: Option<ConnId>) {
        let targets = {
            let registry = self.registry.read().await;
            registry.active_conns()
        };

        for conn in targets {
            if Some(conn) == exclude {
                continue;
            }
            self.send_reliable(conn, message).await;
        }
    }

    /// Sends a message as one datagram to every active connection with a
    /// registered datagram address, except `exclude`
    async fn broadcast_unreliable(&self, message: &Message, exclude: Option<ConnId>) {
        let bytes = match encode_frame(&Frame::App(message.clone())) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode datagram: {}", e);
                return;
            }
        };

        let targets: Vec<(ConnId, SocketAddr)> = {
            let registry = self.registry.read().await;
            let peers = self.peers.read().await;
            registry
                .active_conns()
                .into_iter()
                .filter(|&conn| Some(conn) != exclude)
                .filter_map(|conn| peers.datagram_addr(conn).map(|addr| (conn, addr)))
                .collect()
        };

        for (conn, addr) in targets {
            if let Err(e) = self.datagram.send_to(&bytes, addr).await {
                debug!("Datagram send to connection {} failed: {}", conn, e);
            }
        }
    }

    /// Advances the server-owned world simulation. Called once per tick by
    /// `run`; exposed for embedding the server in an external game loop.
    pub async fn update(&self, delta: f32) {
        let mut world = self.world.write().await;
        world.update(delta);
    }

    /// Main loop: starts the channel listeners, then drives the tick clock
    /// until shutdown
    pub async fn run(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // A signal sent before the subscribe above is not replayed; an
        // already-requested shutdown stops the loop before it starts.
        if !self.is_running() {
            info!("Server loop stopped");
            return Ok(());
        }

        Arc::clone(&self).spawn_reliable_listener();
        Arc::clone(&self).spawn_datagram_listener();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Server loop stopped");
                    break;
                }

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let delta = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.update(delta).await;

                    // Periodic status line
                    let tick = { self.world.read().await.tick() };
                    if tick % 60 == 0 {
                        let connections = { self.peers.read().await.len() };
                        let players = { self.registry.read().await.len() };

                        if connections > 0 {
                            debug!(
                                "Tick {}: {} connections, {} players, {:.1}Hz",
                                tick, connections, players, 1.0 / delta
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Stops the listeners, every connection task, and the tick loop.
    /// Idempotent: calls after the first do nothing.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Server shutting down");
            // Err here means every loop already exited on its own.
            let _ = self.shutdown_tx.send(());
        }
    }
}

/// Reads one length-prefixed frame: u32 big-endian length, then the bincode
/// body. Lengths outside (0, MAX_FRAME_BYTES] poison the connection.
async fn read_framed<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} out of bounds", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_framed<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    Ok(())
}
