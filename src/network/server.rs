//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Owns the round driver,
//! relays engine events to every connection, and routes requests to the
//! connection's [`ClientSession`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::engine::config::{ConfigError, EngineConfig};
use crate::engine::scheduler::RoundScheduler;
use crate::engine::state::PlayerId;
use crate::network::auth::AuthConfig;
use crate::network::driver::RoundDriver;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::network::session::{ClientSession, GameContext, Outbound};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Create config from `BIND_ADDR` and `CRASH_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("BIND_ADDR") {
            config.bind_addr = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BIND_ADDR".to_string(),
                value: raw.clone(),
            })?;
        }
        if let Ok(raw) = std::env::var("CRASH_MAX_CONNECTIONS") {
            config.max_connections = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "CRASH_MAX_CONNECTIONS".to_string(),
                value: raw.clone(),
            })?;
        }

        Ok(config)
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum CrashServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier (after auth).
    player_id: Option<PlayerId>,
    /// Connection time.
    connected_at: Instant,
}

/// The crash game server.
pub struct CrashServer {
    /// Server configuration.
    config: ServerConfig,
    /// Tick period for the round driver.
    tick_period: Duration,
    /// Engine plus shared handles.
    ctx: GameContext,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl CrashServer {
    /// Create a server whose first round opens now.
    pub fn new(config: ServerConfig, engine: EngineConfig, auth: AuthConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let tick_period = engine.tick_period;
        let prices = Arc::new(engine.prices.clone());
        let generator = engine.build_generator();
        let scheduler = RoundScheduler::new(engine, generator, Instant::now());

        Self {
            config,
            tick_period,
            ctx: GameContext::new(scheduler, prices, auth),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Shared game handles (scheduler, prices, auth).
    pub fn context(&self) -> &GameContext {
        &self.ctx
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), CrashServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Crash server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), CrashServerError> {
        let driver = RoundDriver::new(self.ctx.scheduler.clone(), self.tick_period)
            .spawn(self.shutdown_tx.subscribe());

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_overloaded(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = driver.await {
            error!("Round driver failed: {}", e);
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let ctx = self.ctx.clone();
        let buffer = self.config.outbound_buffer.max(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Outbound>(buffer);

            // Subscribe before registering so no event falls between the two
            let mut events = ctx.scheduler.read().await.subscribe();
            let mut session = ClientSession::new(ctx);

            clients.write().await.insert(addr, ConnectedClient {
                player_id: None,
                connected_at: Instant::now(),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(outbound) = msg_rx.recv().await {
                    let frame = match encode(&outbound) {
                        Some(frame) => frame,
                        None => continue,
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let replies = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        let replies = session.handle(client_msg).await;
                                        if let Some(player_id) = session.player_id() {
                                            if let Some(client) = clients.write().await.get_mut(&addr) {
                                                client.player_id = Some(player_id);
                                            }
                                        }
                                        replies
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        vec![ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))]
                                    }
                                };
                                if !send_all(&msg_tx, replies).await {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let reply = ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are server-to-client only",
                                ));
                                if !send_all(&msg_tx, vec![reply]).await {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                if let Some(outbound) = session.translate(&event) {
                                    if msg_tx.send(outbound).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(RecvError::Lagged(missed)) => {
                                warn!("Client {} fell {} events behind, resyncing", addr, missed);
                                if !send_all(&msg_tx, session.sync().await).await {
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(Outbound::Message(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        })).await;
                        break;
                    }
                }
            }

            // Let queued replies drain before the socket goes away
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender for {} did not drain in time", addr);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    "Client {} cleaned up (player {}, connected {:?})",
                    addr,
                    client.player_id.map(|id| id.short()).unwrap_or_else(|| "-".to_string()),
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Finish the handshake only to tell the client the server is full.
async fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with rejected client {} failed: {}", addr, e);
            return;
        }
    };

    let reply = Outbound::Message(ServerMessage::Error(ServerError::new(
        ErrorCode::ServerOverloaded,
        "Server is at its connection limit",
    )));
    if let Some(frame) = encode(&reply) {
        if let Err(e) = ws.send(frame).await {
            debug!("Could not notify rejected client {}: {}", addr, e);
            return;
        }
    }
    let _ = ws.close(None).await;
}

/// Queue replies for the sender task. Returns false once the client is gone.
async fn send_all(tx: &mpsc::Sender<Outbound>, replies: Vec<ServerMessage>) -> bool {
    for reply in replies {
        if tx.send(Outbound::Message(reply)).await.is_err() {
            return false;
        }
    }
    true
}

/// Wire frame for an outbound item.
fn encode(outbound: &Outbound) -> Option<Message> {
    match outbound {
        Outbound::Message(msg) => match msg.to_json() {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                None
            }
        },
        Outbound::Frame(frame) => match frame.to_bytes() {
            Ok(bytes) => Some(Message::Binary(bytes)),
            Err(e) => {
                error!("Failed to encode tick frame: {}", e);
                None
            }
        },
    }
}
