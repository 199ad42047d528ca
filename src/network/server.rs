//! WebSocket Game Server
//!
//! Async WebSocket server for remote seats. Seats clients into sessions,
//! routes their commands and rolls to the session authority, and runs the
//! background sweeps for roll timeouts and dropped connections.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::card::CardPool;
use crate::game::events::GameEvent;
use crate::network::protocol::{
    parse_player_id, parse_session_id, ClientMessage, ErrorCode, JoinedInfo, ProtocolError,
    ServerError, ServerMessage,
};
use crate::network::session::{
    DiceMode, MatchSession, PlayerId, SessionConfig, SessionError, SessionId, SessionManager,
    SessionState,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle time before a connection is dropped.
    pub idle_timeout: Duration,
    /// Session settings applied to every new session.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DUGOUT_BIND_ADDR`, `DUGOUT_MAX_CONNECTIONS`,
    /// `DUGOUT_ROLL_TIMEOUT_SECS` and `DUGOUT_DICE_MODE`. Unparseable values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "DUGOUT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, "DUGOUT_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(secs) = parse_var(&lookup, "DUGOUT_ROLL_TIMEOUT_SECS") {
            config.session.roll_timeout = Duration::from_secs(secs);
        }
        if let Some(mode) = parse_var(&lookup, "DUGOUT_DICE_MODE") {
            config.session.dice_mode = mode;
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

impl FromStr for DiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(DiceMode::Server),
            "client" => Ok(DiceMode::Client),
            other => Err(format!("unknown dice mode: {other}")),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad client message.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// No session with the requested id.
    #[error("Session not found")]
    SessionNotFound,

    /// Client holds no seat.
    #[error("Not in a session")]
    NotInSession,
}

impl GameServerError {
    /// Message telling the client what went wrong.
    pub fn to_message(&self) -> ServerMessage {
        let code = match self {
            GameServerError::Session(
                err @ (SessionError::Rejected(_)
                | SessionError::NotPlaying
                | SessionError::InvalidState
                | SessionError::PlayersNotReady
                | SessionError::ServerRollsDice),
            ) => return ServerMessage::rejected(err),
            GameServerError::Session(SessionError::SessionFull | SessionError::MatchInProgress) => {
                ErrorCode::SessionFull
            }
            GameServerError::Session(SessionError::AlreadyInSession) => ErrorCode::AlreadyInSession,
            GameServerError::Session(SessionError::PlayerNotFound) | GameServerError::NotInSession => {
                ErrorCode::NotInSession
            }
            GameServerError::SessionNotFound => ErrorCode::SessionNotFound,
            GameServerError::Protocol(_) => ErrorCode::InvalidInput,
            _ => ErrorCode::InternalError,
        };
        ServerMessage::Error(ServerError::new(code, self.to_string()))
    }
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier; replaced on rejoin.
    player_id: PlayerId,
    /// Current session ID (if seated).
    session_id: Option<SessionId>,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session manager.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server with the built-in card pool.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_pool(config, Arc::new(CardPool::builtin()))
    }

    /// Create a new game server drawing lineups from `pool`.
    pub fn with_pool(config: ServerConfig, pool: Arc<CardPool>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            sessions: Arc::new(SessionManager::new(pool)),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Run the server on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let sweep_sessions = self.sessions.clone();
        let cleanup_clients = self.clients.clone();
        let cleanup_sessions = self.sessions.clone();
        let idle_timeout = self.config.idle_timeout;

        // Spawn roll-timeout and reconnect sweep
        let sweep_handle = tokio::spawn(async move {
            Self::run_sweep_loop(sweep_sessions).await;
        });

        // Spawn cleanup task
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, cleanup_sessions, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
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

        sweep_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let config = self.config.clone();
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
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(256);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id: Uuid::new_v4(),
                    session_id: None,
                    last_activity: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                let result = match ClientMessage::parse(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(
                                            addr, client_msg, &clients, &sessions, &config, &msg_tx,
                                        ).await
                                    }
                                    Err(e) => Err(e.into()),
                                };
                                if let Err(e) = result {
                                    debug!("Message from {} refused: {}", addr, e);
                                    let _ = msg_tx.send(e.to_message()).await;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "binary frames are not supported",
                                ))).await;
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
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();
            Self::handle_disconnect(addr, &clients, &sessions).await;
            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), GameServerError> {
        match msg {
            ClientMessage::Join { player_name, vs_cpu, session_id } => {
                Self::handle_join(addr, player_name, vs_cpu, session_id, clients, sessions, config, sender).await
            }
            ClientMessage::Rejoin { session_id, player_id } => {
                Self::handle_rejoin(addr, &session_id, &player_id, clients, sessions, config, sender).await
            }
            ClientMessage::Command { command } => {
                let (player_id, session) = Self::seated(addr, clients, sessions).await?;
                let mut session = session.write().await;
                let result = session.submit(&player_id, command);
                session.flush().await;
                Ok(result?)
            }
            ClientMessage::RollResult { request_id, value } => {
                let (player_id, session) = Self::seated(addr, clients, sessions).await?;
                let mut session = session.write().await;
                let result = session.submit_roll_result(&player_id, request_id, value);
                session.flush().await;
                Ok(result?)
            }
            ClientMessage::SyncRequest => {
                let (_, session) = Self::seated(addr, clients, sessions).await?;
                let snapshot = session.read().await.snapshot();
                let _ = sender.send(ServerMessage::State(snapshot)).await;
                Ok(())
            }
            ClientMessage::Rematch => {
                let (player_id, session) = Self::seated(addr, clients, sessions).await?;
                let mut session = session.write().await;
                let result = session.rematch(&player_id);
                session.flush().await;
                Ok(result?)
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                }).await;
                Ok(())
            }
            ClientMessage::Leave => {
                Self::handle_leave(addr, clients, sessions).await;
                Ok(())
            }
        }
    }

    /// Seat a client in a CPU game, the requested session, or the first
    /// open one.
    #[allow(clippy::too_many_arguments)]
    async fn handle_join(
        addr: SocketAddr,
        player_name: String,
        vs_cpu: bool,
        session_id: Option<String>,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), GameServerError> {
        let player_id = {
            let clients = clients.read().await;
            match clients.get(&addr) {
                Some(c) if c.session_id.is_some() => return Err(SessionError::AlreadyInSession.into()),
                Some(c) => c.player_id,
                None => return Err(GameServerError::NotInSession),
            }
        };

        let id = match (vs_cpu, session_id) {
            (true, _) => sessions.create_session(config.session.clone(), true).await?,
            (false, Some(hex_id)) => parse_session_id(&hex_id)?,
            (false, None) => match sessions.find_open_session().await {
                Some(id) => id,
                None => sessions.create_session(config.session.clone(), false).await?,
            },
        };
        let session = sessions.get_session(&id).await.ok_or(GameServerError::SessionNotFound)?;

        let mut session = session.write().await;
        let side = session.add_player(player_id, player_name.trim().to_string(), sender.clone())?;
        sessions.register_player(player_id, id).await;
        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.session_id = Some(id);
            }
        }

        let _ = sender.send(ServerMessage::Joined(JoinedInfo {
            session_id: hex::encode(id),
            player_id: player_id.to_string(),
            side,
            vs_cpu: session.vs_cpu(),
            server_version: config.version.clone(),
        })).await;

        if session.is_full() {
            session.start()?;
            session.flush().await;
        } else {
            let _ = sender.send(ServerMessage::Waiting { session_id: hex::encode(id) }).await;
        }

        debug!("Client {} seated as {:?}", addr, side);
        Ok(())
    }

    /// Reclaim a held seat from a new connection.
    async fn handle_rejoin(
        addr: SocketAddr,
        session_id: &str,
        player_id: &str,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), GameServerError> {
        let id = parse_session_id(session_id)?;
        let player_id = parse_player_id(player_id)?;
        let session = sessions.get_session(&id).await.ok_or(GameServerError::SessionNotFound)?;

        let mut session = session.write().await;
        let side = session
            .reconnect_player(&player_id, sender.clone(), Instant::now())
            .ok_or(GameServerError::NotInSession)?;
        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.player_id = player_id;
                client.session_id = Some(id);
            }
        }
        sessions.register_player(player_id, id).await;

        let _ = sender.send(ServerMessage::Joined(JoinedInfo {
            session_id: hex::encode(id),
            player_id: player_id.to_string(),
            side,
            vs_cpu: session.vs_cpu(),
            server_version: config.version.clone(),
        })).await;
        let _ = sender.send(ServerMessage::State(session.snapshot())).await;
        session.flush().await;

        info!("Client {} rejoined as {:?}", addr, side);
        Ok(())
    }

    /// Player's id and session, or `NotInSession`.
    async fn seated(
        addr: SocketAddr,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
    ) -> Result<(PlayerId, Arc<RwLock<MatchSession>>), GameServerError> {
        let (player_id, session_id) = {
            let clients = clients.read().await;
            let client = clients.get(&addr).ok_or(GameServerError::NotInSession)?;
            (client.player_id, client.session_id.ok_or(GameServerError::NotInSession)?)
        };
        let session = sessions.get_session(&session_id).await.ok_or(GameServerError::SessionNotFound)?;
        Ok((player_id, session))
    }

    /// Handle player leave.
    async fn handle_leave(addr: SocketAddr, clients: &Clients, sessions: &Arc<SessionManager>) {
        let (player_id, session_id) = {
            let mut clients = clients.write().await;
            match clients.get_mut(&addr) {
                Some(c) => (c.player_id, c.session_id.take()),
                None => return,
            }
        };

        if let Some(session_id) = session_id {
            if let Some(session) = sessions.get_session(&session_id).await {
                let mut session = session.write().await;
                if session.remove_player(&player_id) {
                    let notice = GameEvent::message(session.snapshot().sequence, "Opponent left the game");
                    session.broadcast(ServerMessage::Event(notice)).await;
                    session.flush().await;
                }
            }
            sessions.unregister_player(&player_id).await;
        }
    }

    /// Hold the seat of a dropped client mid-game; free it otherwise.
    async fn handle_disconnect(addr: SocketAddr, clients: &Clients, sessions: &Arc<SessionManager>) {
        let client = clients.write().await.remove(&addr);
        let Some(ConnectedClient { player_id, session_id: Some(session_id), .. }) = client else {
            return;
        };
        let Some(session) = sessions.get_session(&session_id).await else {
            return;
        };

        let mut session = session.write().await;
        if session.state == SessionState::Playing {
            session.mark_disconnected(&player_id, Instant::now());
            debug!("Holding seat for {}", player_id);
        } else {
            session.remove_player(&player_id);
            sessions.unregister_player(&player_id).await;
        }
    }

    /// Cancel overdue client rolls and release seats whose grace ran out.
    async fn run_sweep_loop(sessions: Arc<SessionManager>) {
        let mut interval = interval(Duration::from_secs(1));

        loop {
            interval.tick().await;
            let now = Instant::now();

            for session in sessions.all_sessions().await {
                let mut session = session.write().await;
                if session.state != SessionState::Playing {
                    continue;
                }

                if let Err(e) = session.check_roll_timeout(now) {
                    error!("Roll timeout sweep failed: {}", e);
                }
                for player_id in session.check_reconnect_timeouts(now) {
                    info!("Seat for {} released after grace period", player_id);
                    sessions.unregister_player(&player_id).await;
                }
                session.flush().await;
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Clients, sessions: Arc<SessionManager>, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            // Cleanup idle connections
            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                Self::handle_disconnect(addr, &clients, &sessions).await;
                info!("Removed idle client {}", addr);
            }

            // Cleanup closed sessions
            sessions.cleanup().await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}
