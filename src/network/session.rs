//! Match Session Management
//!
//! Owns one authoritative [`GameMachine`] and the seats connected to it.
//! Commands from seats are applied in arrival order; the session rolls dice
//! for the server dice mode and for the CPU, enforces the roll timeout and
//! fans events out to every seat.
//!
//! Every mutating call must be followed by [`MatchSession::flush`] under the
//! same lock, so seats and clients never observe a half-applied batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::rng::{derive_game_seed, DeterministicRng};
use crate::game::card::CardPool;
use crate::game::command::{Command, Issuer, Rejection, RollRequest};
use crate::game::cpu::{self, CpuActor};
use crate::game::dice::DiceSource;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::machine::{GameError, GameMachine, MachineError};
use crate::game::roster::{LineupError, Side};
use crate::game::state::{GameConfig, SessionSnapshot};
use crate::network::protocol::{GameEndInfo, ServerMessage};
use crate::DIE_SIDES;

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Server-assigned player identifier.
pub type PlayerId = Uuid;

/// Keeps the server dice stream apart from the lineup draw.
const DICE_SEED_SALT: u64 = 0xD1CE_D1CE_D1CE_D1CE;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for seats to fill.
    Lobby,
    /// Game in progress.
    Playing,
    /// Game over; a rematch may follow.
    Ended,
    /// Session closed.
    Closed,
}

/// Who produces die faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceMode {
    /// The authority rolls with its seeded RNG.
    Server,
    /// The acting client reports its own physical roll.
    Client,
}

/// Connection state for reconnection support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Player is connected.
    Connected,
    /// Player disconnected, waiting for reconnect.
    Disconnected {
        /// When disconnection occurred.
        since: Instant,
    },
}

/// Configuration for a match session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rules configuration.
    pub game: GameConfig,
    /// Who rolls the dice.
    pub dice_mode: DiceMode,
    /// How long a client may take to report a roll.
    pub roll_timeout: Duration,
    /// How long a dropped seat is held for reconnection.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            dice_mode: DiceMode::Server,
            roll_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(60),
        }
    }
}

/// A human participant holding a seat.
#[derive(Debug)]
pub struct Seat {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Connection state.
    pub connection: ConnectionState,
    /// Message channel to this player.
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Seat {
    /// Check if player is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self.connection, ConnectionState::Connected)
    }
}

/// Session errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Both seats are taken.
    #[error("Session is full")]
    SessionFull,

    /// Player already holds a seat.
    #[error("Already in session")]
    AlreadyInSession,

    /// Game already started.
    #[error("Game in progress")]
    MatchInProgress,

    /// No game in progress.
    #[error("Game not in progress")]
    NotPlaying,

    /// Operation not valid in the current session state.
    #[error("Invalid session state")]
    InvalidState,

    /// Seats are not filled.
    #[error("Waiting for an opponent")]
    PlayersNotReady,

    /// Player holds no seat here.
    #[error("Player not found")]
    PlayerNotFound,

    /// Roll results are only accepted in client dice mode.
    #[error("The server rolls the dice in this session")]
    ServerRollsDice,

    /// The machine refused the command.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The machine hit an unreachable state.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The card pool cannot field two teams.
    #[error(transparent)]
    Pool(#[from] LineupError),
}

impl From<MachineError> for SessionError {
    fn from(err: MachineError) -> Self {
        match err {
            MachineError::Rejected(rejection) => SessionError::Rejected(rejection),
            MachineError::Fatal(err) => SessionError::Game(err),
        }
    }
}

/// A match session.
pub struct MatchSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Current state.
    pub state: SessionState,
    /// Session configuration.
    pub config: SessionConfig,
    /// Human seats.
    seats: BTreeMap<Side, Seat>,
    /// The authority.
    machine: GameMachine,
    /// CPU seat, if any.
    cpu: Option<CpuActor>,
    /// Server dice.
    dice: DeterministicRng,
    /// When the outstanding client roll was requested.
    roll_requested_at: Option<Instant>,
    /// Last roll request sent to a client.
    announced_roll: Option<u64>,
    /// Games started in this session.
    games_played: u64,
    /// Side awarded an abandoned game, until the result is sent.
    forfeit_winner: Option<Side>,
    /// Event broadcast channel.
    event_tx: broadcast::Sender<GameEvent>,
}

impl MatchSession {
    /// Create a new session. A CPU opponent takes the home seat.
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        pool: Arc<CardPool>,
        vs_cpu: bool,
    ) -> Result<Self, SessionError> {
        let (event_tx, _) = broadcast::channel(256);
        let seed = derive_game_seed(&id, &[]);
        let machine = GameMachine::new(id, seed, config.game.clone(), pool)?;

        Ok(Self {
            id,
            state: SessionState::Lobby,
            config,
            seats: BTreeMap::new(),
            machine,
            cpu: vs_cpu.then(|| CpuActor::new(Side::Home)),
            dice: DeterministicRng::new(seed ^ DICE_SEED_SALT),
            roll_requested_at: None,
            announced_roll: None,
            games_played: 0,
            forfeit_winner: None,
            event_tx,
        })
    }

    /// One side is the CPU.
    pub fn vs_cpu(&self) -> bool {
        self.cpu.is_some()
    }

    /// The authority.
    pub fn machine(&self) -> &GameMachine {
        &self.machine
    }

    /// Current read model.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.machine.snapshot()
    }

    /// Seat on a side.
    pub fn seat(&self, side: Side) -> Option<&Seat> {
        self.seats.get(&side)
    }

    /// Side a player is seated on.
    pub fn seat_of(&self, player_id: &PlayerId) -> Option<Side> {
        self.seats
            .iter()
            .find(|(_, seat)| seat.player_id == *player_id)
            .map(|(side, _)| *side)
    }

    /// Get player count.
    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    /// Both sides have a participant.
    pub fn is_full(&self) -> bool {
        self.seats.len() + usize::from(self.cpu.is_some()) >= Side::ALL.len()
    }

    // =========================================================================
    // SEATS
    // =========================================================================

    /// Seat a player on the first free side.
    pub fn add_player(
        &mut self,
        player_id: PlayerId,
        name: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Side, SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::MatchInProgress);
        }
        if self.seat_of(&player_id).is_some() {
            return Err(SessionError::AlreadyInSession);
        }

        let cpu_side = self.cpu.map(|c| c.side);
        let side = Side::ALL
            .into_iter()
            .find(|side| !self.seats.contains_key(side) && cpu_side != Some(*side))
            .ok_or(SessionError::SessionFull)?;

        info!(player = %player_id, %name, ?side, "Player seated");
        self.seats.insert(side, Seat {
            player_id,
            name,
            connection: ConnectionState::Connected,
            sender,
        });
        Ok(side)
    }

    /// Remove a player. Mid-game the remaining seat wins by forfeit and the
    /// session reopens for a new opponent.
    pub fn remove_player(&mut self, player_id: &PlayerId) -> bool {
        let Some(side) = self.seat_of(player_id) else {
            return false;
        };
        self.seats.remove(&side);
        if self.seats.is_empty() {
            self.state = SessionState::Closed;
            return true;
        }
        if self.state == SessionState::Playing {
            // The remaining seat wins and waits for a new opponent.
            info!(?side, "Seat left mid-game; game forfeited");
            self.forfeit_winner = Some(side.opposite());
            self.roll_requested_at = None;
            self.announced_roll = None;
            self.state = SessionState::Lobby;
        } else if self.state == SessionState::Ended {
            self.state = SessionState::Lobby;
        }
        true
    }

    /// Mark a player as disconnected.
    pub fn mark_disconnected(&mut self, player_id: &PlayerId, now: Instant) -> bool {
        match self.seat_of(player_id).and_then(|side| self.seats.get_mut(&side)) {
            Some(seat) => {
                seat.connection = ConnectionState::Disconnected { since: now };
                true
            }
            None => false,
        }
    }

    /// Reconnect a player with a new sender channel. `None` if the player
    /// has no seat or the grace period has passed.
    pub fn reconnect_player(
        &mut self,
        player_id: &PlayerId,
        sender: mpsc::Sender<ServerMessage>,
        now: Instant,
    ) -> Option<Side> {
        let grace = self.config.reconnect_grace;
        let side = self.seat_of(player_id)?;
        let seat = self.seats.get_mut(&side)?;

        if let ConnectionState::Disconnected { since } = seat.connection {
            if now.duration_since(since) > grace {
                return None;
            }
        }
        seat.connection = ConnectionState::Connected;
        seat.sender = sender;
        // Re-send the outstanding roll request on the next flush
        self.announced_roll = None;
        Some(side)
    }

    /// Drop seats disconnected longer than the grace period.
    pub fn check_reconnect_timeouts(&mut self, now: Instant) -> Vec<PlayerId> {
        let grace = self.config.reconnect_grace;
        let timed_out: Vec<PlayerId> = self
            .seats
            .values()
            .filter(|seat| match seat.connection {
                ConnectionState::Disconnected { since } => now.duration_since(since) > grace,
                ConnectionState::Connected => false,
            })
            .map(|seat| seat.player_id)
            .collect();

        for player_id in &timed_out {
            self.remove_player(player_id);
        }
        timed_out
    }

    // =========================================================================
    // GAME
    // =========================================================================

    /// Start a game once every side is filled.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::InvalidState);
        }
        if !self.is_full() {
            return Err(SessionError::PlayersNotReady);
        }

        let mut participants: Vec<[u8; 16]> = self.seats.values().map(|s| s.player_id.into_bytes()).collect();
        participants.sort();
        let seed = derive_game_seed(&self.id, &participants).wrapping_add(self.games_played);

        self.machine.reset(seed);
        self.machine.take_events();
        self.dice = DeterministicRng::new(seed ^ DICE_SEED_SALT);
        self.roll_requested_at = None;
        self.announced_roll = None;
        self.games_played += 1;

        let cpu_is_home = self.cpu.map_or(false, |c| c.side.is_home());
        self.machine.handle(Issuer::Host, Command::StartGame { vs_cpu: self.vs_cpu(), cpu_is_home })?;
        self.state = SessionState::Playing;
        info!(session = %hex::encode(&self.id[..4]), seed, "Game started");

        self.pump()?;
        Ok(())
    }

    /// Apply a command from a seated player.
    pub fn submit(&mut self, player_id: &PlayerId, mut command: Command) -> Result<(), SessionError> {
        if self.state != SessionState::Playing {
            return Err(SessionError::NotPlaying);
        }
        let side = self.seat_of(player_id).ok_or(SessionError::PlayerNotFound)?;

        if let Command::SubmitTeamRoll { roll, .. } = &mut command {
            if self.config.dice_mode == DiceMode::Server {
                *roll = self.dice.roll(DIE_SIDES);
            }
        }

        self.machine.handle(Issuer::Seat(side), command)?;
        self.pump()?;
        Ok(())
    }

    /// Apply a client-reported roll.
    pub fn submit_roll_result(
        &mut self,
        player_id: &PlayerId,
        request_id: u64,
        value: u8,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Playing {
            return Err(SessionError::NotPlaying);
        }
        if self.config.dice_mode != DiceMode::Client {
            return Err(SessionError::ServerRollsDice);
        }
        let side = self.seat_of(player_id).ok_or(SessionError::PlayerNotFound)?;
        let pending = self.machine.pending_roll().ok_or(Rejection::NoPendingRoll)?;
        if pending.side != side {
            return Err(Rejection::NotYourTurn(side).into());
        }

        self.machine.deliver_roll(request_id, value)?;
        self.roll_requested_at = None;
        self.pump()?;
        Ok(())
    }

    /// Run the CPU and the server dice until a human must act. Returns the
    /// number of inputs applied.
    pub fn pump(&mut self) -> Result<usize, SessionError> {
        let mut applied = 0;

        while !self.machine.is_over() {
            // The team contest may have moved the CPU
            if let Some(cpu) = self.cpu.as_mut() {
                cpu.side = Side::from_is_home(self.machine.session().cpu_is_home);
            }

            if let Some(pending) = self.machine.pending_roll() {
                let cpu_rolls = self.cpu.is_some_and(|c| c.side == pending.side);
                if self.config.dice_mode == DiceMode::Client && !cpu_rolls {
                    self.roll_requested_at.get_or_insert_with(Instant::now);
                    break;
                }
                let value = self.dice.roll(DIE_SIDES);
                self.machine.deliver_roll(pending.request_id, value)?;
                applied += 1;
                continue;
            }

            let actors = self.cpu.as_slice();
            if !cpu::step(&mut self.machine, actors, &mut self.dice)? {
                break;
            }
            applied += 1;
        }

        Ok(applied)
    }

    /// Cancel a client roll that has been outstanding longer than the
    /// timeout. The acting side may request it again.
    pub fn check_roll_timeout(&mut self, now: Instant) -> Result<bool, SessionError> {
        let (Some(requested_at), Some(pending)) = (self.roll_requested_at, self.machine.pending_roll()) else {
            return Ok(false);
        };
        if now.duration_since(requested_at) < self.config.roll_timeout {
            return Ok(false);
        }

        warn!(request_id = pending.request_id, side = ?pending.side, "Roll timed out");
        self.machine.cancel_roll(pending.request_id)?;
        self.roll_requested_at = None;
        self.announced_roll = None;
        Ok(true)
    }

    /// Start another game with the same seats.
    pub fn rematch(&mut self, player_id: &PlayerId) -> Result<(), SessionError> {
        if self.seat_of(player_id).is_none() {
            return Err(SessionError::PlayerNotFound);
        }
        if self.state != SessionState::Ended || !self.machine.is_over() {
            return Err(SessionError::InvalidState);
        }
        self.state = SessionState::Lobby;
        self.start()
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Deliver everything the last operation produced: events, a fresh
    /// snapshot, the roll request for a client roller and the final result.
    pub async fn flush(&mut self) {
        if let Some(winner) = self.forfeit_winner.take() {
            self.machine.take_events();
            let info = GameEndInfo { winner: Some(winner), forfeit: true, ..self.end_info() };
            self.broadcast(ServerMessage::GameEnd(info)).await;
            self.broadcast(ServerMessage::Waiting { session_id: hex::encode(self.id) }).await;
            return;
        }

        let events = self.machine.take_events();

        for event in &events {
            if event.data == (GameEventData::TeamsAssigned { swapped: true }) {
                self.swap_seats().await;
            }
            let _ = self.event_tx.send(event.clone());
            self.broadcast(ServerMessage::Event(event.clone())).await;
        }
        if !events.is_empty() {
            self.broadcast(ServerMessage::State(self.machine.snapshot())).await;
        }

        if let Some(pending) = self.machine.pending_roll() {
            if self.config.dice_mode == DiceMode::Client && self.announced_roll != Some(pending.request_id) {
                let request = RollRequest {
                    request_id: pending.request_id,
                    sides: DIE_SIDES,
                    purpose: pending.purpose,
                    side: pending.side,
                };
                self.send_to(pending.side, ServerMessage::RollRequest(request)).await;
                self.announced_roll = Some(pending.request_id);
            }
        }

        if self.machine.is_over() && self.state == SessionState::Playing {
            self.state = SessionState::Ended;
            let info = self.end_info();
            info!(
                session = %hex::encode(&self.id[..4]),
                away = info.away_score,
                home = info.home_score,
                "Game ended"
            );
            self.broadcast(ServerMessage::GameEnd(info)).await;
        }
    }

    async fn swap_seats(&mut self) {
        let away = self.seats.remove(&Side::Away);
        let home = self.seats.remove(&Side::Home);
        if let Some(seat) = away {
            self.seats.insert(Side::Home, seat);
        }
        if let Some(seat) = home {
            self.seats.insert(Side::Away, seat);
        }

        for (side, seat) in &self.seats {
            debug!(player = %seat.player_id, ?side, "Seat changed");
            let _ = seat.sender.send(ServerMessage::SeatChanged { side: *side }).await;
        }
    }

    /// Final result of the current game.
    pub fn end_info(&self) -> GameEndInfo {
        let session = self.machine.session();
        GameEndInfo {
            winner: session.leader(),
            away_score: session.away_score,
            home_score: session.home_score,
            line_score: session.line_score.clone(),
            innings: session.inning,
            final_state_hash: hex::encode(self.machine.state_hash()),
            transcript: self.machine.transcript().to_bytes().ok(),
            forfeit: false,
        }
    }

    /// Subscribe to game events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }

    /// Send a message to one seat.
    pub async fn send_to(&self, side: Side, message: ServerMessage) {
        if let Some(seat) = self.seats.get(&side).filter(|s| s.is_connected()) {
            let _ = seat.sender.send(message).await;
        }
    }

    /// Broadcast a message to all connected players.
    pub async fn broadcast(&self, message: ServerMessage) {
        for seat in self.seats.values() {
            if seat.is_connected() {
                let _ = seat.sender.send(message.clone()).await;
            }
        }
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all active sessions.
pub struct SessionManager {
    /// Card pool every session draws from.
    pool: Arc<CardPool>,
    /// Active sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<MatchSession>>>>,
    /// Player to session mapping.
    player_sessions: RwLock<BTreeMap<PlayerId, SessionId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new(pool: Arc<CardPool>) -> Self {
        Self {
            pool,
            sessions: RwLock::new(BTreeMap::new()),
            player_sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a new session.
    pub async fn create_session(&self, config: SessionConfig, vs_cpu: bool) -> Result<SessionId, SessionError> {
        let id = Uuid::new_v4().into_bytes();
        let session = MatchSession::new(id, config, self.pool.clone(), vs_cpu)?;

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, Arc::new(RwLock::new(session)));

        Ok(id)
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<MatchSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// First two-player session still waiting for an opponent.
    pub async fn find_open_session(&self) -> Option<SessionId> {
        let sessions = self.sessions.read().await;
        for (id, session) in sessions.iter() {
            let s = session.read().await;
            if s.state == SessionState::Lobby && !s.vs_cpu() && !s.is_full() {
                return Some(*id);
            }
        }
        None
    }

    /// Get session for a player.
    pub async fn get_player_session(&self, player_id: &PlayerId) -> Option<Arc<RwLock<MatchSession>>> {
        let player_sessions = self.player_sessions.read().await;
        if let Some(session_id) = player_sessions.get(player_id) {
            self.get_session(session_id).await
        } else {
            None
        }
    }

    /// Register player in a session.
    pub async fn register_player(&self, player_id: PlayerId, session_id: SessionId) {
        let mut player_sessions = self.player_sessions.write().await;
        player_sessions.insert(player_id, session_id);
    }

    /// Unregister player from session.
    pub async fn unregister_player(&self, player_id: &PlayerId) {
        let mut player_sessions = self.player_sessions.write().await;
        player_sessions.remove(player_id);
    }

    /// Remove a session.
    pub async fn remove_session(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// All sessions, for periodic sweeps.
    pub async fn all_sessions(&self) -> Vec<Arc<RwLock<MatchSession>>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Cleanup closed sessions.
    pub async fn cleanup(&self) {
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();

        for (id, session) in sessions.iter() {
            let s = session.read().await;
            if s.state == SessionState::Closed {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            sessions.remove(&id);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(CardPool::builtin()))
    }
}
