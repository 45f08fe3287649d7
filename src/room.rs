use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng as _;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use crate::PlayerId;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::constants::{
    COUNTDOWN_SECONDS, COUNTDOWN_STEP, GO_DELAY, MAX_PLAYERS, PLAYER_COLORS, RECONNECT_GRACE,
    RECONNECT_TOKEN_LENGTH, ROOM_IDLE_TIMEOUT,
};
use crate::error::RoomError;
use crate::game::{Game, GameEvent, GameResults};
use crate::protocol::{
    ClientMessage, CountdownValue, InputAction, LobbyPlayer, RoomPhase, ServerMessage,
};

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Base for join links; the room code is appended as a path segment.
    pub public_url: String,
    /// Fixed match seed. `None` draws a fresh seed per match.
    pub seed: Option<u64>,
    pub reconnect_grace: Duration,
    pub idle_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:4000".to_string(),
            seed: None,
            reconnect_grace: RECONNECT_GRACE,
            idle_timeout: ROOM_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct PlayerSlot {
    conn: Option<ConnectionHandle>,
    name: String,
    color: &'static str,
    token: String,
    connected: bool,
    grace_deadline: Option<Instant>,
}

impl PlayerSlot {
    fn is_live(&self) -> bool {
        self.connected && self.conn.as_ref().is_some_and(ConnectionHandle::is_open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Display,
    Spectator,
    Controller(PlayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountdownStage {
    Counting(u32),
    Go,
}

#[derive(Debug)]
struct Countdown {
    stage: CountdownStage,
    deadline: Option<Instant>,
    paused_left: Option<Duration>,
}

impl Countdown {
    fn value(&self) -> CountdownValue {
        match self.stage {
            CountdownStage::Counting(n) => CountdownValue::Seconds(n),
            CountdownStage::Go => CountdownValue::Go,
        }
    }
}

fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECONNECT_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// One party session: the primary display that opened it, optional
/// spectators, and up to four controller slots.
///
/// All timers are deadlines. The owner calls [`Room::poll`] once
/// [`Room::next_deadline`] has passed and forwards every inbound message
/// through [`Room::connect`], [`Room::receive`] and [`Room::closed`].
#[derive(Debug)]
pub struct Room {
    code: String,
    join_url: String,
    config: RoomConfig,
    display: Option<ConnectionHandle>,
    spectators: Vec<ConnectionHandle>,
    slots: BTreeMap<PlayerId, PlayerSlot>,
    host: Option<PlayerId>,
    phase: RoomPhase,
    paused: bool,
    countdown: Option<Countdown>,
    game: Option<Game>,
    last_results: Option<GameResults>,
    last_activity: Instant,
    destroyed: bool,
}

impl Room {
    pub fn new(code: String, display: ConnectionHandle, config: RoomConfig, now: Instant) -> Self {
        let join_url = format!("{}/{}", config.public_url.trim_end_matches('/'), code);
        display.send(ServerMessage::RoomCreated {
            room_code: code.clone(),
            join_url: join_url.clone(),
        });
        info!(room = %code, %join_url, "room created");
        Self {
            code,
            join_url,
            config,
            display: Some(display),
            spectators: Vec::new(),
            slots: BTreeMap::new(),
            host: None,
            phase: RoomPhase::Lobby,
            paused: false,
            countdown: None,
            game: None,
            last_results: None,
            last_activity: now,
            destroyed: false,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn join_url(&self) -> &str {
        &self.join_url
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    pub fn player_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_connected(&self, id: PlayerId) -> bool {
        self.slots.get(&id).is_some_and(|s| s.connected)
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub fn last_results(&self) -> Option<&GameResults> {
        self.last_results.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn rejoin_ref(&self, id: PlayerId) -> String {
        format!("{}?rejoin={}", self.join_url, id)
    }

    fn roster(&self) -> Vec<LobbyPlayer> {
        self.slots
            .iter()
            .map(|(&id, slot)| LobbyPlayer {
                player_id: id,
                player_name: slot.name.clone(),
                player_color: slot.color,
                connected: slot.connected,
                is_host: self.host == Some(id),
            })
            .collect()
    }

    fn lobby_update(&self) -> ServerMessage {
        ServerMessage::LobbyUpdate {
            player_count: self.slots.len(),
            players: self.roster(),
        }
    }

    fn send_displays(&self, msg: &ServerMessage) {
        for conn in self.display.iter().chain(&self.spectators) {
            conn.send(msg.clone());
        }
    }

    fn send_controllers_except(&self, except: Option<PlayerId>, msg: &ServerMessage) {
        for (&id, slot) in &self.slots {
            if Some(id) == except || !slot.connected {
                continue;
            }
            if let Some(conn) = &slot.conn {
                conn.send(msg.clone());
            }
        }
    }

    fn send_controllers(&self, msg: &ServerMessage) {
        self.send_controllers_except(None, msg);
    }

    fn broadcast(&self, msg: &ServerMessage) {
        self.send_displays(msg);
        self.send_controllers(msg);
    }

    fn send_to_player(&self, id: PlayerId, msg: ServerMessage) {
        if let Some(conn) = self
            .slots
            .get(&id)
            .filter(|s| s.connected)
            .and_then(|s| s.conn.as_ref())
        {
            conn.send(msg);
        }
    }

    fn role_of(&self, conn_id: ConnectionId) -> Option<Role> {
        if self.display.as_ref().is_some_and(|d| d.id() == conn_id) {
            return Some(Role::Display);
        }
        if self.spectators.iter().any(|s| s.id() == conn_id) {
            return Some(Role::Spectator);
        }
        self.slots.iter().find_map(|(&id, slot)| {
            let bound = slot.connected && slot.conn.as_ref().is_some_and(|c| c.id() == conn_id);
            bound.then_some(Role::Controller(id))
        })
    }

    fn handle_of(&self, conn_id: ConnectionId) -> Option<&ConnectionHandle> {
        self.display
            .iter()
            .chain(&self.spectators)
            .chain(self.slots.values().filter_map(|s| s.conn.as_ref()))
            .find(|c| c.id() == conn_id)
    }

    /// Binds a new connection through its first message. Returns `false`
    /// when the connection was not bound; the reason has been sent to it.
    pub fn connect(&mut self, conn: ConnectionHandle, hello: ClientMessage, now: Instant) -> bool {
        if self.destroyed {
            return false;
        }
        self.last_activity = now;
        let result = match hello {
            ClientMessage::Join {
                name, rejoin_id, ..
            } => self.join(conn.clone(), name, rejoin_id, now).map(drop),
            ClientMessage::Rejoin {
                reconnect_token, ..
            } => self.rejoin_by_token(conn.clone(), &reconnect_token, now).map(drop),
            ClientMessage::Spectate { .. } => {
                self.spectate(conn.clone());
                Ok(())
            }
            other => {
                debug!(room = %self.code, message = ?other, "not a room hello");
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                debug!(room = %self.code, %err, "connection rejected");
                conn.send(err.to_message());
                false
            }
        }
    }

    /// Adds a controller. A `rejoin_id` for a free slot reclaims it instead;
    /// if that fails the join proceeds as a fresh one.
    pub fn join(
        &mut self,
        conn: ConnectionHandle,
        name: Option<String>,
        rejoin_id: Option<PlayerId>,
        now: Instant,
    ) -> Result<PlayerId, RoomError> {
        if let Some(id) = rejoin_id {
            match self.rejoin_by_slot(conn.clone(), id, now) {
                Ok(id) => return Ok(id),
                Err(err) => debug!(room = %self.code, player = id, %err, "slot rejoin failed"),
            }
        }

        if self.phase != RoomPhase::Lobby {
            return Err(RoomError::GameInProgress);
        }
        let id = (1..=MAX_PLAYERS)
            .find(|id| !self.slots.contains_key(id))
            .ok_or(RoomError::RoomFull)?;

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Player {id}"));
        let color = PLAYER_COLORS[usize::from(id - 1) % PLAYER_COLORS.len()];
        let token = new_token();
        let is_host = self.host.is_none();
        if is_host {
            self.host = Some(id);
        }

        conn.send(ServerMessage::Joined {
            player_id: id,
            player_name: name.clone(),
            player_color: color,
            reconnect_token: token.clone(),
            is_host,
            reconnected: false,
            player_count: self.slots.len() + 1,
            room_state: self.phase,
        });
        self.slots.insert(
            id,
            PlayerSlot {
                conn: Some(conn),
                name: name.clone(),
                color,
                token,
                connected: true,
                grace_deadline: None,
            },
        );
        info!(room = %self.code, player = id, %name, is_host, "player joined");

        self.send_displays(&ServerMessage::PlayerJoined {
            player_id: id,
            player_name: name,
            player_color: color,
            player_count: self.slots.len(),
        });
        self.send_controllers(&self.lobby_update());
        Ok(id)
    }

    pub fn rejoin_by_token(
        &mut self,
        conn: ConnectionHandle,
        token: &str,
        now: Instant,
    ) -> Result<PlayerId, RoomError> {
        let id = self
            .slots
            .iter()
            .find(|(_, slot)| slot.token == token)
            .map(|(&id, _)| id)
            .ok_or(RoomError::ReconnectFailed)?;
        self.attach(id, conn, now);
        Ok(id)
    }

    pub fn rejoin_by_slot(
        &mut self,
        conn: ConnectionHandle,
        id: PlayerId,
        now: Instant,
    ) -> Result<PlayerId, RoomError> {
        let slot = self.slots.get(&id).ok_or(RoomError::ReconnectFailed)?;
        if slot.is_live() {
            return Err(RoomError::SlotInUse(id));
        }
        self.attach(id, conn, now);
        Ok(id)
    }

    fn attach(&mut self, id: PlayerId, conn: ConnectionHandle, _now: Instant) {
        let token = new_token();
        let phase = self.phase;
        let is_host = self.host == Some(id);
        let player_count = self.slots.len();
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };

        let was_disconnected = !slot.connected;
        if let Some(old) = slot.conn.replace(conn.clone()) {
            if old.id() != conn.id() {
                old.close();
            }
        }
        slot.connected = true;
        slot.grace_deadline = None;
        slot.token = token.clone();

        conn.send(ServerMessage::Joined {
            player_id: id,
            player_name: slot.name.clone(),
            player_color: slot.color,
            reconnect_token: token,
            is_host,
            reconnected: true,
            player_count,
            room_state: phase,
        });
        info!(room = %self.code, player = id, was_disconnected, "player reconnected");

        if was_disconnected && phase != RoomPhase::Lobby {
            let notice = ServerMessage::PlayerReconnected { player_id: id };
            self.send_displays(&notice);
            self.send_controllers_except(Some(id), &notice);
        }

        match phase {
            RoomPhase::Countdown => {
                if let Some(countdown) = &self.countdown {
                    conn.send(ServerMessage::Countdown { value: countdown.value() });
                }
            }
            RoomPhase::Results => {
                if let Some(results) = &self.last_results {
                    conn.send(ServerMessage::GameEnd(results.clone()));
                }
            }
            RoomPhase::Lobby | RoomPhase::Playing => {}
        }
        if self.paused {
            conn.send(ServerMessage::GamePaused);
        }
    }

    pub fn spectate(&mut self, conn: ConnectionHandle) {
        match self.phase {
            RoomPhase::Lobby => conn.send(self.lobby_update()),
            RoomPhase::Countdown => {
                if let Some(countdown) = &self.countdown {
                    conn.send(ServerMessage::Countdown { value: countdown.value() });
                }
            }
            RoomPhase::Playing => {
                conn.send(ServerMessage::GameStart { players: self.roster() });
                for (&id, slot) in &self.slots {
                    if !slot.connected {
                        conn.send(ServerMessage::PlayerDisconnected {
                            player_id: id,
                            rejoin_ref: Some(self.rejoin_ref(id)),
                        });
                    }
                }
            }
            RoomPhase::Results => {
                if let Some(results) = &self.last_results {
                    conn.send(ServerMessage::GameEnd(results.clone()));
                }
            }
        }
        if self.paused {
            conn.send(ServerMessage::GamePaused);
        }
        info!(room = %self.code, conn = %conn.id(), "spectator attached");
        self.spectators.push(conn);
    }

    pub fn receive(&mut self, conn_id: ConnectionId, msg: ClientMessage, now: Instant) {
        if self.destroyed {
            return;
        }
        self.last_activity = now;
        let Some(role) = self.role_of(conn_id) else {
            debug!(room = %self.code, conn = %conn_id, "message from unbound connection");
            return;
        };

        let result = match (role, msg) {
            (_, ClientMessage::Heartbeat) => Ok(()),
            (_, msg) if msg.is_hello() => {
                debug!(room = %self.code, conn = %conn_id, "hello on bound connection");
                Ok(())
            }
            (Role::Controller(id), ClientMessage::Input { action, seq }) => {
                self.input(id, action, seq, now);
                Ok(())
            }
            (Role::Controller(id), ClientMessage::SoftDropStart { speed }) => {
                self.soft_drop_start(id, speed);
                Ok(())
            }
            (Role::Controller(id), ClientMessage::SoftDropEnd) => {
                self.soft_drop_end(id);
                Ok(())
            }
            (role, msg) => self.control(role, msg, now),
        };

        if let Err(err) = result {
            debug!(room = %self.code, conn = %conn_id, %err, "request refused");
            if let Some(conn) = self.handle_of(conn_id) {
                conn.send(err.to_message());
            }
        }
    }

    fn control(&mut self, role: Role, msg: ClientMessage, now: Instant) -> Result<(), RoomError> {
        let privileged = match role {
            Role::Display => true,
            Role::Controller(id) => self.host == Some(id),
            Role::Spectator => false,
        };
        let is_control = matches!(
            msg,
            ClientMessage::StartGame
                | ClientMessage::PauseGame
                | ClientMessage::ResumeGame
                | ClientMessage::ReturnToLobby
                | ClientMessage::PlayAgain
        );
        if is_control && !privileged {
            return Err(RoomError::NotHost);
        }
        match msg {
            ClientMessage::StartGame => self.start(now),
            ClientMessage::PauseGame => {
                self.pause(now);
                Ok(())
            }
            ClientMessage::ResumeGame => {
                self.resume(now);
                Ok(())
            }
            ClientMessage::ReturnToLobby => {
                self.return_to_lobby(now);
                Ok(())
            }
            ClientMessage::PlayAgain => {
                self.play_again(now);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn start(&mut self, now: Instant) -> Result<(), RoomError> {
        if self.phase != RoomPhase::Lobby {
            return Err(RoomError::GameInProgress);
        }
        if self.slots.is_empty() {
            return Err(RoomError::NotEnoughPlayers);
        }
        self.begin_countdown(now);
        Ok(())
    }

    pub fn play_again(&mut self, now: Instant) {
        if self.phase != RoomPhase::Results {
            return;
        }
        self.last_results = None;
        self.begin_countdown(now);
    }

    fn begin_countdown(&mut self, now: Instant) {
        self.game = None;
        self.paused = false;
        self.phase = RoomPhase::Countdown;
        for slot in self.slots.values_mut() {
            slot.grace_deadline = None;
        }
        self.countdown = Some(Countdown {
            stage: CountdownStage::Counting(COUNTDOWN_SECONDS),
            deadline: Some(now + COUNTDOWN_STEP),
            paused_left: None,
        });
        info!(room = %self.code, players = self.slots.len(), "countdown started");
        self.broadcast(&ServerMessage::Countdown {
            value: CountdownValue::Seconds(COUNTDOWN_SECONDS),
        });
    }

    fn advance_countdown(&mut self, now: Instant) {
        loop {
            let Some(countdown) = self.countdown.as_mut() else {
                return;
            };
            let Some(deadline) = countdown.deadline.filter(|d| *d <= now) else {
                return;
            };
            let stage = countdown.stage;
            match stage {
                CountdownStage::Counting(n) if n > 1 => {
                    countdown.stage = CountdownStage::Counting(n - 1);
                    countdown.deadline = Some(deadline + COUNTDOWN_STEP);
                    let value = countdown.value();
                    self.broadcast(&ServerMessage::Countdown { value });
                }
                CountdownStage::Counting(_) => {
                    countdown.stage = CountdownStage::Go;
                    countdown.deadline = Some(deadline + GO_DELAY);
                    self.broadcast(&ServerMessage::Countdown {
                        value: CountdownValue::Go,
                    });
                }
                CountdownStage::Go => {
                    self.countdown = None;
                    self.begin_match(now);
                    return;
                }
            }
        }
    }

    fn begin_match(&mut self, now: Instant) {
        let players: Vec<PlayerId> = self.slots.keys().copied().collect();
        let mut game = Game::new(&players, self.config.seed);
        game.start(now);
        info!(room = %self.code, ?players, seed = game.seed(), "match started");
        self.game = Some(game);
        self.phase = RoomPhase::Playing;

        self.broadcast(&ServerMessage::GameStart { players: self.roster() });
        for (&id, slot) in &self.slots {
            if !slot.connected {
                self.send_displays(&ServerMessage::PlayerDisconnected {
                    player_id: id,
                    rejoin_ref: Some(self.rejoin_ref(id)),
                });
            }
        }
    }

    /// Freezes the countdown or the match. Repeated pauses are no-ops.
    pub fn pause(&mut self, now: Instant) {
        if self.paused {
            return;
        }
        match self.phase {
            RoomPhase::Countdown => {
                let Some(countdown) = self.countdown.as_mut() else {
                    return;
                };
                let left = countdown
                    .deadline
                    .take()
                    .map_or(Duration::ZERO, |d| d.saturating_duration_since(now));
                countdown.paused_left = Some(left);
            }
            RoomPhase::Playing => {
                if !self.game.as_mut().is_some_and(|g| g.pause(now)) {
                    return;
                }
            }
            RoomPhase::Lobby | RoomPhase::Results => return,
        }
        self.paused = true;
        info!(room = %self.code, "paused");
        self.broadcast(&ServerMessage::GamePaused);
    }

    pub fn resume(&mut self, now: Instant) {
        if !self.paused {
            return;
        }
        match self.phase {
            RoomPhase::Countdown => {
                if let Some(countdown) = self.countdown.as_mut() {
                    let left = countdown.paused_left.take().unwrap_or(Duration::ZERO);
                    countdown.deadline = Some(now + left);
                }
            }
            RoomPhase::Playing => {
                if let Some(game) = self.game.as_mut() {
                    game.resume(now);
                }
            }
            RoomPhase::Lobby | RoomPhase::Results => {}
        }
        self.paused = false;
        info!(room = %self.code, "resumed");
        self.broadcast(&ServerMessage::GameResumed);
    }

    pub fn return_to_lobby(&mut self, now: Instant) {
        if self.phase == RoomPhase::Lobby {
            return;
        }
        self.enter_lobby(now);
        self.broadcast(&ServerMessage::ReturnToLobby {
            player_count: self.slots.len(),
        });
    }

    fn enter_lobby(&mut self, now: Instant) {
        self.game = None;
        self.countdown = None;
        self.paused = false;
        self.last_results = None;
        self.phase = RoomPhase::Lobby;
        let grace = self.config.reconnect_grace;
        for slot in self.slots.values_mut().filter(|s| !s.connected) {
            slot.grace_deadline = Some(now + grace);
        }
        info!(room = %self.code, "back to lobby");
    }

    pub fn input(&mut self, id: PlayerId, action: InputAction, seq: Option<u64>, now: Instant) {
        if self.phase != RoomPhase::Playing {
            return;
        }
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let events = game.process_input(id, action, now);
        self.send_to_player(id, ServerMessage::InputAck { seq });
        self.dispatch(events);
    }

    pub fn soft_drop_start(&mut self, id: PlayerId, speed: Option<u32>) {
        if self.phase != RoomPhase::Playing {
            return;
        }
        if let Some(game) = self.game.as_mut() {
            game.soft_drop_start(id, speed);
        }
    }

    pub fn soft_drop_end(&mut self, id: PlayerId) {
        if self.phase != RoomPhase::Playing {
            return;
        }
        if let Some(game) = self.game.as_mut() {
            game.soft_drop_end(id);
        }
    }

    fn dispatch(&mut self, events: Vec<GameEvent>) {
        for event in events {
            match event {
                GameEvent::State(snapshot) => {
                    for player in &snapshot.players {
                        self.send_to_player(
                            player.id,
                            ServerMessage::PlayerState {
                                score: player.board.score,
                                level: player.board.level,
                                lines: player.board.lines,
                                alive: player.board.alive,
                                garbage_incoming: player.board.pending_garbage,
                            },
                        );
                    }
                    self.send_displays(&ServerMessage::GameState(snapshot));
                }
                GameEvent::LineClear {
                    player_id,
                    lines,
                    rows,
                    spin,
                    combo,
                } => self.send_displays(&ServerMessage::LineClear {
                    player_id,
                    lines,
                    rows,
                    spin,
                    combo,
                }),
                GameEvent::GarbageSent(sent) => {
                    self.send_displays(&ServerMessage::GarbageSent(sent));
                }
                GameEvent::PlayerKo { player_id } => {
                    info!(room = %self.code, player = player_id, "player knocked out");
                    self.send_displays(&ServerMessage::PlayerKo { player_id });
                    self.send_to_player(player_id, ServerMessage::GameOver { player_id });
                }
                GameEvent::GameEnd(mut results) => {
                    for r in &mut results.results {
                        r.player_name = self.slots.get(&r.player_id).map(|s| s.name.clone());
                    }
                    info!(
                        room = %self.code,
                        winner = ?results.results.first().map(|r| r.player_id),
                        "match ended"
                    );
                    self.game = None;
                    self.paused = false;
                    self.phase = RoomPhase::Results;
                    self.broadcast(&ServerMessage::GameEnd(results.clone()));
                    self.last_results = Some(results);
                }
            }
        }
    }

    pub fn closed(&mut self, conn_id: ConnectionId, now: Instant) {
        if self.destroyed {
            return;
        }
        match self.role_of(conn_id) {
            Some(Role::Display) => {
                info!(room = %self.code, "display disconnected");
                self.destroy();
            }
            Some(Role::Spectator) => {
                self.spectators.retain(|s| s.id() != conn_id);
            }
            Some(Role::Controller(id)) => self.disconnect(id, now),
            // stale close from a replaced connection
            None => debug!(room = %self.code, conn = %conn_id, "close from unbound connection"),
        }
    }

    fn disconnect(&mut self, id: PlayerId, now: Instant) {
        let grace = self.config.reconnect_grace;
        let phase = self.phase;
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.connected = false;
        slot.conn = None;
        info!(room = %self.code, player = id, ?phase, "player disconnected");

        match phase {
            RoomPhase::Lobby => {
                slot.grace_deadline = Some(now + grace);
            }
            RoomPhase::Countdown | RoomPhase::Playing => {
                self.send_displays(&ServerMessage::PlayerDisconnected {
                    player_id: id,
                    rejoin_ref: Some(self.rejoin_ref(id)),
                });
            }
            RoomPhase::Results => {
                self.enter_lobby(now);
                if self.host == Some(id) {
                    self.reset_session();
                } else {
                    self.slots.remove(&id);
                    self.send_displays(&ServerMessage::PlayerLeft {
                        player_id: id,
                        player_count: self.slots.len(),
                    });
                    self.broadcast(&ServerMessage::ReturnToLobby {
                        player_count: self.slots.len(),
                    });
                }
            }
        }
    }

    /// Host loss outside a match: every controller is told and dropped.
    fn reset_session(&mut self) {
        info!(room = %self.code, "host lost, resetting room");
        self.send_controllers(&RoomError::HostDisconnected.to_message());
        for slot in self.slots.values() {
            if let Some(conn) = &slot.conn {
                conn.close();
            }
        }
        self.slots.clear();
        self.host = None;
        self.send_displays(&ServerMessage::RoomReset);
    }

    fn expire_grace(&mut self, now: Instant) {
        if self.phase != RoomPhase::Lobby {
            return;
        }
        let expired: Vec<PlayerId> = self
            .slots
            .iter()
            .filter(|(_, s)| !s.connected && s.grace_deadline.is_some_and(|d| d <= now))
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            if self.host == Some(id) {
                self.reset_session();
                return;
            }
            self.slots.remove(&id);
            info!(room = %self.code, player = id, "grace expired, slot freed");
            self.send_displays(&ServerMessage::PlayerLeft {
                player_id: id,
                player_count: self.slots.len(),
            });
            self.send_controllers(&self.lobby_update());
        }
    }

    fn idle_deadline(&self) -> Instant {
        self.last_activity + self.config.idle_timeout
    }

    /// Earliest instant at which [`Room::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.destroyed {
            return None;
        }
        let countdown = self.countdown.as_ref().and_then(|c| c.deadline);
        let game = self.game.as_ref().and_then(Game::next_deadline);
        let grace = if self.phase == RoomPhase::Lobby {
            self.slots.values().filter_map(|s| s.grace_deadline).min()
        } else {
            None
        };
        [Some(self.idle_deadline()), countdown, game, grace]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn poll(&mut self, now: Instant) {
        if self.destroyed {
            return;
        }
        if now >= self.idle_deadline() {
            info!(room = %self.code, "idle timeout");
            self.destroy();
            return;
        }
        self.advance_countdown(now);
        if let Some(game) = self.game.as_mut() {
            let events = game.poll(now);
            self.dispatch(events);
        }
        self.expire_grace(now);
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.send_controllers(&ServerMessage::RoomReset);
        for conn in self
            .display
            .iter()
            .chain(&self.spectators)
            .chain(self.slots.values().filter_map(|s| s.conn.as_ref()))
        {
            conn.close();
        }
        self.display = None;
        self.spectators.clear();
        self.slots.clear();
        self.host = None;
        self.game = None;
        self.countdown = None;
        self.last_results = None;
        self.destroyed = true;
        info!(room = %self.code, "room destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionIds, Outgoing};
    use std::cell::RefCell;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        conn: ConnectionHandle,
        rx: UnboundedReceiver<Outgoing>,
    }

    thread_local! {
        static IDS: RefCell<ConnectionIds> = RefCell::new(ConnectionIds::default());
    }

    impl Client {
        fn new() -> Self {
            let id = IDS.with(|ids| ids.borrow_mut().next_id());
            let (conn, rx) = ConnectionHandle::channel(id);
            Self { conn, rx }
        }

        fn drain(&mut self) -> Vec<Outgoing> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn messages(&mut self) -> Vec<ServerMessage> {
            self.drain()
                .into_iter()
                .filter_map(|o| match o {
                    Outgoing::Message(m) => Some(m),
                    Outgoing::Close => None,
                })
                .collect()
        }

        fn token(&mut self) -> String {
            self.messages()
                .into_iter()
                .rev()
                .find_map(|m| match m {
                    ServerMessage::Joined { reconnect_token, .. } => Some(reconnect_token),
                    _ => None,
                })
                .expect("no joined message")
        }
    }

    fn room(now: Instant) -> (Room, Client) {
        let display = Client::new();
        let room = Room::new("ABCD".into(), display.conn.clone(), RoomConfig::default(), now);
        (room, display)
    }

    fn join(room: &mut Room, name: &str, now: Instant) -> (PlayerId, Client) {
        let client = Client::new();
        let id = room
            .join(client.conn.clone(), Some(name.into()), None, now)
            .unwrap();
        (id, client)
    }

    fn run_countdown(room: &mut Room, start: Instant) -> Instant {
        let mut now = start;
        for _ in 0..10 {
            now += Duration::from_millis(500);
            room.poll(now);
        }
        now
    }

    #[test]
    fn first_joiner_hosts_and_ids_start_at_one() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (a, _ca) = join(&mut room, "ann", now);
        let (b, _cb) = join(&mut room, "  ", now);
        assert_eq!((a, b), (1, 2));
        assert_eq!(room.host(), Some(1));
        let joined: Vec<_> = display
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::PlayerJoined { player_name, .. } => Some(player_name),
                _ => None,
            })
            .collect();
        assert_eq!(joined, vec!["ann".to_string(), "Player 2".to_string()]);
    }

    #[test]
    fn fifth_player_is_turned_away() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let _clients: Vec<_> = (0..4).map(|i| join(&mut room, &format!("p{i}"), now)).collect();
        let extra = Client::new();
        assert_eq!(
            room.join(extra.conn.clone(), None, None, now),
            Err(RoomError::RoomFull)
        );
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), RECONNECT_TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn start_without_players_is_refused() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        assert_eq!(room.start(now), Err(RoomError::NotEnoughPlayers));
    }

    #[test]
    fn countdown_then_go_then_match() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (_, _c) = join(&mut room, "ann", now);
        display.drain();
        room.start(now).unwrap();
        assert_eq!(room.phase(), RoomPhase::Countdown);

        room.poll(now + Duration::from_secs(3));
        assert_eq!(room.phase(), RoomPhase::Countdown);
        room.poll(now + Duration::from_millis(3500));
        assert_eq!(room.phase(), RoomPhase::Playing);

        let values: Vec<_> = display
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Countdown { value } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                CountdownValue::Seconds(3),
                CountdownValue::Seconds(2),
                CountdownValue::Seconds(1),
                CountdownValue::Go,
            ]
        );
    }

    #[test]
    fn paused_countdown_keeps_remaining_time() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, _c) = join(&mut room, "ann", now);
        room.start(now).unwrap();
        let paused_at = now + Duration::from_millis(2500);
        room.poll(paused_at);
        room.pause(paused_at);
        room.poll(now + Duration::from_secs(60));
        assert_eq!(room.phase(), RoomPhase::Countdown);

        let resumed = now + Duration::from_secs(60);
        room.resume(resumed);
        // "1" is showing with 500ms left, then the GO delay
        room.poll(resumed + Duration::from_millis(499));
        assert_eq!(room.countdown.as_ref().map(Countdown::value), Some(CountdownValue::Seconds(1)));
        room.poll(resumed + Duration::from_millis(999));
        assert_eq!(room.countdown.as_ref().map(Countdown::value), Some(CountdownValue::Go));
        room.poll(resumed + Duration::from_millis(1000));
        assert_eq!(room.phase(), RoomPhase::Playing);
    }

    #[test]
    fn lobby_disconnect_is_silent_until_grace_expires() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (guest, guest_client) = join(&mut room, "guest", now);
        display.drain();

        room.closed(guest_client.conn.id(), now);
        assert!(display.messages().is_empty());
        assert!(!room.is_connected(guest));

        room.poll(now + RECONNECT_GRACE);
        assert_eq!(room.player_count(), 1);
        assert!(matches!(
            display.messages().as_slice(),
            [ServerMessage::PlayerLeft { player_id: 2, player_count: 1 }]
        ));
    }

    #[test]
    fn lobby_reconnect_within_grace_keeps_the_slot() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (guest, mut guest_client) = join(&mut room, "guest", now);
        let token = guest_client.token();
        room.closed(guest_client.conn.id(), now);
        display.drain();

        let back = Client::new();
        let later = now + Duration::from_secs(10);
        assert_eq!(room.rejoin_by_token(back.conn.clone(), &token, later), Ok(guest));
        room.poll(now + RECONNECT_GRACE + Duration::from_secs(1));
        assert_eq!(room.player_count(), 2);
        assert!(display.messages().is_empty());
    }

    #[test]
    fn host_grace_expiry_resets_everyone() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (_, host) = join(&mut room, "host", now);
        let (_, mut guest) = join(&mut room, "guest", now);
        guest.drain();
        display.drain();

        room.closed(host.conn.id(), now);
        room.poll(now + RECONNECT_GRACE);

        assert_eq!(room.player_count(), 0);
        assert_eq!(room.host(), None);
        let out = guest.drain();
        assert!(out.iter().any(|o| matches!(
            o,
            Outgoing::Message(ServerMessage::Error {
                code: crate::protocol::ErrorCode::HostDisconnected,
                ..
            })
        )));
        assert_eq!(out.last(), Some(&Outgoing::Close));
        assert_eq!(display.messages(), vec![ServerMessage::RoomReset]);
    }

    #[test]
    fn slot_rejoin_needs_a_free_slot() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (id, holder) = join(&mut room, "ann", now);
        let thief = Client::new();
        assert_eq!(
            room.rejoin_by_slot(thief.conn.clone(), id, now),
            Err(RoomError::SlotInUse(id))
        );
        room.closed(holder.conn.id(), now);
        assert_eq!(room.rejoin_by_slot(thief.conn.clone(), id, now), Ok(id));
    }

    #[test]
    fn expired_slot_id_is_reused() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (guest, guest_client) = join(&mut room, "guest", now);
        let (_, _third) = join(&mut room, "third", now);
        room.closed(guest_client.conn.id(), now);
        room.poll(now + RECONNECT_GRACE);
        assert_eq!(room.player_count(), 2);

        let later = now + RECONNECT_GRACE;
        let (id, _late) = join(&mut room, "late", later);
        assert_eq!(id, guest);
    }

    #[test]
    fn rejoin_link_reclaims_slot_mid_match() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (guest, guest_client) = join(&mut room, "guest", now);
        room.start(now).unwrap();
        let now = run_countdown(&mut room, now);
        room.closed(guest_client.conn.id(), now);
        assert!(!room.is_connected(guest));

        let mut back = Client::new();
        assert_eq!(room.join(back.conn.clone(), None, Some(guest), now), Ok(guest));
        assert_eq!(room.phase(), RoomPhase::Playing);
        assert!(room.is_connected(guest));
        assert!(matches!(
            back.messages().first(),
            Some(ServerMessage::Joined { player_id, reconnected: true, .. }) if *player_id == guest
        ));
    }

    #[test]
    fn joins_are_refused_mid_match() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, _c) = join(&mut room, "ann", now);
        room.start(now).unwrap();
        let late = Client::new();
        assert_eq!(
            room.join(late.conn.clone(), None, None, now),
            Err(RoomError::GameInProgress)
        );
    }

    #[test]
    fn only_host_or_display_controls_the_room() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (_, mut guest) = join(&mut room, "guest", now);
        guest.drain();

        room.receive(guest.conn.id(), ClientMessage::StartGame, now);
        assert_eq!(room.phase(), RoomPhase::Lobby);
        assert!(guest.messages().iter().any(|m| matches!(
            m,
            ServerMessage::Error {
                code: crate::protocol::ErrorCode::NotHost,
                ..
            }
        )));
    }

    #[test]
    fn input_is_acknowledged_with_its_sequence() {
        let now = Instant::now();
        let (mut room, _display) = room(now);
        let (_, mut player) = join(&mut room, "ann", now);
        room.start(now).unwrap();
        let now = run_countdown(&mut room, now);
        player.drain();

        room.receive(
            player.conn.id(),
            ClientMessage::Input {
                action: InputAction::Left,
                seq: Some(7),
            },
            now,
        );
        assert!(player
            .messages()
            .contains(&ServerMessage::InputAck { seq: Some(7) }));
    }

    #[test]
    fn results_disconnect_folds_back_to_lobby() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        let (_, _host) = join(&mut room, "host", now);
        let (guest, guest_client) = join(&mut room, "guest", now);
        room.start(now).unwrap();
        let mut now = run_countdown(&mut room, now);

        while room.phase() == RoomPhase::Playing {
            room.input(guest, InputAction::HardDrop, None, now);
            now += Duration::from_millis(1);
        }
        assert_eq!(room.phase(), RoomPhase::Results);
        let results = room.last_results().unwrap();
        assert_eq!(results.results[0].player_name.as_deref(), Some("host"));
        display.drain();

        room.closed(guest_client.conn.id(), now);
        assert_eq!(room.phase(), RoomPhase::Lobby);
        assert!(room.last_results().is_none());
        assert_eq!(room.player_count(), 1);
        assert!(display
            .messages()
            .contains(&ServerMessage::ReturnToLobby { player_count: 1 }));
    }

    #[test]
    fn idle_rooms_destroy_themselves() {
        let now = Instant::now();
        let (mut room, mut display) = room(now);
        assert_eq!(room.next_deadline(), Some(now + ROOM_IDLE_TIMEOUT));
        room.poll(now + ROOM_IDLE_TIMEOUT);
        assert!(room.is_destroyed());
        assert_eq!(display.drain().last(), Some(&Outgoing::Close));
        assert_eq!(room.next_deadline(), None);
    }

    #[test]
    fn spectator_close_keeps_room_but_display_close_destroys_it() {
        let now = Instant::now();
        let (mut room, display) = room(now);
        let mut spectator = Client::new();
        room.spectate(spectator.conn.clone());
        assert!(matches!(
            spectator.messages().as_slice(),
            [ServerMessage::LobbyUpdate { player_count: 0, .. }]
        ));
        room.closed(spectator.conn.id(), now);
        assert!(!room.is_destroyed());
        room.closed(display.conn.id(), now);
        assert!(room.is_destroyed());
    }
}
