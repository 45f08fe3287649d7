use std::time::{Duration, Instant};

use serde::Serialize;

use crate::PlayerId;
use crate::board::{BoardSnapshot, LockResult, PlayerBoard};
use crate::constants::{BROADCAST_TICK, LOGIC_TICK, MAX_CATCH_UP_TICKS};
use crate::garbage::{GarbageManager, GarbageSent};
use crate::protocol::InputAction;
use crate::scoring::Spin;

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    #[serde(flatten)]
    pub board: BoardSnapshot,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct GameSnapshot {
    pub players: Vec<PlayerSnapshot>,
    /// Milliseconds of unpaused play.
    pub elapsed: u64,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub player_id: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    pub alive: bool,
    pub score: u64,
    pub lines: u32,
    pub level: u32,
    pub rank: u32,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct GameResults {
    pub elapsed: u64,
    pub results: Vec<PlayerResult>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    State(GameSnapshot),
    LineClear {
        player_id: PlayerId,
        lines: u32,
        rows: Vec<i32>,
        spin: Spin,
        combo: u32,
    },
    PlayerKo {
        player_id: PlayerId,
    },
    GarbageSent(GarbageSent),
    GameEnd(GameResults),
}

#[derive(Debug)]
struct Participant {
    id: PlayerId,
    board: PlayerBoard,
    ko_reported: bool,
}

/// One match: a board per participant, the garbage router between them and
/// the two tick clocks.
///
/// The game never reads the clock itself. Callers pass `now` in and drive it
/// with [`Game::poll`] at or after [`Game::next_deadline`].
#[derive(Debug)]
pub struct Game {
    participants: Vec<Participant>,
    garbage: GarbageManager,
    seed: u64,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    ended_at: Option<Instant>,
    next_logic_tick: Option<Instant>,
    next_broadcast_tick: Option<Instant>,
}

impl Game {
    /// All boards share one seed and so one piece sequence. Without a fixed
    /// seed a fresh one is drawn for the match.
    pub fn new(players: &[PlayerId], seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        let mut garbage = GarbageManager::new(Some(seed));
        let participants = players
            .iter()
            .map(|&id| {
                garbage.add_player(id);
                Participant {
                    id,
                    board: PlayerBoard::new(Some(seed)),
                    ko_reported: false,
                }
            })
            .collect();
        Self {
            participants,
            garbage,
            seed,
            started_at: None,
            paused_at: None,
            ended_at: None,
            next_logic_tick: None,
            next_broadcast_tick: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.participants.iter().map(|p| p.id)
    }

    pub fn board(&self, id: PlayerId) -> Option<&PlayerBoard> {
        self.participants.iter().find(|p| p.id == id).map(|p| &p.board)
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.paused_at.is_none() && self.ended_at.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_some() {
            return;
        }
        for p in &mut self.participants {
            p.board.spawn();
        }
        self.started_at = Some(now);
        self.next_logic_tick = Some(now + LOGIC_TICK);
        self.next_broadcast_tick = Some(now + BROADCAST_TICK);
    }

    pub fn pause(&mut self, now: Instant) -> bool {
        if !self.is_running() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Shifts the start forward by the paused span so `elapsed` skips it.
    pub fn resume(&mut self, now: Instant) -> bool {
        let Some(paused_at) = self.paused_at else {
            return false;
        };
        if self.ended_at.is_some() {
            return false;
        }
        let paused_for = now.saturating_duration_since(paused_at);
        if let Some(started_at) = self.started_at.as_mut() {
            *started_at += paused_for;
        }
        self.paused_at = None;
        self.next_logic_tick = Some(now + LOGIC_TICK);
        self.next_broadcast_tick = Some(now + BROADCAST_TICK);
        true
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let until = self.ended_at.or(self.paused_at).unwrap_or(now);
        until.saturating_duration_since(started_at)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.is_running() {
            return None;
        }
        match (self.next_logic_tick, self.next_broadcast_tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Runs every logic and broadcast tick due at `now`. A task that fell
    /// behind replays at most `MAX_CATCH_UP_TICKS` logic ticks and skips
    /// the rest.
    pub fn poll(&mut self, now: Instant) -> Vec<GameEvent> {
        let mut events = Vec::new();
        if !self.is_running() {
            return events;
        }

        let mut ticks = 0;
        while let Some(due) = self.next_logic_tick {
            if due > now || self.is_ended() {
                break;
            }
            if ticks == MAX_CATCH_UP_TICKS {
                self.next_logic_tick = Some(now + LOGIC_TICK);
                break;
            }
            self.logic_tick(now, &mut events);
            self.next_logic_tick = Some(due + LOGIC_TICK);
            ticks += 1;
        }

        if self.is_ended() {
            return events;
        }

        if let Some(due) = self.next_broadcast_tick.filter(|due| *due <= now) {
            events.push(GameEvent::State(self.snapshot(now)));
            let next = due + BROADCAST_TICK;
            self.next_broadcast_tick = Some(if next <= now { now + BROADCAST_TICK } else { next });
        }

        events
    }

    fn logic_tick(&mut self, now: Instant, events: &mut Vec<GameEvent>) {
        let delta_ms = LOGIC_TICK.as_secs_f64() * 1000.0;
        for idx in 0..self.participants.len() {
            if !self.participants[idx].board.is_alive() {
                continue;
            }
            if let Some(result) = self.participants[idx].board.tick(delta_ms) {
                self.handle_lock(idx, result, events);
            }
            let p = &mut self.participants[idx];
            for entry in self.garbage.take_incoming(p.id) {
                p.board.add_pending_garbage(entry);
            }
        }
        self.report_knockouts(events);
        self.check_win(now, events);
    }

    fn handle_lock(&mut self, idx: usize, result: LockResult, events: &mut Vec<GameEvent>) {
        if result.lines_cleared == 0 {
            return;
        }
        let combo = result.score.as_ref().map_or(0, |s| s.combo);
        let p = &mut self.participants[idx];
        events.push(GameEvent::LineClear {
            player_id: p.id,
            lines: result.lines_cleared,
            rows: result.full_rows,
            spin: result.spin,
            combo,
        });
        let sent = self.garbage.process_line_clear(
            p.id,
            result.lines_cleared,
            result.spin,
            combo,
            &mut p.board,
        );
        if let Some(sent) = sent {
            events.push(GameEvent::GarbageSent(sent));
        }
    }

    fn report_knockouts(&mut self, events: &mut Vec<GameEvent>) {
        for p in &mut self.participants {
            if !p.board.is_alive() && !p.ko_reported {
                p.ko_reported = true;
                self.garbage.remove_player(p.id);
                events.push(GameEvent::PlayerKo { player_id: p.id });
            }
        }
    }

    fn check_win(&mut self, now: Instant, events: &mut Vec<GameEvent>) {
        if self.is_ended() {
            return;
        }
        let total = self.participants.len();
        let alive = self.participants.iter().filter(|p| p.board.is_alive()).count();
        let over = if total >= 2 { alive <= 1 } else { alive == 0 };
        if over {
            self.ended_at = Some(now);
            self.next_logic_tick = None;
            self.next_broadcast_tick = None;
            events.push(GameEvent::GameEnd(self.results(now)));
        }
    }

    /// Applies one discrete input to `id`'s board. Ignored unless the match
    /// is running and the board is alive.
    pub fn process_input(&mut self, id: PlayerId, action: InputAction, now: Instant) -> Vec<GameEvent> {
        let mut events = Vec::new();
        if !self.is_running() {
            return events;
        }
        let Some(idx) = self.participants.iter().position(|p| p.id == id) else {
            return events;
        };
        let board = &mut self.participants[idx].board;
        if !board.is_alive() {
            return events;
        }

        match action {
            InputAction::Left => {
                board.move_left();
            }
            InputAction::Right => {
                board.move_right();
            }
            InputAction::RotateCw => {
                board.rotate_cw();
            }
            InputAction::RotateCcw => {
                board.rotate_ccw();
            }
            InputAction::Hold => {
                board.hold();
            }
            InputAction::HardDrop => {
                if let Some(result) = board.hard_drop() {
                    self.handle_lock(idx, result, &mut events);
                }
            }
        }

        self.report_knockouts(&mut events);
        self.check_win(now, &mut events);
        events
    }

    pub fn soft_drop_start(&mut self, id: PlayerId, speed: Option<u32>) -> bool {
        match self.live_board(id) {
            Some(board) => {
                board.soft_drop_start(speed);
                true
            }
            None => false,
        }
    }

    pub fn soft_drop_end(&mut self, id: PlayerId) -> bool {
        match self.live_board(id) {
            Some(board) => {
                board.soft_drop_end();
                true
            }
            None => false,
        }
    }

    fn live_board(&mut self, id: PlayerId) -> Option<&mut PlayerBoard> {
        if !self.is_running() {
            return None;
        }
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .map(|p| &mut p.board)
            .filter(|board| board.is_alive())
    }

    pub fn snapshot(&self, now: Instant) -> GameSnapshot {
        GameSnapshot {
            players: self
                .participants
                .iter()
                .map(|p| PlayerSnapshot {
                    id: p.id,
                    board: p.board.snapshot(),
                })
                .collect(),
            elapsed: self.elapsed(now).as_millis() as u64,
        }
    }

    /// Ranking: alive boards first, then score descending. Ties keep
    /// participant order.
    pub fn results(&self, now: Instant) -> GameResults {
        let mut results: Vec<PlayerResult> = self
            .participants
            .iter()
            .map(|p| {
                let scoring = p.board.scoring();
                PlayerResult {
                    player_id: p.id,
                    player_name: None,
                    alive: p.board.is_alive(),
                    score: scoring.score(),
                    lines: scoring.lines(),
                    level: scoring.level(),
                    rank: 0,
                }
            })
            .collect();
        results.sort_by(|a, b| b.alive.cmp(&a.alive).then(b.score.cmp(&a.score)));
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i as u32 + 1;
        }
        GameResults {
            elapsed: self.elapsed(now).as_millis() as u64,
            results,
        }
    }
}
