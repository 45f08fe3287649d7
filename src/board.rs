use std::collections::VecDeque;

use serde::Serialize;

use crate::constants::{
    BOARD_HEIGHT, BOARD_WIDTH, BUFFER_ROWS, FRAME_MS, GRAVITY_TABLE, LINE_CLEAR_DELAY_MS,
    LOCK_DELAY_MS, MAX_DROPS_PER_TICK, MAX_LOCK_RESETS, NEXT_QUEUE_REVEALED, NEXT_QUEUE_SIZE,
    SOFT_DROP_MULTIPLIER,
};
use crate::piece::{Piece, PieceKind, Rotation};
use crate::randomizer::Randomizer;
use crate::scoring::{ScoreResult, Scoring, Spin};

pub const GARBAGE_CELL: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Block(PieceKind),
    Garbage,
}

impl Cell {
    pub fn id(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::Block(kind) => kind.cell_id(),
            Cell::Garbage => GARBAGE_CELL,
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

pub type Row = [Cell; BOARD_WIDTH];
pub type Grid = [Row; BOARD_HEIGHT];

const EMPTY_ROW: Row = [Cell::Empty; BOARD_WIDTH];

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GarbageEntry {
    pub lines: u32,
    pub gap_column: usize,
}

#[derive(Clone, Debug, Default)]
pub struct GarbageInbox {
    entries: VecDeque<GarbageEntry>,
}

impl GarbageInbox {
    pub fn push(&mut self, entry: GarbageEntry) {
        if entry.lines > 0 {
            self.entries.push_back(entry);
        }
    }

    pub fn total(&self) -> u32 {
        self.entries.iter().map(|e| e.lines).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take_all(&mut self) -> Vec<GarbageEntry> {
        self.entries.drain(..).collect()
    }

    /// Cancels up to `amount` queued lines, oldest first. Returns what is left
    /// of `amount` after netting.
    pub fn cancel(&mut self, mut amount: u32) -> u32 {
        while amount > 0 {
            let Some(front) = self.entries.front_mut() else {
                break;
            };
            if front.lines <= amount {
                amount -= front.lines;
                self.entries.pop_front();
            } else {
                front.lines -= amount;
                amount = 0;
            }
        }
        amount
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockResult {
    pub lines_cleared: u32,
    /// Full rows, in visible coordinates (negative inside the buffer).
    pub full_rows: Vec<i32>,
    pub spin: Spin,
    pub score: Option<ScoreResult>,
    pub alive: bool,
}

#[derive(Clone, Debug)]
struct Clearing {
    rows: Vec<usize>,
    elapsed_ms: f64,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PieceView {
    #[serde(rename = "type")]
    pub kind: PieceKind,
    pub type_id: u8,
    pub rotation: usize,
    pub x: i32,
    pub y: i32,
    pub blocks: Vec<(i32, i32)>,
}

/// What the display needs of one board. Rows and `y` are in visible
/// coordinates; the hidden buffer is not sent.
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub grid: Vec<Vec<u8>>,
    pub current_piece: Option<PieceView>,
    pub ghost_y: Option<i32>,
    pub hold_piece: Option<PieceKind>,
    pub next_pieces: Vec<PieceKind>,
    pub score: u64,
    pub level: u32,
    pub lines: u32,
    pub alive: bool,
    pub pending_garbage: u32,
    pub clearing_rows: Option<Vec<i32>>,
}

fn to_visible_row(row: usize) -> i32 {
    row as i32 - BUFFER_ROWS as i32
}

#[derive(Clone, Debug)]
pub struct PlayerBoard {
    grid: Grid,
    current: Option<Piece>,
    hold: Option<PieceKind>,
    hold_used: bool,
    next: VecDeque<PieceKind>,
    scoring: Scoring,
    randomizer: Randomizer,
    alive: bool,
    lock_timer: Option<f64>,
    lock_resets: u32,
    gravity_counter: f64,
    soft_dropping: bool,
    soft_drop_speed: u32,
    pending: GarbageInbox,
    spin: Spin,
    last_was_rotation: bool,
    clearing: Option<Clearing>,
}

impl PlayerBoard {
    pub fn new(seed: Option<u64>) -> Self {
        let randomizer = match seed {
            Some(seed) => Randomizer::with_seed(seed),
            None => Randomizer::from_entropy(),
        };
        let mut board = Self {
            grid: [EMPTY_ROW; BOARD_HEIGHT],
            current: None,
            hold: None,
            hold_used: false,
            next: VecDeque::with_capacity(NEXT_QUEUE_SIZE + 1),
            scoring: Scoring::new(),
            randomizer,
            alive: true,
            lock_timer: None,
            lock_resets: 0,
            gravity_counter: 0.0,
            soft_dropping: false,
            soft_drop_speed: SOFT_DROP_MULTIPLIER,
            pending: GarbageInbox::default(),
            spin: Spin::None,
            last_was_rotation: false,
            clearing: None,
        };
        board.fill_next_queue();
        board
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_clearing(&self) -> bool {
        self.clearing.is_some()
    }

    pub fn current_piece(&self) -> Option<Piece> {
        self.current
    }

    pub fn hold_piece(&self) -> Option<PieceKind> {
        self.hold
    }

    pub fn next_pieces(&self) -> impl Iterator<Item = PieceKind> + '_ {
        self.next.iter().copied()
    }

    pub fn scoring(&self) -> &Scoring {
        &self.scoring
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn pending_garbage(&self) -> u32 {
        self.pending.total()
    }

    fn fill_next_queue(&mut self) {
        while self.next.len() < NEXT_QUEUE_SIZE + 1 {
            let kind = self.randomizer.next();
            self.next.push_back(kind);
        }
    }

    pub fn is_valid_position(&self, piece: &Piece) -> bool {
        piece.absolute_cells().iter().all(|&(col, row)| {
            (0..BOARD_WIDTH as i32).contains(&col)
                && (0..BOARD_HEIGHT as i32).contains(&row)
                && self.grid[row as usize][col as usize].is_empty()
        })
    }

    fn is_filled_or_outside(&self, col: i32, row: i32) -> bool {
        if !(0..BOARD_WIDTH as i32).contains(&col) || !(0..BOARD_HEIGHT as i32).contains(&row) {
            return true;
        }
        !self.grid[row as usize][col as usize].is_empty()
    }

    fn is_grounded(&self, piece: &Piece) -> bool {
        !self.is_valid_position(&piece.shifted(0, 1))
    }

    fn reset_piece_flags(&mut self) {
        self.lock_timer = None;
        self.lock_resets = 0;
        self.last_was_rotation = false;
        self.spin = Spin::None;
    }

    /// Draws the next kind and places it. Returns `false` and kills the board
    /// when the spawn placement collides.
    pub fn spawn(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.fill_next_queue();
        let Some(kind) = self.next.pop_front() else {
            return false;
        };
        self.fill_next_queue();
        self.hold_used = false;
        self.place_fresh(kind)
    }

    fn place_fresh(&mut self, kind: PieceKind) -> bool {
        self.reset_piece_flags();
        let piece = Piece::new(kind);
        if !self.is_valid_position(&piece) {
            self.current = None;
            self.alive = false;
            return false;
        }
        self.current = Some(piece);
        self.pre_drop();
        true
    }

    // Lowers a fresh piece to the edge of the visible field.
    fn pre_drop(&mut self) {
        let Some(mut piece) = self.current else {
            return;
        };
        let target = BUFFER_ROWS as i32 - 1;
        while piece.y < target {
            let lower = piece.shifted(0, 1);
            if !self.is_valid_position(&lower) {
                break;
            }
            piece = lower;
        }
        self.current = Some(piece);
        self.gravity_counter = 0.0;
    }

    fn active_piece(&self) -> Option<Piece> {
        if !self.alive {
            return None;
        }
        self.current
    }

    pub fn move_left(&mut self) -> bool {
        self.shift(-1)
    }

    pub fn move_right(&mut self) -> bool {
        self.shift(1)
    }

    fn shift(&mut self, dx: i32) -> bool {
        let Some(piece) = self.active_piece() else {
            return false;
        };
        let moved = piece.shifted(dx, 0);
        if !self.is_valid_position(&moved) {
            return false;
        }
        self.current = Some(moved);
        self.last_was_rotation = false;
        self.reset_lock_if_grounded();
        true
    }

    pub fn rotate_cw(&mut self) -> bool {
        self.rotate(true)
    }

    pub fn rotate_ccw(&mut self) -> bool {
        self.rotate(false)
    }

    fn rotate(&mut self, clockwise: bool) -> bool {
        let Some(piece) = self.active_piece() else {
            return false;
        };
        let from = piece.rotation;
        let to = if clockwise { from.rotate_cw() } else { from.rotate_ccw() };
        for &(dx, dy) in piece.kicks(from, to) {
            let test = piece.with_rotation(to).shifted(dx, -dy);
            if self.is_valid_position(&test) {
                self.current = Some(test);
                self.last_was_rotation = true;
                self.spin = self.classify_spin(&test);
                self.reset_lock_if_grounded();
                return true;
            }
        }
        false
    }

    // Three-corner rule around the T centre; both front corners filled is a
    // full spin, otherwise mini.
    fn classify_spin(&self, piece: &Piece) -> Spin {
        if piece.kind != PieceKind::T {
            return Spin::None;
        }
        let (cx, cy) = piece.center();
        let top_left = (cx - 1, cy - 1);
        let top_right = (cx + 1, cy - 1);
        let bottom_left = (cx - 1, cy + 1);
        let bottom_right = (cx + 1, cy + 1);

        let filled = [top_left, top_right, bottom_left, bottom_right]
            .iter()
            .filter(|&&(col, row)| self.is_filled_or_outside(col, row))
            .count();
        if filled < 3 {
            return Spin::None;
        }

        let front = match piece.rotation {
            Rotation::Spawn => [top_left, top_right],
            Rotation::Right => [top_right, bottom_right],
            Rotation::Reverse => [bottom_right, bottom_left],
            Rotation::Left => [bottom_left, top_left],
        };
        let front_filled = front
            .iter()
            .filter(|&&(col, row)| self.is_filled_or_outside(col, row))
            .count();
        if front_filled == 2 { Spin::Full } else { Spin::Mini }
    }

    fn reset_lock_if_grounded(&mut self) {
        let Some(piece) = self.current else {
            return;
        };
        if self.is_grounded(&piece) {
            if self.lock_resets < MAX_LOCK_RESETS {
                self.lock_timer = Some(0.0);
                self.lock_resets += 1;
            }
        } else {
            self.lock_timer = None;
        }
    }

    pub fn soft_drop_start(&mut self, speed: Option<u32>) {
        if !self.soft_dropping {
            self.gravity_counter = 0.0;
        }
        self.soft_dropping = true;
        if let Some(speed) = speed {
            self.soft_drop_speed = speed.max(1);
        }
    }

    pub fn soft_drop_end(&mut self) {
        self.soft_dropping = false;
        self.soft_drop_speed = SOFT_DROP_MULTIPLIER;
    }

    pub fn is_soft_dropping(&self) -> bool {
        self.soft_dropping
    }

    pub fn hard_drop(&mut self) -> Option<LockResult> {
        let mut piece = self.active_piece()?;
        let mut cells = 0;
        loop {
            let lower = piece.shifted(0, 1);
            if !self.is_valid_position(&lower) {
                break;
            }
            piece = lower;
            cells += 1;
        }
        self.current = Some(piece);
        self.scoring.add_hard_drop(cells);
        Some(self.lock_and_process())
    }

    pub fn hold(&mut self) -> bool {
        let Some(piece) = self.active_piece() else {
            return false;
        };
        if self.hold_used {
            return false;
        }
        let next_kind = match self.hold.replace(piece.kind) {
            Some(held) => held,
            None => {
                self.fill_next_queue();
                let Some(kind) = self.next.pop_front() else {
                    return false;
                };
                self.fill_next_queue();
                kind
            }
        };
        self.hold_used = true;
        self.place_fresh(next_kind)
    }

    /// Advances timers by `delta_ms`. Returns a lock result when the lock
    /// delay expires on this tick.
    pub fn tick(&mut self, delta_ms: f64) -> Option<LockResult> {
        if !self.alive {
            return None;
        }

        if let Some(clearing) = self.clearing.as_mut() {
            clearing.elapsed_ms += delta_ms;
            if clearing.elapsed_ms >= LINE_CLEAR_DELAY_MS {
                self.finish_clear();
            }
            return None;
        }

        let mut piece = self.current?;

        if let Some(timer) = self.lock_timer.as_mut() {
            *timer += delta_ms;
        }

        let level = self.scoring.level() as usize;
        let mut gravity_frames = GRAVITY_TABLE[(level - 1).min(GRAVITY_TABLE.len() - 1)];
        if self.soft_dropping {
            gravity_frames = (gravity_frames / self.soft_drop_speed).max(1);
        }
        let gravity_frames = f64::from(gravity_frames);

        self.gravity_counter += delta_ms / FRAME_MS;

        let mut soft_drop_cells = 0;
        let mut drops = 0;
        while self.gravity_counter >= gravity_frames && drops < MAX_DROPS_PER_TICK {
            self.gravity_counter -= gravity_frames;
            drops += 1;
            let lower = piece.shifted(0, 1);
            if self.is_valid_position(&lower) {
                piece = lower;
                if self.soft_dropping {
                    soft_drop_cells += 1;
                }
                if self.is_grounded(&piece) {
                    self.lock_timer.get_or_insert(0.0);
                } else {
                    self.lock_timer = None;
                }
            } else {
                self.lock_timer.get_or_insert(0.0);
                self.gravity_counter = 0.0;
                break;
            }
        }
        if drops >= MAX_DROPS_PER_TICK {
            self.gravity_counter = 0.0;
        }
        self.current = Some(piece);

        if soft_drop_cells > 0 {
            self.scoring.add_soft_drop(soft_drop_cells);
        }

        match self.lock_timer {
            Some(elapsed) if elapsed >= LOCK_DELAY_MS => Some(self.lock_and_process()),
            _ => None,
        }
    }

    fn merge_current(&mut self) {
        let Some(piece) = self.current.take() else {
            return;
        };
        for (col, row) in piece.absolute_cells() {
            if (0..BOARD_WIDTH as i32).contains(&col) && (0..BOARD_HEIGHT as i32).contains(&row) {
                self.grid[row as usize][col as usize] = Cell::Block(piece.kind);
            }
        }
    }

    fn lock_and_process(&mut self) -> LockResult {
        let spin = if self.last_was_rotation { self.spin } else { Spin::None };
        self.merge_current();
        self.reset_piece_flags();

        let full_rows: Vec<usize> = (0..BOARD_HEIGHT)
            .filter(|&row| self.grid[row].iter().all(|cell| !cell.is_empty()))
            .collect();
        let lines_cleared = full_rows.len() as u32;

        let score = if lines_cleared > 0 {
            let score = self.scoring.add_line_clear(lines_cleared, spin);
            self.clearing = Some(Clearing {
                rows: full_rows.clone(),
                elapsed_ms: 0.0,
            });
            score
        } else {
            let score = self.scoring.add_line_clear(0, spin);
            self.scoring.reset_combo();
            self.apply_pending_garbage();
            self.spawn();
            score
        };

        LockResult {
            lines_cleared,
            full_rows: full_rows.into_iter().map(to_visible_row).collect(),
            spin,
            score,
            alive: self.alive,
        }
    }

    fn finish_clear(&mut self) {
        let Some(clearing) = self.clearing.take() else {
            return;
        };
        let removed = clearing.rows.len();
        let mut grid = [EMPTY_ROW; BOARD_HEIGHT];
        let kept = (0..BOARD_HEIGHT).filter(|row| !clearing.rows.contains(row));
        for (dst, src) in (removed..BOARD_HEIGHT).zip(kept) {
            grid[dst] = self.grid[src];
        }
        self.grid = grid;

        self.apply_pending_garbage();
        self.spawn();
    }

    /// Queues garbage; it lands at the next safe point between pieces.
    pub fn add_pending_garbage(&mut self, entry: GarbageEntry) {
        self.pending.push(entry);
    }

    pub fn counter_pending_garbage(&mut self, amount: u32) -> u32 {
        self.pending.cancel(amount)
    }

    fn apply_pending_garbage(&mut self) {
        for entry in self.pending.take_all() {
            self.apply_garbage(entry);
        }
    }

    fn apply_garbage(&mut self, entry: GarbageEntry) {
        let lines = (entry.lines as usize).min(BOARD_HEIGHT);
        if lines == 0 {
            return;
        }
        self.grid.rotate_left(lines);
        let mut row = [Cell::Garbage; BOARD_WIDTH];
        row[entry.gap_column.min(BOARD_WIDTH - 1)] = Cell::Empty;
        for r in &mut self.grid[BOARD_HEIGHT - lines..] {
            *r = row;
        }
    }

    /// Row the current piece would land on. Never mutates the board.
    pub fn ghost_y(&self) -> Option<i32> {
        let mut piece = self.current?;
        loop {
            let lower = piece.shifted(0, 1);
            if !self.is_valid_position(&lower) {
                return Some(piece.y);
            }
            piece = lower;
        }
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let grid = self.grid[BUFFER_ROWS..]
            .iter()
            .map(|row| row.iter().map(|cell| cell.id()).collect())
            .collect();
        let current_piece = self.current.map(|p| PieceView {
            kind: p.kind,
            type_id: p.kind.cell_id(),
            rotation: p.rotation.index(),
            x: p.x,
            y: p.y - BUFFER_ROWS as i32,
            blocks: p.cells().to_vec(),
        });
        BoardSnapshot {
            grid,
            current_piece,
            ghost_y: self.ghost_y().map(|y| y - BUFFER_ROWS as i32),
            hold_piece: self.hold,
            next_pieces: self.next.iter().copied().take(NEXT_QUEUE_REVEALED).collect(),
            score: self.scoring.score(),
            level: self.scoring.level(),
            lines: self.scoring.lines(),
            alive: self.alive,
            pending_garbage: self.pending.total(),
            clearing_rows: self
                .clearing
                .as_ref()
                .map(|c| c.rows.iter().copied().map(to_visible_row).collect()),
        }
    }
}
