use std::time::Duration;

pub const BOARD_WIDTH: usize = 10;
pub const VISIBLE_HEIGHT: usize = 20;
pub const BUFFER_ROWS: usize = 4; // hidden rows above the visible field
pub const BOARD_HEIGHT: usize = VISIBLE_HEIGHT + BUFFER_ROWS;

pub const SPAWN_X: i32 = 3;
pub const SPAWN_Y: i32 = 0;
pub const NEXT_QUEUE_SIZE: usize = 6;
pub const NEXT_QUEUE_REVEALED: usize = 5;

/// Frames per one-cell descent at 60fps, indexed by `level - 1`.
pub const GRAVITY_TABLE: [u32; 30] = [
    48, 43, 38, 33, 28, 23, 18, 13, 8, 6, // levels 1-10
    5, 5, 5, 4, 4, 4, 3, 3, 3, 2, // levels 11-20
    2, 2, 2, 2, 2, 2, 2, 2, 2, 1, // levels 21-30
];

pub const FRAME_MS: f64 = 1000.0 / 60.0;
pub const SOFT_DROP_MULTIPLIER: u32 = 20;
pub const LOCK_DELAY_MS: f64 = 500.0;
pub const MAX_LOCK_RESETS: u32 = 15;
pub const LINE_CLEAR_DELAY_MS: f64 = 400.0;
pub const MAX_DROPS_PER_TICK: u32 = 5;

pub const LOGIC_TICK: Duration = Duration::from_micros(16_667);
pub const BROADCAST_TICK: Duration = Duration::from_millis(50);
/// Logic ticks replayed at most per poll when the room task falls behind.
pub const MAX_CATCH_UP_TICKS: u32 = 5;

pub const LINE_CLEAR_SCORES: [u64; 5] = [0, 100, 300, 500, 800];
pub const TSPIN_SCORES: [u64; 4] = [400, 800, 1200, 1600];
pub const TSPIN_MINI_SCORES: [u64; 3] = [100, 200, 400];
pub const COMBO_TABLE: [u64; 14] = [0, 50, 50, 100, 100, 150, 150, 200, 200, 250, 250, 300, 300, 350];
pub const BACK_TO_BACK_NUMERATOR: u64 = 3;
pub const BACK_TO_BACK_DENOMINATOR: u64 = 2;
pub const SOFT_DROP_POINTS: u64 = 1;
pub const HARD_DROP_POINTS: u64 = 2;

pub const GARBAGE_TABLE: [u32; 5] = [0, 0, 1, 2, 4];
pub const TSPIN_GARBAGE_MULTIPLIER: u32 = 2;
pub const COMBO_GARBAGE: [u32; 12] = [0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5];

pub const MAX_PLAYERS: u8 = 4;
pub const ROOM_CODE_LENGTH: usize = 4;
pub const ROOM_CODE_ATTEMPTS: usize = 1000;
pub const RECONNECT_TOKEN_LENGTH: usize = 32;
pub const RECONNECT_GRACE: Duration = Duration::from_secs(30);
pub const ROOM_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const COUNTDOWN_SECONDS: u32 = 3;
pub const COUNTDOWN_STEP: Duration = Duration::from_secs(1);
pub const GO_DELAY: Duration = Duration::from_millis(500);

pub const PLAYER_COLORS: [&str; 4] = ["#FF6B6B", "#4ECDC4", "#FFE66D", "#A78BFA"];
