//! Server core for a couch-multiplayer falling-block game.
//!
//! Phones join a room as controllers, a shared screen joins as the display,
//! and each room runs its own match loop: one board per player, garbage
//! traded between them, last board standing wins.

pub mod actor;
pub mod board;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod game;
pub mod garbage;
pub mod piece;
pub mod protocol;
pub mod randomizer;
pub mod registry;
pub mod room;
pub mod scoring;

/// Controller slot number, 1 through `MAX_PLAYERS`.
pub type PlayerId = u8;

pub use actor::{RoomHandle, spawn_room};
pub use board::{BoardSnapshot, Cell, GarbageEntry, LockResult, PlayerBoard};
pub use config::ServerConfig;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionIds, Outgoing};
pub use error::{RegistryError, RoomError};
pub use game::{Game, GameEvent, GameResults};
pub use garbage::GarbageManager;
pub use piece::{Piece, PieceKind, Rotation};
pub use protocol::{ClientMessage, ErrorCode, InputAction, RoomPhase, ServerMessage};
pub use randomizer::Randomizer;
pub use registry::RoomRegistry;
pub use room::{Room, RoomConfig};
pub use scoring::{Scoring, Spin};
