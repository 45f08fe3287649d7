use thiserror::Error;

use crate::PlayerId;
use crate::protocol::{ErrorCode, ServerMessage};

/// Policy failures reported to the connection that caused them. None of
/// these affect the room itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("room is full")]
    RoomFull,
    #[error("game already in progress")]
    GameInProgress,
    #[error("need at least 1 player")]
    NotEnoughPlayers,
    #[error("reconnection failed")]
    ReconnectFailed,
    #[error("slot {0} is still connected")]
    SlotInUse(PlayerId),
    #[error("host disconnected")]
    HostDisconnected,
    #[error("only the host can do that")]
    NotHost,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::RoomFull => ErrorCode::RoomFull,
            RoomError::GameInProgress => ErrorCode::GameInProgress,
            RoomError::NotEnoughPlayers => ErrorCode::NotEnoughPlayers,
            RoomError::ReconnectFailed | RoomError::SlotInUse(_) => ErrorCode::ReconnectFailed,
            RoomError::HostDisconnected => ErrorCode::HostDisconnected,
            RoomError::NotHost => ErrorCode::NotHost,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no free room code after {0} attempts")]
    CodesExhausted(usize),
}

impl RegistryError {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: ErrorCode::RoomUnavailable,
            message: self.to_string(),
        }
    }
}
