//! Wire messages. Both directions are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize, Serializer};

use crate::PlayerId;
use crate::game::{GameResults, GameSnapshot};
use crate::garbage::GarbageSent;
use crate::scoring::Spin;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Left,
    Right,
    RotateCw,
    RotateCcw,
    HardDrop,
    Hold,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    Lobby,
    Countdown,
    Playing,
    Results,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RoomNotFound,
    RoomFull,
    GameInProgress,
    NotEnoughPlayers,
    ReconnectFailed,
    HostDisconnected,
    NotHost,
    RoomUnavailable,
}

/// Countdown tick: whole seconds, then a terminal `"GO"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownValue {
    Seconds(u32),
    Go,
}

impl Serialize for CountdownValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CountdownValue::Seconds(n) => serializer.serialize_u32(*n),
            CountdownValue::Go => serializer.serialize_str("GO"),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Opens a room; the sender becomes its primary display.
    CreateRoom,
    Join {
        room_code: String,
        #[serde(default)]
        name: Option<String>,
        /// Slot to reclaim, from a rejoin link.
        #[serde(default)]
        rejoin_id: Option<PlayerId>,
    },
    Rejoin {
        room_code: String,
        reconnect_token: String,
    },
    Spectate {
        room_code: String,
    },
    StartGame,
    PauseGame,
    ResumeGame,
    ReturnToLobby,
    PlayAgain,
    Input {
        action: InputAction,
        #[serde(default)]
        seq: Option<u64>,
    },
    SoftDropStart {
        #[serde(default)]
        speed: Option<u32>,
    },
    SoftDropEnd,
    Heartbeat,
}

impl ClientMessage {
    /// First-message kinds that bind a connection to a room.
    pub fn is_hello(&self) -> bool {
        matches!(
            self,
            ClientMessage::CreateRoom
                | ClientMessage::Join { .. }
                | ClientMessage::Rejoin { .. }
                | ClientMessage::Spectate { .. }
        )
    }
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub player_id: PlayerId,
    pub player_name: String,
    pub player_color: &'static str,
    pub connected: bool,
    pub is_host: bool,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomCreated {
        room_code: String,
        join_url: String,
    },
    Joined {
        player_id: PlayerId,
        player_name: String,
        player_color: &'static str,
        reconnect_token: String,
        is_host: bool,
        reconnected: bool,
        player_count: usize,
        room_state: RoomPhase,
    },
    LobbyUpdate {
        player_count: usize,
        players: Vec<LobbyPlayer>,
    },
    PlayerJoined {
        player_id: PlayerId,
        player_name: String,
        player_color: &'static str,
        player_count: usize,
    },
    PlayerLeft {
        player_id: PlayerId,
        player_count: usize,
    },
    RoomReset,
    GameStart {
        players: Vec<LobbyPlayer>,
    },
    Countdown {
        value: CountdownValue,
    },
    GameState(GameSnapshot),
    PlayerState {
        score: u64,
        level: u32,
        lines: u32,
        alive: bool,
        garbage_incoming: u32,
    },
    LineClear {
        player_id: PlayerId,
        lines: u32,
        rows: Vec<i32>,
        spin: Spin,
        combo: u32,
    },
    GarbageSent(GarbageSent),
    PlayerKo {
        player_id: PlayerId,
    },
    GameOver {
        player_id: PlayerId,
    },
    GameEnd(GameResults),
    GamePaused,
    GameResumed,
    ReturnToLobby {
        player_count: usize,
    },
    PlayerDisconnected {
        player_id: PlayerId,
        /// Opaque link a display can render (e.g. as a QR code) to reclaim
        /// the slot.
        rejoin_ref: Option<String>,
    },
    PlayerReconnected {
        player_id: PlayerId,
    },
    InputAck {
        seq: Option<u64>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
