//! The closed set of state transitions the store accepts

use crate::error::ActionError;
use crate::network::ConnectionState;
use serde::{Deserialize, Serialize};
use shared::protocol::{
    BombExploded, ChatMessage, GameSnapshot, PowerUpCollected, RoomSnapshot, Welcome,
};
use shared::{Bomb, InputCommand, Player, RoomSummary, TileMap};
use std::time::Duration;

/// A named state transition. Time-dependent variants carry the wall clock
/// (epoch milliseconds) they were produced at so reducers stay deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[serde(rename = "CONNECTION_STATE_CHANGE")]
    ConnectionStateChanged(ConnectionState),
    SetAvailableRooms(Vec<RoomSummary>),
    JoinRoom(Welcome),
    LeaveRoom,
    RoomStateUpdate(RoomSnapshot),
    SetLocalPlayer {
        id: String,
        name: String,
    },
    PlayerJoined {
        player: Player,
        #[serde(default)]
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: String,
        #[serde(default)]
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerMoved {
        player_id: String,
        x: f32,
        y: f32,
        #[serde(default)]
        at: u64,
    },
    /// Moves a remote player's rendered position. Issued by the frame loop only.
    #[serde(rename_all = "camelCase")]
    InterpolateRemote {
        player_id: String,
        x: f32,
        y: f32,
    },
    #[serde(rename_all = "camelCase")]
    PlayerInputPrediction {
        command: InputCommand,
        #[serde(default)]
        applied_at: u64,
    },
    #[serde(rename_all = "camelCase")]
    GameStateUpdate {
        snapshot: GameSnapshot,
        #[serde(default)]
        received_at: u64,
    },
    BombPlaced(Bomb),
    BombExploded {
        data: BombExploded,
        #[serde(default)]
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    ExplosionExpired {
        bomb_id: String,
        /// Creation time of the explosion this expiry belongs to; `None` clears any.
        #[serde(default)]
        created_at: Option<u64>,
    },
    PowerUpCollected(PowerUpCollected),
    MapUpdate(TileMap),
    ChatMessageReceived {
        message: ChatMessage,
        #[serde(default)]
        at: u64,
    },
    ToggleChat,
    #[serde(rename_all = "camelCase")]
    UpdateCountdown {
        remaining_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    UpdateGameTimer {
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    UpdateLatency {
        latency_ms: u64,
    },
    UpdateFrameRate {
        fps: u32,
    },
    GameStarted {
        #[serde(default)]
        at: u64,
    },
    GameEnded {
        #[serde(default)]
        winner: Option<Player>,
        #[serde(default)]
        at: u64,
    },
}

impl Action {
    pub const NAMES: [&'static str; 25] = [
        "CONNECTION_STATE_CHANGE",
        "SET_AVAILABLE_ROOMS",
        "JOIN_ROOM",
        "LEAVE_ROOM",
        "ROOM_STATE_UPDATE",
        "SET_LOCAL_PLAYER",
        "PLAYER_JOINED",
        "PLAYER_LEFT",
        "PLAYER_MOVED",
        "INTERPOLATE_REMOTE",
        "PLAYER_INPUT_PREDICTION",
        "GAME_STATE_UPDATE",
        "BOMB_PLACED",
        "BOMB_EXPLODED",
        "EXPLOSION_EXPIRED",
        "POWER_UP_COLLECTED",
        "MAP_UPDATE",
        "CHAT_MESSAGE_RECEIVED",
        "TOGGLE_CHAT",
        "UPDATE_COUNTDOWN",
        "UPDATE_GAME_TIMER",
        "UPDATE_LATENCY",
        "UPDATE_FRAME_RATE",
        "GAME_STARTED",
        "GAME_ENDED",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::ConnectionStateChanged(_) => "CONNECTION_STATE_CHANGE",
            Action::SetAvailableRooms(_) => "SET_AVAILABLE_ROOMS",
            Action::JoinRoom(_) => "JOIN_ROOM",
            Action::LeaveRoom => "LEAVE_ROOM",
            Action::RoomStateUpdate(_) => "ROOM_STATE_UPDATE",
            Action::SetLocalPlayer { .. } => "SET_LOCAL_PLAYER",
            Action::PlayerJoined { .. } => "PLAYER_JOINED",
            Action::PlayerLeft { .. } => "PLAYER_LEFT",
            Action::PlayerMoved { .. } => "PLAYER_MOVED",
            Action::InterpolateRemote { .. } => "INTERPOLATE_REMOTE",
            Action::PlayerInputPrediction { .. } => "PLAYER_INPUT_PREDICTION",
            Action::GameStateUpdate { .. } => "GAME_STATE_UPDATE",
            Action::BombPlaced(_) => "BOMB_PLACED",
            Action::BombExploded { .. } => "BOMB_EXPLODED",
            Action::ExplosionExpired { .. } => "EXPLOSION_EXPIRED",
            Action::PowerUpCollected(_) => "POWER_UP_COLLECTED",
            Action::MapUpdate(_) => "MAP_UPDATE",
            Action::ChatMessageReceived { .. } => "CHAT_MESSAGE_RECEIVED",
            Action::ToggleChat => "TOGGLE_CHAT",
            Action::UpdateCountdown { .. } => "UPDATE_COUNTDOWN",
            Action::UpdateGameTimer { .. } => "UPDATE_GAME_TIMER",
            Action::UpdateLatency { .. } => "UPDATE_LATENCY",
            Action::UpdateFrameRate { .. } => "UPDATE_FRAME_RATE",
            Action::GameStarted { .. } => "GAME_STARTED",
            Action::GameEnded { .. } => "GAME_ENDED",
        }
    }

    /// Builds an action from its name and a JSON payload (`null` for none).
    pub fn from_named(name: &str, payload: serde_json::Value) -> Result<Action, ActionError> {
        if !Self::NAMES.contains(&name) {
            return Err(ActionError::UnknownAction(name.to_string()));
        }

        let mut tagged = serde_json::Map::new();
        tagged.insert("type".to_string(), serde_json::Value::String(name.to_string()));
        if !payload.is_null() {
            tagged.insert("payload".to_string(), payload);
        }

        serde_json::from_value(serde_json::Value::Object(tagged)).map_err(|source| {
            ActionError::InvalidPayload {
                action: name.to_string(),
                source,
            }
        })
    }
}

/// Follow-up work a reducer asks the store to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dispatch `action` once `delay` has elapsed.
    Schedule { delay: Duration, action: Action },
}
