//! JSON message protocol spoken over the game WebSocket
//!
//! Every frame is a text envelope `{"type": ..., "data": ..., "timestamp": ...}`.
//! Outbound messages serialize directly; inbound ones are decoded in two steps
//! (envelope first, then the payload for the named type) so an unknown type or a
//! malformed payload can be reported without losing the envelope.

use crate::world::{Bomb, Direction, Player, PowerUp, TileMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Ping,
    PlayerInput(InputCommand),
    Chat { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One sampled player intent, immutable once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCommand {
    pub sequence_number: u32,
    #[serde(flatten)]
    pub kind: InputKind,
    #[serde(rename = "timestamp")]
    pub client_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputKind {
    Move {
        direction: Direction,
    },
    #[serde(rename = "bomb")]
    PlaceBomb { x: i32, y: i32 },
    #[serde(rename_all = "camelCase")]
    CollectPowerUp { power_up_id: String, x: i32, y: i32 },
}

impl InputKind {
    pub fn name(&self) -> &'static str {
        match self {
            InputKind::Move { .. } => "move",
            InputKind::PlaceBomb { .. } => "bomb",
            InputKind::CollectPowerUp { .. } => "collectPowerUp",
        }
    }
}

/// Room description sent on join.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSnapshot {
    pub id: String,
    pub players: BTreeMap<String, Player>,
    pub bombs: BTreeMap<String, Bomb>,
    pub map: TileMap,
    pub state: String,
    pub max_players: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub player_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub room: Option<RoomSnapshot>,
}

/// Periodic authoritative snapshot. Absent fields leave the client's copy alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSnapshot {
    pub players: Option<BTreeMap<String, Player>>,
    pub bombs: Option<BTreeMap<String, Bomb>>,
    pub map: Option<TileMap>,
    pub power_ups: Option<BTreeMap<String, PowerUp>>,
    pub state: Option<String>,
    /// Highest input sequence the server has applied for this client, when reported.
    pub last_processed_input: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMoved {
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombExploded {
    pub bomb_id: String,
    /// Affected tiles as `[x, y]` pairs, origin first.
    #[serde(default)]
    pub explosions: Vec<[i32; 2]>,
    #[serde(default)]
    pub map: Option<TileMap>,
    #[serde(default)]
    pub players: Option<BTreeMap<String, Player>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpCollected {
    pub power_up_id: String,
    #[serde(default)]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Countdown {
    /// Remaining countdown in milliseconds.
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameEnded {
    pub winner: Option<Player>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    pub player_id: String,
    pub player_name: String,
    pub message: String,
    /// Server clock, passed through untouched for display.
    pub timestamp: Option<serde_json::Value>,
}

/// Room listing entry returned by the lobby HTTP API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSummary {
    pub id: String,
    pub player_count: u32,
    pub max_players: u32,
    pub state: String,
    pub players: BTreeMap<String, String>,
    pub created_at: Option<String>,
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Pong,
    Welcome(Welcome),
    GameState(GameSnapshot),
    PlayerJoined(Player),
    PlayerLeft(PlayerLeft),
    PlayerMoved(PlayerMoved),
    BombPlaced(Bomb),
    BombExploded(BombExploded),
    PowerUpCollected(PowerUpCollected),
    Countdown(Countdown),
    GameStarted,
    GameEnded(GameEnded),
    Chat(ChatMessage),
    Error(String),
}

#[derive(Debug)]
pub enum DecodeError {
    /// The frame is not a JSON envelope at all.
    Malformed(serde_json::Error),
    UnknownType(String),
    /// The envelope is fine but its payload does not fit the named type.
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "malformed envelope: {err}"),
            DecodeError::UnknownType(kind) => write!(f, "unknown message type '{kind}'"),
            DecodeError::Payload { kind, source } => {
                write!(f, "invalid payload for '{kind}': {source}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(err) => Some(err),
            DecodeError::Payload { source, .. } => Some(source),
            DecodeError::UnknownType(_) => None,
        }
    }
}

impl ServerMessage {
    /// Decodes a text frame into its envelope metadata and typed message.
    pub fn decode(text: &str) -> Result<(Envelope, ServerMessage), DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
        let message = Self::from_envelope(&envelope)?;
        Ok((envelope, message))
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<ServerMessage, DecodeError> {
        let data = &envelope.data;
        let message = match envelope.kind.as_str() {
            "pong" => ServerMessage::Pong,
            "welcome" => ServerMessage::Welcome(payload(envelope)?),
            "gameState" => ServerMessage::GameState(payload_or_default(envelope)?),
            "playerJoined" => ServerMessage::PlayerJoined(payload(envelope)?),
            "playerLeft" => ServerMessage::PlayerLeft(payload(envelope)?),
            "playerMoved" => ServerMessage::PlayerMoved(payload(envelope)?),
            "bombPlaced" => ServerMessage::BombPlaced(payload(envelope)?),
            "bombExploded" => ServerMessage::BombExploded(payload(envelope)?),
            "powerUpCollected" => ServerMessage::PowerUpCollected(payload(envelope)?),
            "countdown" => ServerMessage::Countdown(payload_or_default(envelope)?),
            "gameStarted" => ServerMessage::GameStarted,
            "gameEnded" => ServerMessage::GameEnded(payload_or_default(envelope)?),
            "chat" => ServerMessage::Chat(payload(envelope)?),
            "error" => ServerMessage::Error(match data {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Null => "unspecified server error".to_string(),
                other => other
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            }),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };
        Ok(message)
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Pong => "pong",
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::GameState(_) => "gameState",
            ServerMessage::PlayerJoined(_) => "playerJoined",
            ServerMessage::PlayerLeft(_) => "playerLeft",
            ServerMessage::PlayerMoved(_) => "playerMoved",
            ServerMessage::BombPlaced(_) => "bombPlaced",
            ServerMessage::BombExploded(_) => "bombExploded",
            ServerMessage::PowerUpCollected(_) => "powerUpCollected",
            ServerMessage::Countdown(_) => "countdown",
            ServerMessage::GameStarted => "gameStarted",
            ServerMessage::GameEnded(_) => "gameEnded",
            ServerMessage::Chat(_) => "chat",
            ServerMessage::Error(_) => "error",
        }
    }
}

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, DecodeError> {
    serde_json::from_value(envelope.data.clone()).map_err(|source| DecodeError::Payload {
        kind: envelope.kind.clone(),
        source,
    })
}

fn payload_or_default<T: DeserializeOwned + Default>(envelope: &Envelope) -> Result<T, DecodeError> {
    if envelope.data.is_null() {
        return Ok(T::default());
    }
    payload(envelope)
}
