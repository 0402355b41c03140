//! The store's world model: everything the client currently believes

use crate::network::ConnectionState;
use crate::prediction::PredictionLedger;
use serde::Serialize;
use shared::{Bomb, Player, PowerUp, RoomSummary, TileMap};
use std::collections::{BTreeMap, VecDeque};

pub const CHAT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    Menu,
    Lobby,
    Countdown,
    Playing,
    Finished,
}

impl RoomPhase {
    pub fn in_room(self) -> bool {
        self != RoomPhase::Menu
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub max_players: u32,
    /// Room state string as last reported by the server. Informational only.
    pub server_state: String,
}

/// Last position the server reported for a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    pub received_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplosionEvent {
    pub origin_bomb_id: String,
    pub affected_tiles: Vec<(i32, i32)>,
    pub created_at: u64,
    pub display_duration_ms: u64,
}

impl ExplosionEvent {
    pub fn covers(&self, tile: (i32, i32)) -> bool {
        self.affected_tiles.contains(&tile)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub player_id: Option<String>,
    pub player_name: String,
    pub message: String,
    pub timestamp: u64,
    pub system: bool,
}

impl ChatEntry {
    pub fn system(message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            player_id: None,
            player_name: "System".to_string(),
            message: message.into(),
            timestamp,
            system: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub connection: ConnectionState,
    pub room: Option<RoomInfo>,
    pub available_rooms: Vec<RoomSummary>,
    pub phase: RoomPhase,

    pub local_player_id: Option<String>,
    pub local_player_name: String,
    /// Rendered players. The local entry is predicted, remote ones are interpolated.
    pub players: BTreeMap<String, Player>,
    /// Last server-confirmed position per player.
    pub positions: BTreeMap<String, PositionSample>,

    pub map: TileMap,
    pub bombs: BTreeMap<String, Bomb>,
    pub explosions: BTreeMap<String, ExplosionEvent>,
    pub power_ups: BTreeMap<String, PowerUp>,
    pub predictions: PredictionLedger,

    pub chat: VecDeque<ChatEntry>,
    pub chat_visible: bool,

    pub game_timer_ms: u64,
    pub countdown_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub last_server_update: Option<u64>,
    pub frame_rate: u32,
    pub winner: Option<Player>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            room: None,
            available_rooms: Vec::new(),
            phase: RoomPhase::Menu,
            local_player_id: None,
            local_player_name: String::new(),
            players: BTreeMap::new(),
            positions: BTreeMap::new(),
            map: TileMap::default(),
            bombs: BTreeMap::new(),
            explosions: BTreeMap::new(),
            power_ups: BTreeMap::new(),
            predictions: PredictionLedger::default(),
            chat: VecDeque::with_capacity(CHAT_HISTORY_LIMIT),
            chat_visible: false,
            game_timer_ms: 0,
            countdown_ms: None,
            latency_ms: None,
            last_server_update: None,
            frame_rate: 0,
            winner: None,
        }
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.local_player_id
            .as_ref()
            .and_then(|id| self.players.get(id))
    }

    pub fn is_local(&self, player_id: &str) -> bool {
        self.local_player_id.as_deref() == Some(player_id)
    }

    pub fn remote_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(move |p| !self.is_local(&p.id))
    }

    pub fn push_chat(&mut self, entry: ChatEntry) {
        self.chat.push_back(entry);
        while self.chat.len() > CHAT_HISTORY_LIMIT {
            self.chat.pop_front();
        }
    }

    pub fn slice(&self, key: StateKey) -> StateSlice<'_> {
        match key {
            StateKey::Connection => StateSlice::Connection(self.connection),
            StateKey::Room => StateSlice::Room(self.room.as_ref()),
            StateKey::AvailableRooms => StateSlice::AvailableRooms(&self.available_rooms),
            StateKey::Phase => StateSlice::Phase(self.phase),
            StateKey::LocalPlayer => StateSlice::LocalPlayer(self.local_player()),
            StateKey::Players => StateSlice::Players(&self.players),
            StateKey::Positions => StateSlice::Positions(&self.positions),
            StateKey::Map => StateSlice::Map(&self.map),
            StateKey::Bombs => StateSlice::Bombs(&self.bombs),
            StateKey::Explosions => StateSlice::Explosions(&self.explosions),
            StateKey::PowerUps => StateSlice::PowerUps(&self.power_ups),
            StateKey::Predictions => StateSlice::Predictions(&self.predictions),
            StateKey::Chat => StateSlice::Chat(&self.chat, self.chat_visible),
            StateKey::GameTimer => StateSlice::GameTimer(self.game_timer_ms),
            StateKey::Countdown => StateSlice::Countdown(self.countdown_ms),
            StateKey::Latency => StateSlice::Latency(self.latency_ms),
            StateKey::FrameRate => StateSlice::FrameRate(self.frame_rate),
            StateKey::Winner => StateSlice::Winner(self.winner.as_ref()),
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribable parts of [`ClientState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Connection,
    Room,
    AvailableRooms,
    Phase,
    LocalPlayer,
    Players,
    Positions,
    Map,
    Bombs,
    Explosions,
    PowerUps,
    Predictions,
    Chat,
    GameTimer,
    Countdown,
    Latency,
    FrameRate,
    Winner,
}

/// Borrowed view of one [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateSlice<'a> {
    Connection(ConnectionState),
    Room(Option<&'a RoomInfo>),
    AvailableRooms(&'a [RoomSummary]),
    Phase(RoomPhase),
    LocalPlayer(Option<&'a Player>),
    Players(&'a BTreeMap<String, Player>),
    Positions(&'a BTreeMap<String, PositionSample>),
    Map(&'a TileMap),
    Bombs(&'a BTreeMap<String, Bomb>),
    Explosions(&'a BTreeMap<String, ExplosionEvent>),
    PowerUps(&'a BTreeMap<String, PowerUp>),
    Predictions(&'a PredictionLedger),
    Chat(&'a VecDeque<ChatEntry>, bool),
    GameTimer(u64),
    Countdown(Option<u64>),
    Latency(Option<u64>),
    FrameRate(u32),
    Winner(Option<&'a Player>),
}
