//! Types shared between the Bomberman client and anything that speaks its protocol
//!
//! `world` holds the arena entities (tiles, players, bombs, power-ups) and
//! `protocol` the JSON envelopes exchanged over the game WebSocket.

pub mod protocol;
pub mod world;

pub use protocol::{
    ClientMessage, DecodeError, Envelope, GameSnapshot, InputCommand, InputKind, RoomSummary,
    ServerMessage,
};
pub use world::{tile_of, Bomb, Direction, Player, PowerUp, PowerUps, Tile, TileMap};

use std::time::{SystemTime, UNIX_EPOCH};

/// Fraction of base speed added per speed upgrade.
pub const SPEED_BONUS_PER_UPGRADE: f32 = 0.3;
/// How long an explosion stays visible after the server reports it.
pub const EXPLOSION_LIFETIME_MS: u64 = 1000;
pub const DEFAULT_BOMB_TIMER_MS: u64 = 3000;
pub const MAX_PLAYERS_PER_ROOM: u32 = 4;

/// Effective speed for a player given a base speed in tiles per second.
pub fn movement_speed(base: f32, power_ups: &PowerUps) -> f32 {
    base * (1.0 + power_ups.speed_multiplier as f32 * SPEED_BONUS_PER_UPGRADE)
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
