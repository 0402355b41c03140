//! World entities exchanged with the game server

use serde::{Deserialize, Serialize};

/// A single cell of the arena grid.
///
/// Encoded on the wire as the integer the server stores in its map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Tile {
    Empty,
    Wall,
    Block,
}

impl From<u8> for Tile {
    fn from(value: u8) -> Self {
        match value {
            0 => Tile::Empty,
            1 => Tile::Wall,
            // Anything else the server may add later is treated as solid.
            _ => Tile::Block,
        }
    }
}

impl From<Tile> for u8 {
    fn from(tile: Tile) -> Self {
        match tile {
            Tile::Empty => 0,
            Tile::Wall => 1,
            Tile::Block => 2,
        }
    }
}

/// Row-major tile grid, `tiles[y][x]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileMap {
    pub tiles: Vec<Vec<Tile>>,
}

impl TileMap {
    pub fn new(tiles: Vec<Vec<Tile>>) -> Self {
        Self { tiles }
    }

    /// Builds an open arena of the given size surrounded by walls.
    pub fn bordered(width: usize, height: usize) -> Self {
        let tiles = (0..height)
            .map(|y| {
                (0..width)
                    .map(|x| {
                        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                            Tile::Wall
                        } else {
                            Tile::Empty
                        }
                    })
                    .collect()
            })
            .collect();
        Self { tiles }
    }

    pub fn width(&self) -> usize {
        self.tiles.first().map_or(0, Vec::len)
    }

    pub fn height(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() || self.width() == 0
    }

    pub fn get(&self, x: i32, y: i32) -> Option<Tile> {
        if x < 0 || y < 0 {
            return None;
        }
        self.tiles
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
    }

    pub fn set(&mut self, x: i32, y: i32, tile: Tile) -> bool {
        if x < 0 || y < 0 {
            return false;
        }
        match self
            .tiles
            .get_mut(y as usize)
            .and_then(|row| row.get_mut(x as usize))
        {
            Some(cell) => {
                *cell = tile;
                true
            }
            None => false,
        }
    }

    /// Movement validation shared by prediction and the frame loop: the
    /// target must be inside the grid and empty.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        matches!(self.get(x, y), Some(Tile::Empty))
    }

    /// Same check for a continuous position, using the tile it rounds to.
    pub fn is_walkable_at(&self, x: f32, y: f32) -> bool {
        let (tx, ty) = tile_of(x, y);
        self.is_walkable(tx, ty)
    }
}

/// Tile containing a continuous position.
pub fn tile_of(x: f32, y: f32) -> (i32, i32) {
    (x.round() as i32, y.round() as i32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit step in tile coordinates (y grows downwards).
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// Upgrade counters carried by each player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUps {
    /// Extra simultaneous bombs beyond the first.
    #[serde(rename = "bombs", default)]
    pub bomb_capacity: u32,
    /// Extra tiles of blast reach.
    #[serde(rename = "flames", default)]
    pub blast_radius: u32,
    /// Number of speed upgrades; each adds 30% to movement speed.
    #[serde(rename = "speed", default)]
    pub speed_multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(rename = "lives", default)]
    pub lives_remaining: u32,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub power_ups: PowerUps,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            x,
            y,
            lives_remaining: 3,
            score: 0,
            power_ups: PowerUps::default(),
        }
    }

    pub fn tile(&self) -> (i32, i32) {
        tile_of(self.x, self.y)
    }

    pub fn is_alive(&self) -> bool {
        self.lives_remaining > 0
    }

    /// Bombs this player may have on the board at once.
    pub fn max_bombs(&self) -> usize {
        1 + self.power_ups.bomb_capacity as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bomb {
    pub id: String,
    #[serde(rename = "playerId", alias = "ownerId", default)]
    pub owner_id: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    /// Fuse length in milliseconds as reported by the server.
    #[serde(default)]
    pub timer: u64,
    /// Placement time in epoch milliseconds, server-provided or stamped on receipt.
    #[serde(default)]
    pub placed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUp {
    pub id: String,
    #[serde(alias = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}
