//! Client input management with sequencing and change detection

use shared::{Direction, InputCommand, InputKind};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Bomb,
}

impl Key {
    /// Maps a key name (arrows, WASD, space) to a game key.
    pub fn from_name(name: &str) -> Option<Key> {
        match name.to_ascii_lowercase().as_str() {
            "w" | "up" | "arrowup" => Some(Key::Up),
            "s" | "down" | "arrowdown" => Some(Key::Down),
            "a" | "left" | "arrowleft" => Some(Key::Left),
            "d" | "right" | "arrowright" => Some(Key::Right),
            " " | "space" => Some(Key::Bomb),
            _ => None,
        }
    }

    fn is_movement(self) -> bool {
        !matches!(self, Key::Bomb)
    }
}

/// Raw input notifications fed into the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(Key),
    KeyUp(Key),
    /// Focus lost; every key counts as released.
    Blur,
    Focus,
}

/// Tracks pressed keys and turns them into sequenced input commands
pub struct InputManager {
    next_sequence: u32,
    pressed: HashSet<Key>,
    focused: bool,

    // Edge flags, set on press and consumed by the frame loop
    fresh_move: bool,
    bomb_requested: bool,

    throttle: Duration,
    last_input_sent: Option<Instant>,
}

impl InputManager {
    pub fn new(throttle: Duration) -> Self {
        Self {
            next_sequence: 1,
            pressed: HashSet::new(),
            focused: true,
            fresh_move: false,
            bomb_requested: false,
            throttle,
            last_input_sent: None,
        }
    }

    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown(key) => self.key_down(key),
            InputEvent::KeyUp(key) => self.key_up(key),
            InputEvent::Blur => self.blur(),
            InputEvent::Focus => self.focused = true,
        }
    }

    pub fn key_down(&mut self, key: Key) {
        if !self.focused {
            return;
        }
        // Detect press events (current && !previous)
        if self.pressed.insert(key) {
            if key.is_movement() {
                self.fresh_move = true;
            } else {
                self.bomb_requested = true;
            }
        }
    }

    pub fn key_up(&mut self, key: Key) {
        self.pressed.remove(&key);
    }

    /// Releases everything so no key stays stuck while focus is elsewhere.
    pub fn blur(&mut self) {
        self.pressed.clear();
        self.fresh_move = false;
        self.bomb_requested = false;
        self.focused = false;
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.pressed.contains(&key)
    }

    pub fn pressed_count(&self) -> usize {
        self.pressed.len()
    }

    /// Direction implied by the held keys. Vertical wins when both axes are held.
    pub fn held_direction(&self) -> Option<Direction> {
        let axis = |negative: Key, positive: Key| {
            self.is_pressed(positive) as i32 - self.is_pressed(negative) as i32
        };
        let x = axis(Key::Left, Key::Right);
        let y = axis(Key::Up, Key::Down);

        if x.abs() > y.abs() {
            Some(if x > 0 { Direction::Right } else { Direction::Left })
        } else if y != 0 {
            Some(if y > 0 { Direction::Down } else { Direction::Up })
        } else {
            None
        }
    }

    /// True once after a movement key goes down.
    pub fn take_fresh_move(&mut self) -> bool {
        std::mem::take(&mut self.fresh_move)
    }

    /// True once after the bomb key goes down.
    pub fn take_bomb_request(&mut self) -> bool {
        std::mem::take(&mut self.bomb_requested)
    }

    pub fn can_send(&self, now: Instant) -> bool {
        self.last_input_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.throttle)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_input_sent = Some(now);
    }

    /// Wraps an intent in a command carrying the next sequence number.
    pub fn next_command(&mut self, kind: InputKind, timestamp: u64) -> InputCommand {
        let command = InputCommand {
            sequence_number: self.next_sequence,
            kind,
            client_timestamp: timestamp,
        };
        self.next_sequence += 1;
        command
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}
