//! Fixed-rate frame loop: local prediction, remote interpolation and intent flushing
//!
//! The loop never owns game state. Each frame reads the store, dispatches
//! the actions that follow from held input and elapsed time, and pushes
//! queued intents to the connection under a send throttle.

use crate::actions::Action;
use crate::input::{InputEvent, InputManager};
use crate::network::IntentSink;
use crate::state::RoomPhase;
use crate::store::Store;
use crate::ticker::Tick;
use log::{debug, error, info};
use shared::{movement_speed, ClientMessage, GameSnapshot, InputKind};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_rate: u32,
    /// Tiles per second before speed upgrades.
    pub base_speed: f32,
    pub input_throttle: Duration,
    /// Remote players only blend toward samples younger than this.
    pub interpolation_window_ms: u64,
    pub interpolation_factor: f32,
    pub interpolation_threshold: f32,
    pub interpolation_buffer_size: usize,
    pub performance_samples: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            base_speed: 5.0,
            input_throttle: Duration::from_millis(16),
            interpolation_window_ms: 500,
            interpolation_factor: 0.1,
            interpolation_threshold: 0.01,
            interpolation_buffer_size: 3,
            performance_samples: 100,
        }
    }
}

/// Player positions carried by one authoritative snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSample {
    pub received_at: u64,
    pub positions: BTreeMap<String, (f32, f32)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub fps: u32,
    pub average_frame_ms: f32,
    pub frames: u64,
    pub queued_intents: usize,
    pub pending_predictions: usize,
    pub interpolation_buffer: usize,
    /// Mean spacing of buffered snapshots, once two have arrived.
    pub snapshot_interval_ms: Option<u64>,
    pub in_explosion: bool,
}

pub struct SimulationLoop {
    config: LoopConfig,
    running: bool,
    input: InputManager,

    last_frame: Option<Instant>,
    frames: u64,
    frame_times: VecDeque<Duration>,
    fps: u32,
    fps_window_start: Option<Instant>,
    frames_in_window: u32,

    move_progress: f32,
    game_elapsed: Duration,
    snapshots: VecDeque<SnapshotSample>,
    outbox: VecDeque<ClientMessage>,
    last_flush: Option<Instant>,
    requested_pickups: HashSet<String>,
    in_explosion: bool,
}

impl SimulationLoop {
    pub fn new(config: LoopConfig) -> Self {
        let input = InputManager::new(config.input_throttle);
        Self {
            config,
            running: false,
            input,
            last_frame: None,
            frames: 0,
            frame_times: VecDeque::new(),
            fps: 0,
            fps_window_start: None,
            frames_in_window: 0,
            move_progress: 0.0,
            game_elapsed: Duration::ZERO,
            snapshots: VecDeque::new(),
            outbox: VecDeque::new(),
            last_flush: None,
            requested_pickups: HashSet::new(),
            in_explosion: false,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        info!("Starting frame loop at {} Hz", self.config.tick_rate);
        self.running = true;
        self.last_frame = None;
        self.fps_window_start = None;
        self.frames_in_window = 0;
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("Stopping frame loop");
        self.running = false;
        self.move_progress = 0.0;
        self.outbox.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        if event == InputEvent::Blur {
            self.move_progress = 0.0;
        }
        self.input.handle(event);
    }

    pub fn input(&self) -> &InputManager {
        &self.input
    }

    /// Remembers the positions in an authoritative snapshot, keeping the newest few.
    pub fn push_snapshot(&mut self, snapshot: &GameSnapshot, received_at: u64) {
        let Some(players) = snapshot.players.as_ref() else {
            return;
        };
        self.snapshots.push_back(SnapshotSample {
            received_at,
            positions: players
                .iter()
                .map(|(id, p)| (id.clone(), (p.x, p.y)))
                .collect(),
        });
        while self.snapshots.len() > self.config.interpolation_buffer_size {
            self.snapshots.pop_front();
        }
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &SnapshotSample> {
        self.snapshots.iter()
    }

    /// Runs one frame. A failing frame is logged and skipped.
    pub fn frame<S>(&mut self, tick: Tick, store: &mut Store, sink: &mut S)
    where
        S: IntentSink + ?Sized,
    {
        if !self.running {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| self.step(tick, store, sink)));
        if result.is_err() {
            error!("Frame {} panicked; continuing", self.frames);
        }
    }

    fn step<S>(&mut self, tick: Tick, store: &mut Store, sink: &mut S)
    where
        S: IntentSink + ?Sized,
    {
        let dt = self
            .last_frame
            .map_or(Duration::ZERO, |last| tick.at.saturating_duration_since(last));
        self.last_frame = Some(tick.at);
        self.frames += 1;
        self.record_frame_time(dt);

        if store.state().phase == RoomPhase::Playing {
            self.game_elapsed += dt;
            store.dispatch_at(
                Action::UpdateGameTimer {
                    elapsed_ms: self.game_elapsed.as_millis() as u64,
                },
                tick.at,
            );
            self.advance_movement(dt, tick, store);
            self.place_bomb(tick, store);
            self.collect_power_ups(tick, store);
            self.check_explosions(store);
        } else {
            self.game_elapsed = Duration::ZERO;
            self.move_progress = 0.0;
            self.input.take_fresh_move();
            self.input.take_bomb_request();
        }

        self.interpolate_remotes(tick, store);
        self.flush(tick.at, sink);
        self.update_fps(tick, store);
    }

    fn advance_movement(&mut self, dt: Duration, tick: Tick, store: &mut Store) {
        let state = store.state();
        let Some(local) = state.local_player() else {
            return;
        };
        let fresh = self.input.take_fresh_move();
        let Some(direction) = self.input.held_direction() else {
            self.move_progress = 0.0;
            return;
        };
        if !local.is_alive() {
            return;
        }

        if fresh {
            self.move_progress = 1.0;
        } else {
            let speed = movement_speed(self.config.base_speed, &local.power_ups);
            self.move_progress = (self.move_progress + speed * dt.as_secs_f32()).min(1.0);
        }
        if self.move_progress < 1.0 || !self.input.can_send(tick.at) {
            return;
        }

        let (x, y) = local.tile();
        let (dx, dy) = direction.delta();
        if !state.map.is_walkable(x + dx, y + dy) {
            return;
        }

        self.move_progress -= 1.0;
        self.predict_and_queue(InputKind::Move { direction }, tick, store);
    }

    fn place_bomb(&mut self, tick: Tick, store: &mut Store) {
        if !self.input.take_bomb_request() {
            return;
        }
        let Some(local) = store.state().local_player() else {
            return;
        };
        if !local.is_alive() {
            return;
        }
        let (x, y) = local.tile();
        self.predict_and_queue(InputKind::PlaceBomb { x, y }, tick, store);
    }

    fn collect_power_ups(&mut self, tick: Tick, store: &mut Store) {
        let state = store.state();
        let Some(local) = state.local_player() else {
            return;
        };
        let tile = local.tile();

        // Forget requests once the player has left the tile or the item is gone.
        self.requested_pickups.retain(|id| {
            state
                .power_ups
                .get(id)
                .is_some_and(|p| (p.x, p.y) == tile)
        });

        let pickups: Vec<InputKind> = state
            .power_ups
            .values()
            .filter(|p| (p.x, p.y) == tile && !self.requested_pickups.contains(&p.id))
            .map(|p| InputKind::CollectPowerUp {
                power_up_id: p.id.clone(),
                x: p.x,
                y: p.y,
            })
            .collect();

        for kind in pickups {
            if let InputKind::CollectPowerUp { power_up_id, .. } = &kind {
                debug!("Requesting pickup of {}", power_up_id);
                self.requested_pickups.insert(power_up_id.clone());
            }
            self.predict_and_queue(kind, tick, store);
        }
    }

    fn check_explosions(&mut self, store: &Store) {
        let state = store.state();
        let caught = state.local_player().is_some_and(|local| {
            let tile = local.tile();
            state.explosions.values().any(|e| e.covers(tile))
        });
        if caught && !self.in_explosion {
            debug!("Local player is inside an explosion");
        }
        self.in_explosion = caught;
    }

    fn interpolate_remotes(&mut self, tick: Tick, store: &mut Store) {
        let state = store.state();
        let updates: Vec<(String, f32, f32)> = state
            .remote_players()
            .filter_map(|player| {
                let sample = state.positions.get(&player.id)?;
                let age = tick.wall_ms.saturating_sub(sample.received_at);
                if age >= self.config.interpolation_window_ms {
                    return None;
                }
                let dx = sample.x - player.x;
                let dy = sample.y - player.y;
                if dx.hypot(dy) <= self.config.interpolation_threshold {
                    return None;
                }
                let factor = self.config.interpolation_factor;
                Some((
                    player.id.clone(),
                    player.x + dx * factor,
                    player.y + dy * factor,
                ))
            })
            .collect();

        for (player_id, x, y) in updates {
            store.dispatch_at(Action::InterpolateRemote { player_id, x, y }, tick.at);
        }
    }

    fn predict_and_queue(&mut self, kind: InputKind, tick: Tick, store: &mut Store) {
        let command = self.input.next_command(kind, tick.wall_ms);
        debug!(
            "Predicting input {} ({})",
            command.sequence_number,
            command.kind.name()
        );
        self.input.mark_sent(tick.at);
        store.dispatch_at(
            Action::PlayerInputPrediction {
                command: command.clone(),
                applied_at: tick.wall_ms,
            },
            tick.at,
        );
        self.outbox.push_back(ClientMessage::PlayerInput(command));
    }

    fn flush<S>(&mut self, now: Instant, sink: &mut S)
    where
        S: IntentSink + ?Sized,
    {
        if self.outbox.is_empty() {
            return;
        }
        let open = self
            .last_flush
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.input_throttle);
        if !open {
            return;
        }

        self.last_flush = Some(now);
        for message in self.outbox.drain(..) {
            if !sink.send_intent(&message) {
                debug!("Intent dropped; connection unavailable");
            }
        }
    }

    fn record_frame_time(&mut self, dt: Duration) {
        self.frame_times.push_back(dt);
        while self.frame_times.len() > self.config.performance_samples {
            self.frame_times.pop_front();
        }
    }

    fn update_fps(&mut self, tick: Tick, store: &mut Store) {
        self.frames_in_window += 1;
        let start = *self.fps_window_start.get_or_insert(tick.at);
        let elapsed = tick.at.saturating_duration_since(start);
        if elapsed < Duration::from_secs(1) {
            return;
        }

        self.fps = (self.frames_in_window as f32 / elapsed.as_secs_f32()).round() as u32;
        self.frames_in_window = 0;
        self.fps_window_start = Some(tick.at);
        store.dispatch_at(Action::UpdateFrameRate { fps: self.fps }, tick.at);
    }

    pub fn stats(&self, store: &Store) -> FrameStats {
        let average_frame_ms = if self.frame_times.is_empty() {
            0.0
        } else {
            let total: Duration = self.frame_times.iter().sum();
            total.as_secs_f32() * 1000.0 / self.frame_times.len() as f32
        };

        let snapshot_interval_ms = match (self.snapshots.front(), self.snapshots.back()) {
            (Some(first), Some(last)) if self.snapshots.len() > 1 => Some(
                last.received_at.saturating_sub(first.received_at)
                    / (self.snapshots.len() as u64 - 1),
            ),
            _ => None,
        };

        FrameStats {
            fps: self.fps,
            average_frame_ms,
            frames: self.frames,
            queued_intents: self.outbox.len(),
            pending_predictions: store.state().predictions.len(),
            interpolation_buffer: self.snapshots.len(),
            snapshot_interval_ms,
            in_explosion: self.in_explosion,
        }
    }
}

impl Default for SimulationLoop {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}
