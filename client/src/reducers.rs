//! Pure state transitions for every [`Action`]
//!
//! `reduce` is a deterministic function of the current state and the action
//! payload. Anything time-based arrives in the payload; anything that must
//! happen later is returned as an [`Effect`] for the store to schedule.

use crate::actions::{Action, Effect};
use crate::state::{ChatEntry, ClientState, ExplosionEvent, PositionSample, RoomInfo, RoomPhase};
use log::{debug, warn};
use shared::protocol::{BombExploded, ChatMessage, GameSnapshot, RoomSnapshot, Welcome};
use shared::{Bomb, InputCommand, InputKind, Player, DEFAULT_BOMB_TIMER_MS, EXPLOSION_LIFETIME_MS};
use std::collections::BTreeMap;
use std::time::Duration;

/// Largest position disagreement, in tiles, tolerated before snapping to the server.
pub const RECONCILE_EPSILON: f32 = 1e-3;

/// Prefix of bomb ids created by local prediction.
pub const PREDICTED_BOMB_PREFIX: &str = "predicted-";

pub fn reduce(state: &mut ClientState, action: Action) -> Vec<Effect> {
    let mut effects = Vec::new();

    match action {
        Action::ConnectionStateChanged(connection) => state.connection = connection,
        Action::SetAvailableRooms(rooms) => state.available_rooms = rooms,
        Action::JoinRoom(welcome) => join_room(state, welcome),
        Action::LeaveRoom => leave_room(state),
        Action::RoomStateUpdate(snapshot) => apply_room(state, snapshot),
        Action::SetLocalPlayer { id, name } => {
            state.local_player_id = Some(id);
            state.local_player_name = name;
        }
        Action::PlayerJoined { player, at } => {
            let name = display_name(&player);
            state.players.insert(player.id.clone(), player);
            state.push_chat(ChatEntry::system(format!("{name} joined the game"), at));
        }
        Action::PlayerLeft { player_id, at } => {
            state.positions.remove(&player_id);
            if let Some(player) = state.players.remove(&player_id) {
                let name = display_name(&player);
                state.push_chat(ChatEntry::system(format!("{name} left the game"), at));
            }
        }
        Action::PlayerMoved {
            player_id,
            x,
            y,
            at,
        } => player_moved(state, player_id, x, y, at),
        Action::InterpolateRemote { player_id, x, y } => {
            if state.is_local(&player_id) {
                warn!("Refusing to interpolate the local player");
            } else if let Some(player) = state.players.get_mut(&player_id) {
                player.x = x;
                player.y = y;
            }
        }
        Action::PlayerInputPrediction {
            command,
            applied_at,
        } => predict(state, command, applied_at),
        Action::GameStateUpdate {
            snapshot,
            received_at,
        } => reconcile(state, snapshot, received_at),
        Action::BombPlaced(bomb) => bomb_placed(state, bomb),
        Action::BombExploded { data, at } => {
            if let Some(effect) = bomb_exploded(state, data, at) {
                effects.push(effect);
            }
        }
        Action::ExplosionExpired {
            bomb_id,
            created_at,
        } => {
            let current = state.explosions.get(&bomb_id).map(|e| e.created_at);
            match (current, created_at) {
                (Some(current), Some(expected)) if current != expected => {
                    debug!("Keeping newer explosion {}", bomb_id);
                }
                (Some(_), _) => {
                    state.explosions.remove(&bomb_id);
                }
                (None, _) => {}
            }
        }
        Action::PowerUpCollected(collected) => {
            state.power_ups.remove(&collected.power_up_id);
        }
        Action::MapUpdate(map) => state.map = map,
        Action::ChatMessageReceived { message, at } => chat_received(state, message, at),
        Action::ToggleChat => state.chat_visible = !state.chat_visible,
        Action::UpdateCountdown { remaining_ms } => state.countdown_ms = Some(remaining_ms),
        Action::UpdateGameTimer { elapsed_ms } => state.game_timer_ms = elapsed_ms,
        Action::UpdateLatency { latency_ms } => state.latency_ms = Some(latency_ms),
        Action::UpdateFrameRate { fps } => state.frame_rate = fps,
        Action::GameStarted { at } => {
            if transition(
                state,
                &[RoomPhase::Lobby, RoomPhase::Countdown],
                RoomPhase::Playing,
            ) {
                state.countdown_ms = None;
                state.game_timer_ms = 0;
                state.winner = None;
                state.push_chat(ChatEntry::system("Game started!", at));
            }
        }
        Action::GameEnded { winner, at } => {
            if transition(state, &[RoomPhase::Playing], RoomPhase::Finished) {
                let message = match &winner {
                    Some(player) => format!("{} wins!", display_name(player)),
                    None => "Game over".to_string(),
                };
                state.push_chat(ChatEntry::system(message, at));
            }
            state.winner = winner;
        }
    }

    effects
}

/// Moves `phase` to `to` when it is currently one of `from`.
fn transition(state: &mut ClientState, from: &[RoomPhase], to: RoomPhase) -> bool {
    if from.contains(&state.phase) {
        debug!("Phase {:?} -> {:?}", state.phase, to);
        state.phase = to;
        true
    } else {
        debug!("No transition from {:?} to {:?}", state.phase, to);
        false
    }
}

fn display_name(player: &Player) -> String {
    if player.name.is_empty() {
        player.id.clone()
    } else {
        player.name.clone()
    }
}

fn join_room(state: &mut ClientState, welcome: Welcome) {
    let entered = welcome
        .room
        .as_ref()
        .map_or(RoomPhase::Lobby, |room| joined_phase(&room.state));
    state.local_player_id = Some(welcome.player_id);
    state.predictions.clear();
    state.explosions.clear();
    state.winner = None;

    match welcome.room {
        Some(room) => apply_room(state, room),
        None => {
            state.room = Some(RoomInfo {
                id: welcome.room_id,
                max_players: shared::MAX_PLAYERS_PER_ROOM,
                server_state: String::new(),
            });
        }
    }

    let name = state.local_player().map(|player| player.name.clone());
    if let Some(name) = name {
        if state.local_player_name.is_empty() {
            state.local_player_name = name;
        }
    }
    transition(state, &[RoomPhase::Menu], entered);
}

/// Phase entered on joining a room the server reports in `server_state`.
fn joined_phase(server_state: &str) -> RoomPhase {
    match server_state {
        "countdown" => RoomPhase::Countdown,
        "playing" => RoomPhase::Playing,
        _ => RoomPhase::Lobby,
    }
}

fn leave_room(state: &mut ClientState) {
    transition(
        state,
        &[
            RoomPhase::Lobby,
            RoomPhase::Countdown,
            RoomPhase::Playing,
            RoomPhase::Finished,
        ],
        RoomPhase::Menu,
    );
    state.room = None;
    state.local_player_id = None;
    state.players.clear();
    state.positions.clear();
    state.map = Default::default();
    state.bombs.clear();
    state.explosions.clear();
    state.power_ups.clear();
    state.predictions.clear();
    state.countdown_ms = None;
    state.game_timer_ms = 0;
    state.winner = None;
}

fn apply_room(state: &mut ClientState, room: RoomSnapshot) {
    state.room = Some(RoomInfo {
        id: room.id,
        max_players: room.max_players,
        server_state: room.state,
    });
    state.players = room.players;
    state.bombs = room.bombs;
    state.map = room.map;
    state.positions.clear();
}

fn player_moved(state: &mut ClientState, player_id: String, x: f32, y: f32, at: u64) {
    let local = state.is_local(&player_id);
    let Some(player) = state.players.get_mut(&player_id) else {
        debug!("Move for unknown player {}", player_id);
        return;
    };
    // Remote players are interpolated toward the sample; the local one snaps.
    if local
        && ((player.x - x).abs() > RECONCILE_EPSILON || (player.y - y).abs() > RECONCILE_EPSILON)
    {
        debug!(
            "Server moved local player from ({:.2}, {:.2}) to ({:.2}, {:.2})",
            player.x, player.y, x, y
        );
        player.x = x;
        player.y = y;
    }
    state.positions.insert(
        player_id,
        PositionSample {
            x,
            y,
            received_at: at,
        },
    );
}

fn predict(state: &mut ClientState, command: InputCommand, applied_at: u64) {
    let sequence = command.sequence_number;
    let kind = command.kind.clone();
    if !state.predictions.record(command, applied_at) {
        warn!("Ignoring prediction with stale sequence {}", sequence);
        return;
    }

    let Some(local_id) = state.local_player_id.clone() else {
        return;
    };

    match kind {
        InputKind::Move { direction } => {
            let Some(player) = state.players.get_mut(&local_id) else {
                return;
            };
            let (tx, ty) = player.tile();
            let (dx, dy) = direction.delta();
            if state.map.is_walkable(tx + dx, ty + dy) {
                player.x = (tx + dx) as f32;
                player.y = (ty + dy) as f32;
            } else {
                debug!("Predicted move {:?} blocked at ({}, {})", direction, tx + dx, ty + dy);
            }
        }
        InputKind::PlaceBomb { x, y } => {
            let Some(player) = state.players.get(&local_id) else {
                return;
            };
            let owned = state.bombs.values().filter(|b| b.owner_id == local_id).count();
            let occupied = state.bombs.values().any(|b| b.x == x && b.y == y);
            if owned >= player.max_bombs() || occupied {
                debug!("Predicted bomb at ({}, {}) not placed", x, y);
                return;
            }
            let id = format!("{PREDICTED_BOMB_PREFIX}{sequence}");
            state.bombs.insert(
                id.clone(),
                Bomb {
                    id,
                    owner_id: local_id,
                    x,
                    y,
                    timer: DEFAULT_BOMB_TIMER_MS,
                    placed_at: applied_at,
                },
            );
        }
        InputKind::CollectPowerUp { .. } => {}
    }
}

fn reconcile(state: &mut ClientState, snapshot: GameSnapshot, received_at: u64) {
    if let Some(map) = snapshot.map {
        state.map = map;
    }
    if let Some(bombs) = snapshot.bombs {
        state.bombs = bombs;
    }
    if let Some(power_ups) = snapshot.power_ups {
        state.power_ups = power_ups;
    }
    if let Some(players) = snapshot.players {
        apply_players(state, players, received_at);
    }
    if let Some(acknowledged) = snapshot.last_processed_input {
        let dropped = state.predictions.acknowledge(acknowledged);
        if dropped > 0 {
            debug!("Server acknowledged {} predictions up to {}", dropped, acknowledged);
        }
    }
    state.last_server_update = Some(received_at);
}

/// Replaces the player set from the server: the local player snaps to the
/// reported position, remote players keep their rendered position and get a
/// new interpolation target.
fn apply_players(state: &mut ClientState, incoming: BTreeMap<String, Player>, received_at: u64) {
    let mut next = BTreeMap::new();

    for (id, mut player) in incoming {
        state.positions.insert(
            id.clone(),
            PositionSample {
                x: player.x,
                y: player.y,
                received_at,
            },
        );

        if let Some(current) = state.players.get(&id) {
            if state.is_local(&id) {
                let diverged = (current.x - player.x).abs() > RECONCILE_EPSILON
                    || (current.y - player.y).abs() > RECONCILE_EPSILON;
                if diverged {
                    debug!(
                        "Snapping local player from ({:.2}, {:.2}) to ({:.2}, {:.2})",
                        current.x, current.y, player.x, player.y
                    );
                } else {
                    player.x = current.x;
                    player.y = current.y;
                }
            } else {
                player.x = current.x;
                player.y = current.y;
            }
        }
        next.insert(id, player);
    }

    state.positions.retain(|id, _| next.contains_key(id));
    state.players = next;
}

fn bomb_placed(state: &mut ClientState, mut bomb: Bomb) {
    if state.is_local(&bomb.owner_id) {
        let (x, y) = (bomb.x, bomb.y);
        state.bombs.retain(|id, b| {
            !(id.starts_with(PREDICTED_BOMB_PREFIX) && b.x == x && b.y == y)
        });
    }
    if bomb.timer == 0 {
        bomb.timer = DEFAULT_BOMB_TIMER_MS;
    }
    state.bombs.insert(bomb.id.clone(), bomb);
}

fn bomb_exploded(state: &mut ClientState, data: BombExploded, at: u64) -> Option<Effect> {
    let removed = state.bombs.remove(&data.bomb_id);

    let mut tiles: Vec<(i32, i32)> = data.explosions.iter().map(|[x, y]| (*x, *y)).collect();
    if tiles.is_empty() {
        if let Some(bomb) = &removed {
            tiles.push((bomb.x, bomb.y));
        }
    }

    if let Some(map) = data.map {
        state.map = map;
    }
    if let Some(players) = data.players {
        apply_players(state, players, at);
    }

    if tiles.is_empty() {
        warn!("Explosion for unknown bomb {} with no tiles", data.bomb_id);
        return None;
    }

    state.explosions.insert(
        data.bomb_id.clone(),
        ExplosionEvent {
            origin_bomb_id: data.bomb_id.clone(),
            affected_tiles: tiles,
            created_at: at,
            display_duration_ms: EXPLOSION_LIFETIME_MS,
        },
    );

    Some(Effect::Schedule {
        delay: Duration::from_millis(EXPLOSION_LIFETIME_MS),
        action: Action::ExplosionExpired {
            bomb_id: data.bomb_id,
            created_at: Some(at),
        },
    })
}

fn chat_received(state: &mut ClientState, message: ChatMessage, at: u64) {
    if message.message.trim().is_empty() {
        debug!("Dropping empty chat message");
        return;
    }
    let player_name = if message.player_name.is_empty() {
        message.player_id.clone()
    } else {
        message.player_name
    };
    state.push_chat(ChatEntry {
        player_id: Some(message.player_id),
        player_name,
        message: message.message,
        timestamp: at,
        system: false,
    });
}
