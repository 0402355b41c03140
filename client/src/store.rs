//! Authoritative state store
//!
//! Single owner of [`ClientState`]. Every mutation goes through `dispatch`,
//! which runs the reducer on a copy, commits it, schedules any requested
//! follow-up actions and then notifies subscribers of the slices that changed.

use crate::actions::{Action, Effect};
use crate::reducers::reduce;
use crate::state::{ClientState, StateKey, StateSlice};
use crate::ticker;
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

type Subscriber = Box<dyn FnMut(&StateSlice<'_>, &StateSlice<'_>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    key: StateKey,
    callback: Subscriber,
}

#[derive(Debug)]
struct ScheduledAction {
    due: Instant,
    action: Action,
}

pub struct Store {
    state: ClientState,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    timers: Vec<ScheduledAction>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_state(ClientState::new())
    }

    pub fn with_state(state: ClientState) -> Self {
        Self {
            state,
            subscriptions: Vec::new(),
            next_subscription: 1,
            timers: Vec::new(),
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn dispatch(&mut self, action: Action) -> bool {
        self.dispatch_at(action, ticker::now())
    }

    /// Applies an action as of `now`. Returns false if the reducer failed,
    /// in which case the state is left exactly as it was.
    pub fn dispatch_at(&mut self, action: Action, now: Instant) -> bool {
        let name = action.name();
        if let Some(keys) = in_place_keys(&action) {
            if !self.subscriptions.iter().any(|s| keys.contains(&s.key)) {
                // Single-field assignments; nothing to roll back or compare.
                reduce(&mut self.state, action);
                return true;
            }
        }
        let mut next = self.state.clone();

        let effects = match catch_unwind(AssertUnwindSafe(|| reduce(&mut next, action))) {
            Ok(effects) => effects,
            Err(_) => {
                error!("Reducer for {} panicked; state unchanged", name);
                return false;
            }
        };
        debug!("Dispatched {}", name);

        let previous = std::mem::replace(&mut self.state, next);
        for effect in effects {
            match effect {
                Effect::Schedule { delay, action } => self.timers.push(ScheduledAction {
                    due: now + delay,
                    action,
                }),
            }
        }
        self.notify(&previous);
        true
    }

    /// Builds and dispatches an action from its name. Unknown names and bad
    /// payloads are logged and leave the state untouched.
    pub fn dispatch_named(&mut self, name: &str, payload: serde_json::Value) -> bool {
        match Action::from_named(name, payload) {
            Ok(action) => self.dispatch(action),
            Err(e) => {
                warn!("Ignoring action: {}", e);
                false
            }
        }
    }

    /// Registers a callback run with `(new, old)` whenever `key`'s slice changes.
    pub fn subscribe<F>(&mut self, key: StateKey, callback: F) -> SubscriptionId
    where
        F: FnMut(&StateSlice<'_>, &StateSlice<'_>) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            key,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.due).min()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Dispatches every scheduled action due at `now`, earliest first.
    pub fn run_due_timers(&mut self, now: Instant) -> usize {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.timers).into_iter().partition(|t| t.due <= now);
        self.timers = pending;
        due.sort_by_key(|t| t.due);

        let count = due.len();
        for timer in due {
            self.dispatch_at(timer.action, now);
        }
        count
    }

    fn notify(&mut self, previous: &ClientState) {
        for subscription in self.subscriptions.iter_mut() {
            let new = self.state.slice(subscription.key);
            let old = previous.slice(subscription.key);
            if new == old {
                continue;
            }
            let callback = &mut subscription.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(&new, &old))).is_err() {
                error!("Subscriber for {:?} panicked", subscription.key);
            }
        }
    }
}

/// Slices touched by frame-rate actions that only assign a field or two.
fn in_place_keys(action: &Action) -> Option<&'static [StateKey]> {
    match action {
        Action::UpdateGameTimer { .. } => Some(&[StateKey::GameTimer]),
        Action::UpdateFrameRate { .. } => Some(&[StateKey::FrameRate]),
        Action::UpdateLatency { .. } => Some(&[StateKey::Latency]),
        Action::InterpolateRemote { .. } => Some(&[StateKey::Players]),
        _ => None,
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectionState;
    use crate::state::RoomPhase;
    use serde_json::json;
    use shared::protocol::{BombExploded, Welcome};
    use shared::{Bomb, Player, TileMap};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn joined_store() -> Store {
        let mut store = Store::new();
        store.dispatch(Action::JoinRoom(Welcome {
            player_id: "me".to_string(),
            room_id: "r1".to_string(),
            room: None,
        }));
        store
    }

    #[test]
    fn test_unknown_action_leaves_state_byte_identical() {
        let mut store = joined_store();
        let before = serde_json::to_vec(store.state()).unwrap();

        assert!(!store.dispatch_named("TELEPORT_PLAYER", json!({"x": 1})));
        assert!(!store.dispatch_named("UPDATE_FRAME_RATE", json!({"fps": -1})));

        let after = serde_json::to_vec(store.state()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dispatch_named_applies_known_action() {
        let mut store = Store::new();
        assert!(store.dispatch_named("CONNECTION_STATE_CHANGE", json!("connected")));
        assert_eq!(store.state().connection, ConnectionState::Connected);
    }

    #[test]
    fn test_subscribers_see_new_and_old_values() {
        let mut store = Store::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(StateKey::Phase, move |new, old| {
            if let (StateSlice::Phase(new), StateSlice::Phase(old)) = (new, old) {
                sink.borrow_mut().push((*old, *new));
            }
        });

        store.dispatch(Action::ToggleChat);
        store.dispatch(Action::JoinRoom(Welcome {
            player_id: "me".to_string(),
            room_id: "r1".to_string(),
            room: None,
        }));

        assert_eq!(*seen.borrow(), vec![(RoomPhase::Menu, RoomPhase::Lobby)]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let mut store = Store::new();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);

        store.subscribe(StateKey::FrameRate, |_, _| panic!("subscriber failure"));
        store.subscribe(StateKey::FrameRate, move |_, _| *counter.borrow_mut() += 1);

        assert!(store.dispatch(Action::UpdateFrameRate { fps: 60 }));
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(store.state().frame_rate, 60);
    }

    #[test]
    fn test_frame_actions_apply_with_and_without_subscribers() {
        let mut store = joined_store();
        store.dispatch(Action::PlayerJoined {
            player: Player::new("them", "bob", 3.0, 3.0),
            at: 0,
        });

        assert!(store.dispatch(Action::UpdateGameTimer { elapsed_ms: 16 }));
        assert!(store.dispatch(Action::InterpolateRemote {
            player_id: "them".to_string(),
            x: 2.9,
            y: 3.0,
        }));
        assert_eq!(store.state().game_timer_ms, 16);
        assert_eq!(store.state().players["them"].x, 2.9);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(StateKey::GameTimer, move |new, old| {
            if let (StateSlice::GameTimer(new), StateSlice::GameTimer(old)) = (new, old) {
                sink.borrow_mut().push((*old, *new));
            }
        });
        store.dispatch(Action::UpdateGameTimer { elapsed_ms: 32 });
        store.dispatch(Action::UpdateGameTimer { elapsed_ms: 32 });
        assert_eq!(*seen.borrow(), vec![(16, 32)]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut store = Store::new();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let id = store.subscribe(StateKey::Chat, move |_, _| *counter.borrow_mut() += 1);

        store.dispatch(Action::ToggleChat);
        assert!(store.unsubscribe(id));
        store.dispatch(Action::ToggleChat);
        assert_eq!(*calls.borrow(), 1);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn test_explosion_self_clears_after_lifetime() {
        let mut store = joined_store();
        let start = Instant::now();
        store.dispatch_at(
            Action::BombPlaced(Bomb {
                id: "b1".to_string(),
                owner_id: "them".to_string(),
                x: 2,
                y: 2,
                timer: 3000,
                placed_at: 0,
            }),
            start,
        );
        store.dispatch_at(
            Action::BombExploded {
                data: BombExploded {
                    bomb_id: "b1".to_string(),
                    explosions: vec![[2, 2], [2, 3]],
                    map: None,
                    players: None,
                },
                at: 0,
            },
            start,
        );

        assert!(store.state().bombs.is_empty());
        assert!(store.state().explosions.contains_key("b1"));
        assert_eq!(
            store.next_timer_deadline(),
            Some(start + Duration::from_millis(1000))
        );

        assert_eq!(store.run_due_timers(start + Duration::from_millis(999)), 0);
        assert!(store.state().explosions.contains_key("b1"));
        assert_eq!(store.run_due_timers(start + Duration::from_millis(1000)), 1);
        assert!(store.state().explosions.is_empty());
        assert_eq!(store.pending_timers(), 0);
    }

    #[test]
    fn test_prediction_then_snapshot_snaps_back() {
        let mut store = joined_store();
        store.dispatch(Action::MapUpdate(TileMap::bordered(9, 9)));
        store.dispatch(Action::PlayerJoined {
            player: Player::new("me", "alice", 4.0, 1.0),
            at: 0,
        });
        store.dispatch(Action::PlayerInputPrediction {
            command: shared::InputCommand {
                sequence_number: 1,
                kind: shared::InputKind::Move {
                    direction: shared::Direction::Right,
                },
                client_timestamp: 0,
            },
            applied_at: 0,
        });
        assert_eq!(store.state().local_player().unwrap().x, 5.0);

        let mut players = std::collections::BTreeMap::new();
        players.insert("me".to_string(), Player::new("me", "alice", 3.0, 1.0));
        store.dispatch(Action::GameStateUpdate {
            snapshot: shared::GameSnapshot {
                players: Some(players),
                ..Default::default()
            },
            received_at: 0,
        });
        assert_eq!(store.state().local_player().unwrap().x, 3.0);
    }
}
