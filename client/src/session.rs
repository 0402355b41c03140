//! Game session: one event loop tying the connection, the store and the frame loop together
//!
//! Everything runs on the task that drives [`Session::step`]. Inbound
//! messages become store actions through handlers registered on the
//! connection's event bus; frame ticks run the simulation; commands from the
//! front end (keyboard, chat box) arrive over an unbounded channel.

use crate::actions::Action;
use crate::error::ConnectError;
use crate::events::{Event, EventKind, HandlerResult};
use crate::input::InputEvent;
use crate::link::NORMAL_CLOSE;
use crate::network::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::simulation::{LoopConfig, SimulationLoop};
use crate::state::RoomPhase;
use crate::store::Store;
use crate::ticker::{self, TickSource};
use log::{debug, info, warn};
use shared::{ClientMessage, ServerMessage};
use std::time::Instant;
use tokio::sync::mpsc;

/// State reachable from connection event handlers.
pub struct GameContext {
    pub store: Store,
    pub simulation: SimulationLoop,
    /// Display name used for this session's joins.
    pub identity: String,
}

impl GameContext {
    pub fn new(loop_config: LoopConfig) -> Self {
        Self {
            store: Store::new(),
            simulation: SimulationLoop::new(loop_config),
            identity: String::new(),
        }
    }

    fn apply(&mut self, action: Action) -> HandlerResult {
        let name = action.name();
        if self.store.dispatch(action) {
            Ok(())
        } else {
            Err(format!("{name} was rejected by the reducer").into())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Input(InputEvent),
    Chat(String),
    ToggleChat,
    Disconnect,
    Shutdown,
}

/// What a single [`Session::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Command,
    Signal,
    ConnectionTimer,
    StoreTimer,
    Frame,
    Shutdown,
}

pub struct Session<T> {
    context: GameContext,
    connection: ConnectionManager<GameContext>,
    ticker: T,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    shutdown: bool,
}

impl<T: TickSource> Session<T> {
    pub fn new(connection_config: ConnectionConfig, loop_config: LoopConfig, ticker: T) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut connection = ConnectionManager::new(connection_config);
        install_handlers(&mut connection);

        Self {
            context: GameContext::new(loop_config),
            connection,
            ticker,
            command_tx,
            command_rx,
            shutdown: false,
        }
    }

    /// Sender for front-end commands; clone freely.
    pub fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.command_tx.clone()
    }

    pub fn context(&self) -> &GameContext {
        &self.context
    }

    pub fn store(&self) -> &Store {
        &self.context.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.context.store
    }

    pub fn simulation(&self) -> &SimulationLoop {
        &self.context.simulation
    }

    pub fn connection(&self) -> &ConnectionManager<GameContext> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<GameContext> {
        &mut self.connection
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    /// Joins `room` as `name`, waiting for the WebSocket handshake.
    pub async fn connect(&mut self, name: &str, room: &str) -> Result<(), ConnectError> {
        self.context.identity = name.to_string();
        self.context
            .store
            .dispatch(Action::ConnectionStateChanged(ConnectionState::Connecting));

        let result = self.connection.connect(name, room).await;
        self.context
            .store
            .dispatch(Action::ConnectionStateChanged(self.connection.state()));
        result
    }

    /// Waits for and handles exactly one event.
    pub async fn step(&mut self) -> Step {
        if self.shutdown {
            return Step::Shutdown;
        }

        let connection_deadline = self.connection.next_deadline();
        let store_deadline = self.context.store.next_timer_deadline();
        let running = self.context.simulation.is_running();

        tokio::select! {
            biased;

            Some(command) = self.command_rx.recv() => {
                self.handle_command(command);
                if self.shutdown { Step::Shutdown } else { Step::Command }
            }
            Some(signal) = self.connection.next_signal() => {
                self.connection.handle_signal(signal, &mut self.context);
                Step::Signal
            }
            _ = sleep_until(connection_deadline) => {
                self.connection.on_timer(ticker::now(), &mut self.context);
                Step::ConnectionTimer
            }
            _ = sleep_until(store_deadline) => {
                let fired = self.context.store.run_due_timers(ticker::now());
                debug!("Ran {} scheduled actions", fired);
                Step::StoreTimer
            }
            tick = self.ticker.next_tick(), if running => {
                let GameContext { store, simulation, .. } = &mut self.context;
                simulation.frame(tick, store, &mut self.connection);
                Step::Frame
            }
        }
    }

    /// Steps until a shutdown command arrives.
    pub async fn run(&mut self) {
        info!("Session running");
        while self.step().await != Step::Shutdown {}
        info!("Session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Input(event) => self.context.simulation.handle_input(event),
            Command::Chat(text) => {
                let message = text.trim();
                if message.is_empty() {
                    return;
                }
                let sent = self.connection.send(&ClientMessage::Chat {
                    message: message.to_string(),
                });
                if !sent {
                    warn!("Chat not sent; not connected");
                }
            }
            Command::ToggleChat => {
                self.context.store.dispatch(Action::ToggleChat);
            }
            Command::Disconnect => {
                self.context.simulation.stop();
                self.connection.disconnect();
            }
            Command::Shutdown => {
                self.context.simulation.stop();
                self.connection.disconnect();
                self.shutdown = true;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

const MESSAGE_KINDS: [EventKind; 12] = [
    EventKind::Welcome,
    EventKind::GameState,
    EventKind::PlayerJoined,
    EventKind::PlayerLeft,
    EventKind::PlayerMoved,
    EventKind::BombPlaced,
    EventKind::BombExploded,
    EventKind::PowerUpCollected,
    EventKind::Countdown,
    EventKind::GameStarted,
    EventKind::GameEnded,
    EventKind::Chat,
];

fn install_handlers(connection: &mut ConnectionManager<GameContext>) {
    connection.on(EventKind::Connected, |ctx, _| {
        ctx.apply(Action::ConnectionStateChanged(ConnectionState::Connected))
    });

    connection.on(EventKind::Reconnecting, |ctx, event| {
        if let Event::Reconnecting { attempt } = event {
            info!("Reconnection attempt {}", attempt);
        }
        ctx.apply(Action::ConnectionStateChanged(ConnectionState::Reconnecting))
    });

    connection.on(EventKind::Disconnected, |ctx, event| {
        let Event::Disconnected {
            code,
            will_reconnect,
            ..
        } = event
        else {
            return Ok(());
        };

        let state = if *will_reconnect {
            ConnectionState::Reconnecting
        } else if *code == Some(NORMAL_CLOSE) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed
        };
        ctx.apply(Action::ConnectionStateChanged(state))?;

        if !*will_reconnect {
            ctx.simulation.stop();
            if ctx.store.state().phase.in_room() {
                ctx.apply(Action::LeaveRoom)?;
            }
        }
        Ok(())
    });

    connection.on(EventKind::Error, |_, event| {
        if let Event::Error { message } = event {
            warn!("Server error: {}", message);
        }
        Ok(())
    });

    for kind in MESSAGE_KINDS {
        connection.on(kind, apply_message);
    }
}

fn apply_message(ctx: &mut GameContext, event: &Event) -> HandlerResult {
    let Event::Message {
        message,
        timestamp,
        received_at,
    } = event
    else {
        return Ok(());
    };
    let at = *received_at;

    match message {
        ServerMessage::Welcome(welcome) => {
            info!("Joined room {} as {}", welcome.room_id, welcome.player_id);
            ctx.apply(Action::JoinRoom(welcome.clone()))?;
            if !ctx.identity.is_empty() {
                let name = ctx.identity.clone();
                ctx.apply(Action::SetLocalPlayer {
                    id: welcome.player_id.clone(),
                    name,
                })?;
            }
            if ctx.store.state().phase == RoomPhase::Playing {
                ctx.simulation.start();
            }
        }
        ServerMessage::GameState(snapshot) => {
            ctx.simulation.push_snapshot(snapshot, at);
            ctx.apply(Action::GameStateUpdate {
                snapshot: snapshot.clone(),
                received_at: at,
            })?;
            if let Some(sent) = timestamp {
                ctx.apply(Action::UpdateLatency {
                    latency_ms: at.saturating_sub(*sent),
                })?;
            }
        }
        ServerMessage::PlayerJoined(player) => ctx.apply(Action::PlayerJoined {
            player: player.clone(),
            at,
        })?,
        ServerMessage::PlayerLeft(left) => ctx.apply(Action::PlayerLeft {
            player_id: left.player_id.clone(),
            at,
        })?,
        ServerMessage::PlayerMoved(moved) => ctx.apply(Action::PlayerMoved {
            player_id: moved.player_id.clone(),
            x: moved.x,
            y: moved.y,
            at,
        })?,
        ServerMessage::BombPlaced(bomb) => {
            let mut bomb = bomb.clone();
            if bomb.placed_at == 0 {
                bomb.placed_at = at;
            }
            ctx.apply(Action::BombPlaced(bomb))?;
        }
        ServerMessage::BombExploded(data) => ctx.apply(Action::BombExploded {
            data: data.clone(),
            at,
        })?,
        ServerMessage::PowerUpCollected(collected) => {
            ctx.apply(Action::PowerUpCollected(collected.clone()))?
        }
        ServerMessage::Countdown(countdown) => ctx.apply(Action::UpdateCountdown {
            remaining_ms: countdown.duration,
        })?,
        ServerMessage::GameStarted => {
            ctx.apply(Action::GameStarted { at })?;
            if ctx.store.state().phase == RoomPhase::Playing {
                ctx.simulation.start();
            } else {
                debug!("Ignoring game start in {:?}", ctx.store.state().phase);
            }
        }
        ServerMessage::GameEnded(ended) => {
            ctx.simulation.stop();
            ctx.apply(Action::GameEnded {
                winner: ended.winner.clone(),
                at,
            })?;
        }
        ServerMessage::Chat(chat) => ctx.apply(Action::ChatMessageReceived {
            message: chat.clone(),
            at,
        })?,
        ServerMessage::Pong | ServerMessage::Error(_) => {}
    }
    Ok(())
}
