//! Typed publish/subscribe bus for connection lifecycle and inbound messages
//!
//! Handlers receive a caller-supplied context by mutable reference, so the
//! code that owns the state store decides what a handler may touch. A handler
//! that fails or panics is logged and skipped; its siblings still run.

use log::{debug, error};
use shared::ServerMessage;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Something the connection manager reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected {
        code: Option<u16>,
        reason: String,
        will_reconnect: bool,
    },
    Error {
        message: String,
    },
    Reconnecting {
        attempt: u32,
    },
    Message {
        message: ServerMessage,
        /// Server timestamp from the envelope, if any.
        timestamp: Option<u64>,
        /// Local wall clock at receipt, epoch milliseconds.
        received_at: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Reconnecting,
    Pong,
    Welcome,
    GameState,
    PlayerJoined,
    PlayerLeft,
    PlayerMoved,
    BombPlaced,
    BombExploded,
    PowerUpCollected,
    Countdown,
    GameStarted,
    GameEnded,
    Chat,
}

impl EventKind {
    /// Name used on the wire, or by the synthetic lifecycle events.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Pong => "pong",
            EventKind::Welcome => "welcome",
            EventKind::GameState => "gameState",
            EventKind::PlayerJoined => "playerJoined",
            EventKind::PlayerLeft => "playerLeft",
            EventKind::PlayerMoved => "playerMoved",
            EventKind::BombPlaced => "bombPlaced",
            EventKind::BombExploded => "bombExploded",
            EventKind::PowerUpCollected => "powerUpCollected",
            EventKind::Countdown => "countdown",
            EventKind::GameStarted => "gameStarted",
            EventKind::GameEnded => "gameEnded",
            EventKind::Chat => "chat",
        }
    }
}

impl From<&ServerMessage> for EventKind {
    fn from(message: &ServerMessage) -> Self {
        match message {
            ServerMessage::Pong => EventKind::Pong,
            ServerMessage::Welcome(_) => EventKind::Welcome,
            ServerMessage::GameState(_) => EventKind::GameState,
            ServerMessage::PlayerJoined(_) => EventKind::PlayerJoined,
            ServerMessage::PlayerLeft(_) => EventKind::PlayerLeft,
            ServerMessage::PlayerMoved(_) => EventKind::PlayerMoved,
            ServerMessage::BombPlaced(_) => EventKind::BombPlaced,
            ServerMessage::BombExploded(_) => EventKind::BombExploded,
            ServerMessage::PowerUpCollected(_) => EventKind::PowerUpCollected,
            ServerMessage::Countdown(_) => EventKind::Countdown,
            ServerMessage::GameStarted => EventKind::GameStarted,
            ServerMessage::GameEnded(_) => EventKind::GameEnded,
            ServerMessage::Chat(_) => EventKind::Chat,
            ServerMessage::Error(_) => EventKind::Error,
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Error { .. } => EventKind::Error,
            Event::Reconnecting { .. } => EventKind::Reconnecting,
            Event::Message { message, .. } => EventKind::from(message),
        }
    }
}

pub type HandlerResult = Result<(), Box<dyn std::error::Error>>;

type Handler<C> = Box<dyn FnMut(&mut C, &Event) -> HandlerResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration<C> {
    id: HandlerId,
    kind: EventKind,
    handler: Handler<C>,
}

pub struct EventBus<C> {
    next_id: u64,
    handlers: Vec<Registration<C>>,
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            handlers: Vec::new(),
        }
    }

    /// Registers a handler; handlers for the same kind run in registration order.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &Event) -> HandlerResult + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push(Registration {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Removes a handler. Returns false if it was already gone.
    pub fn off(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|registration| registration.id != id);
        self.handlers.len() != before
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.iter().filter(|r| r.kind == kind).count()
    }

    /// Delivers an event to every matching handler. Returns how many completed cleanly.
    pub fn emit(&mut self, context: &mut C, event: &Event) -> usize {
        let kind = event.kind();
        let mut delivered = 0;

        for registration in self.handlers.iter_mut().filter(|r| r.kind == kind) {
            let handler = &mut registration.handler;
            match catch_unwind(AssertUnwindSafe(|| handler(context, event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => error!("Handler for '{}' failed: {}", kind.name(), e),
                Err(_) => error!("Handler for '{}' panicked", kind.name()),
            }
        }

        if delivered == 0 && kind != EventKind::Pong {
            debug!("No handler consumed '{}'", kind.name());
        }
        delivered
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}
