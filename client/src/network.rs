//! Connection manager: one logical link to the game server
//!
//! Owns the socket task, the heartbeat, the reconnection schedule and the
//! event bus. The manager runs inside the session's event loop: the loop
//! awaits [`ConnectionManager::next_signal`] and the earliest
//! [`ConnectionManager::next_deadline`], then hands the result back so every
//! handler runs to completion on the loop's single task.

use crate::error::ConnectError;
use crate::events::{Event, EventBus, EventKind, HandlerId, HandlerResult};
use crate::link::{spawn_link, LinkEvent, LinkHandle, Signal, ABNORMAL_CLOSE, NORMAL_CLOSE};
use crate::reconnect::{Backoff, Heartbeat, HeartbeatAction};
use crate::ticker;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{timestamp_ms, ClientMessage, ServerMessage};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub server_url: String,
    pub open_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/ws".to_string(),
            open_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
        }
    }
}

/// Outbound seam for anything that produces player intents.
pub trait IntentSink {
    /// Queues a message for the server. Returns false if it could not be sent.
    fn send_intent(&mut self, message: &ClientMessage) -> bool;
}

pub struct ConnectionManager<C> {
    config: ConnectionConfig,
    state: ConnectionState,
    bus: EventBus<C>,
    backoff: Backoff,

    target: Option<Url>,
    link: Option<LinkHandle>,
    generation: u64,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,

    heartbeat: Option<Heartbeat>,
    reconnect_attempt: u32,
    pending_attempt: Option<(u32, Instant)>,
}

impl<C> ConnectionManager<C> {
    pub fn new(config: ConnectionConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.reconnect_base_delay, config.max_reconnect_attempts);

        Self {
            config,
            state: ConnectionState::Disconnected,
            bus: EventBus::new(),
            backoff,
            target: None,
            link: None,
            generation: 0,
            signal_tx,
            signal_rx,
            heartbeat: None,
            reconnect_attempt: 0,
            pending_attempt: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of the reconnection attempt in progress, 0 when none is.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &Event) -> HandlerResult + 'static,
    {
        self.bus.on(kind, handler)
    }

    pub fn off(&mut self, id: HandlerId) -> bool {
        self.bus.off(id)
    }

    /// Endpoint for the given identity and room.
    pub fn endpoint(&self, identity: &str, room: &str) -> Result<Url, ConnectError> {
        let mut url = Url::parse(&self.config.server_url)
            .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConnectError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("name", identity)
            .append_pair("room", room);
        Ok(url)
    }

    /// Opens the link and waits for the handshake.
    ///
    /// Returns immediately when already connected and joins the pending
    /// outcome when an attempt is in flight. The identity and room are kept
    /// for later reconnection attempts.
    pub async fn connect(&mut self, identity: &str, room: &str) -> Result<(), ConnectError> {
        if self.state == ConnectionState::Connected && self.link.is_some() {
            return Ok(());
        }

        if self.link.is_none() {
            let url = self.endpoint(identity, room)?;
            info!("Connecting to {}", url);
            self.target = Some(url);
            self.pending_attempt = None;
            self.reconnect_attempt = 0;
            self.state = ConnectionState::Connecting;
            self.open_link();
        }

        let Some(link) = self.link.as_ref() else {
            return Err(ConnectError::Cancelled);
        };
        let generation = link.generation;
        let mut outcome = link.outcome();

        let result = match outcome.wait_for(|o| o.is_some()).await {
            Ok(settled) => (*settled).clone().unwrap_or(Err(ConnectError::Cancelled)),
            Err(_) => Err(ConnectError::Cancelled),
        };

        if self.generation != generation {
            return Err(ConnectError::Cancelled);
        }

        match &result {
            Ok(()) => self.mark_open(ticker::now()),
            Err(e) => {
                // The link's own failure report is superseded by this one.
                self.link = None;
                self.generation += 1;
                if let Some(event) = self.attempt_failed(e, ticker::now()) {
                    self.queue(event);
                }
            }
        }
        result
    }

    /// Intentional close: cancels reconnection and queues a final `disconnected` event.
    pub fn disconnect(&mut self) {
        self.pending_attempt = None;
        self.reconnect_attempt = 0;
        self.heartbeat = None;

        if let Some(link) = self.link.take() {
            link.close(NORMAL_CLOSE, "Client disconnect");
        }
        self.generation += 1;

        match self.state {
            ConnectionState::Disconnected => return,
            ConnectionState::Failed => {
                self.state = ConnectionState::Disconnected;
                return;
            }
            _ => {}
        }

        info!("Disconnecting from server");
        self.state = ConnectionState::Disconnected;
        self.queue(Event::Disconnected {
            code: Some(NORMAL_CLOSE),
            reason: "Client disconnect".to_string(),
            will_reconnect: false,
        });
    }

    /// Serializes and queues a message. False when not connected.
    pub fn send(&mut self, message: &ClientMessage) -> bool {
        if self.state != ConnectionState::Connected {
            debug!("Not connected; dropping outbound message");
            return false;
        }
        let Some(link) = self.link.as_ref() else {
            return false;
        };

        match message.to_json() {
            Ok(text) => link.send(text),
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                false
            }
        }
    }

    /// Waits for the next signal from the live link or the manager itself.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.signal_rx.recv().await
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let heartbeat = match self.state {
            ConnectionState::Connected => self.heartbeat.as_ref().map(Heartbeat::next_check),
            _ => None,
        };
        let reconnect = self.pending_attempt.map(|(_, at)| at);

        match (heartbeat, reconnect) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_timer(&mut self, now: Instant, context: &mut C) {
        if let Some((attempt, at)) = self.pending_attempt {
            if now >= at {
                self.pending_attempt = None;
                self.start_attempt(attempt, context);
            }
        }

        if self.state != ConnectionState::Connected {
            return;
        }
        let action = match self.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.poll(now),
            None => return,
        };

        match action {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                self.send(&ClientMessage::Ping);
            }
            HeartbeatAction::Expired => {
                warn!("No pong from server; dropping link");
                if let Some(link) = self.link.take() {
                    link.abort();
                }
                self.generation += 1;
                self.heartbeat = None;
                self.handle_unintended_close(
                    Some(ABNORMAL_CLOSE),
                    "Heartbeat timeout".to_string(),
                    now,
                    context,
                );
            }
        }
    }

    /// Applies a signal returned by [`next_signal`](Self::next_signal).
    pub fn handle_signal(&mut self, signal: Signal, context: &mut C) {
        match signal {
            Signal::Emit(event) => {
                self.bus.emit(context, &event);
            }
            Signal::Link { generation, event } => {
                if generation != self.generation {
                    debug!("Ignoring signal from stale link {}", generation);
                    return;
                }
                self.handle_link_event(event, context);
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent, context: &mut C) {
        let now = ticker::now();
        match event {
            LinkEvent::Opened => {
                self.mark_open(now);
                self.bus.emit(context, &Event::Connected);
            }
            LinkEvent::Text(text) => self.handle_text(&text, now, context),
            LinkEvent::Closed { code, reason } => {
                self.link = None;
                self.heartbeat = None;
                if code == Some(NORMAL_CLOSE) {
                    info!("Server closed the connection: {}", reason);
                    self.state = ConnectionState::Disconnected;
                    self.reconnect_attempt = 0;
                    self.bus.emit(
                        context,
                        &Event::Disconnected {
                            code,
                            reason,
                            will_reconnect: false,
                        },
                    );
                } else {
                    self.handle_unintended_close(code, reason, now, context);
                }
            }
            LinkEvent::Failed(err) => {
                self.link = None;
                self.generation += 1;
                if let Some(event) = self.attempt_failed(&err, now) {
                    self.bus.emit(context, &event);
                }
            }
        }
    }

    fn handle_text(&mut self, text: &str, now: Instant, context: &mut C) {
        let (envelope, message) = match ServerMessage::decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return;
            }
        };
        debug!("Received '{}'", envelope.kind);

        let event = match message {
            ServerMessage::Pong => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.record_pong(now);
                }
                return;
            }
            ServerMessage::Error(message) => Event::Error { message },
            ServerMessage::Welcome(welcome) => {
                self.remember_room(&welcome.room_id);
                Event::Message {
                    message: ServerMessage::Welcome(welcome),
                    timestamp: envelope.timestamp,
                    received_at: timestamp_ms(),
                }
            }
            message => Event::Message {
                message,
                timestamp: envelope.timestamp,
                received_at: timestamp_ms(),
            },
        };
        self.bus.emit(context, &event);
    }

    /// Pins reconnection attempts to the room the server actually placed us in.
    fn remember_room(&mut self, room_id: &str) {
        let Some(target) = self.target.as_mut() else {
            return;
        };
        let pairs: Vec<(String, String)> = target
            .query_pairs()
            .filter(|(key, _)| key != "room")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let mut query = target.query_pairs_mut();
        query.clear();
        for (key, value) in &pairs {
            query.append_pair(key, value);
        }
        query.append_pair("room", room_id);
        drop(query);
        debug!("Reconnections will rejoin room {}", room_id);
    }

    fn mark_open(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            info!("Connected to server");
            self.state = ConnectionState::Connected;
            self.heartbeat = Some(Heartbeat::new(
                self.config.ping_interval,
                self.config.pong_timeout,
                now,
            ));
        }
        self.reconnect_attempt = 0;
        self.pending_attempt = None;
    }

    fn handle_unintended_close(
        &mut self,
        code: Option<u16>,
        reason: String,
        now: Instant,
        context: &mut C,
    ) {
        warn!("Connection lost ({:?}): {}", code, reason);
        let will_reconnect = self.target.is_some() && self.backoff.delay(1).is_some();
        if will_reconnect {
            self.state = ConnectionState::Reconnecting;
            self.reconnect_attempt = 0;
            self.schedule_attempt(1, now);
        } else {
            self.state = ConnectionState::Failed;
        }
        self.bus.emit(
            context,
            &Event::Disconnected {
                code,
                reason,
                will_reconnect,
            },
        );
    }

    /// Settles a failed handshake. Returns the event subscribers should see, if any.
    fn attempt_failed(&mut self, err: &ConnectError, now: Instant) -> Option<Event> {
        if self.reconnect_attempt == 0 {
            warn!("Connection attempt failed: {}", err);
            self.state = ConnectionState::Failed;
            return Some(Event::Error {
                message: err.to_string(),
            });
        }

        warn!("Reconnection attempt {} failed: {}", self.reconnect_attempt, err);
        let next = self.reconnect_attempt + 1;
        if self.backoff.delay(next).is_some() {
            self.state = ConnectionState::Reconnecting;
            self.schedule_attempt(next, now);
            return None;
        }

        error!("Max reconnection attempts reached");
        self.state = ConnectionState::Failed;
        self.reconnect_attempt = 0;
        Some(Event::Disconnected {
            code: None,
            reason: format!("Max reconnection attempts reached: {err}"),
            will_reconnect: false,
        })
    }

    fn schedule_attempt(&mut self, attempt: u32, now: Instant) {
        if let Some(delay) = self.backoff.delay(attempt) {
            info!("Reconnecting in {} ms (attempt {})", delay.as_millis(), attempt);
            self.pending_attempt = Some((attempt, now + delay));
        }
    }

    fn start_attempt(&mut self, attempt: u32, context: &mut C) {
        self.reconnect_attempt = attempt;
        self.state = ConnectionState::Reconnecting;
        self.bus.emit(context, &Event::Reconnecting { attempt });
        self.open_link();
    }

    fn open_link(&mut self) {
        self.generation += 1;
        if let Some(old) = self.link.take() {
            old.abort();
        }
        let Some(url) = self.target.clone() else {
            return;
        };
        self.link = Some(spawn_link(
            url,
            self.generation,
            self.config.open_timeout,
            self.signal_tx.clone(),
        ));
    }

    fn queue(&self, event: Event) {
        let _ = self.signal_tx.send(Signal::Emit(event));
    }

    /// Installs a link with no socket behind it, already open.
    #[cfg(test)]
    pub(crate) fn attach_test_link(
        &mut self,
        now: Instant,
    ) -> mpsc::UnboundedReceiver<crate::link::LinkCommand> {
        self.generation += 1;
        let (handle, commands, _outcome) = LinkHandle::detached(self.generation, true);
        self.link = Some(handle);
        if self.target.is_none() {
            self.target = self.endpoint("tester", "").ok();
        }
        self.state = ConnectionState::Connecting;
        self.mark_open(now);
        commands
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: LinkEvent) {
        let _ = self.signal_tx.send(Signal::Link {
            generation: self.generation,
            event,
        });
    }

    #[cfg(test)]
    pub(crate) fn pending_attempt(&self) -> Option<(u32, Instant)> {
        self.pending_attempt
    }
}

impl<C> IntentSink for ConnectionManager<C> {
    fn send_intent(&mut self, message: &ClientMessage) -> bool {
        self.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkCommand;

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    fn recording_manager(config: ConnectionConfig) -> ConnectionManager<Recorder> {
        let mut manager = ConnectionManager::new(config);
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Error,
            EventKind::Reconnecting,
            EventKind::Welcome,
            EventKind::GameStarted,
        ] {
            manager.on(kind, |recorder: &mut Recorder, event| {
                recorder.events.push(event.clone());
                Ok(())
            });
        }
        manager
    }

    async fn drain(manager: &mut ConnectionManager<Recorder>, recorder: &mut Recorder) {
        while let Ok(signal) = manager.signal_rx.try_recv() {
            manager.handle_signal(signal, recorder);
        }
    }

    #[test]
    fn test_endpoint_appends_identity_and_room() {
        let manager: ConnectionManager<Recorder> = ConnectionManager::new(ConnectionConfig::default());
        let url = manager.endpoint("alice b", "").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?name=alice+b&room=");
    }

    #[test]
    fn test_endpoint_rejects_http_scheme() {
        let manager: ConnectionManager<Recorder> = ConnectionManager::new(ConnectionConfig {
            server_url: "http://localhost:8080".to_string(),
            ..ConnectionConfig::default()
        });
        assert!(matches!(
            manager.endpoint("alice", "r1"),
            Err(ConnectError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_send_is_false_when_disconnected() {
        let mut manager: ConnectionManager<Recorder> = ConnectionManager::new(ConnectionConfig::default());
        assert!(!manager.send(&ClientMessage::Ping));
        assert!(!manager.send_intent(&ClientMessage::Ping));
    }

    #[tokio::test]
    async fn test_send_serializes_onto_link() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut commands = manager.attach_test_link(Instant::now());

        assert!(manager.send(&ClientMessage::Chat {
            message: "hi".to_string()
        }));
        match commands.try_recv() {
            Ok(LinkCommand::Send(text)) => assert!(text.contains("\"chat\"")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_welcome_pins_reconnect_room() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(Instant::now());

        manager.inject(LinkEvent::Text(
            r#"{"type":"welcome","data":{"playerId":"p1","roomId":"room_7"}}"#.to_string(),
        ));
        drain(&mut manager, &mut recorder).await;

        assert_eq!(recorder.events.len(), 1);
        let target = manager.target.as_ref().unwrap();
        assert_eq!(
            target.as_str(),
            "ws://localhost:8080/ws?name=tester&room=room_7"
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_are_decoded_and_dispatched() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(Instant::now());

        manager.inject(LinkEvent::Text(r#"{"type":"gameStarted"}"#.to_string()));
        manager.inject(LinkEvent::Text("garbage".to_string()));
        manager.inject(LinkEvent::Text(r#"{"type":"mystery","data":{}}"#.to_string()));
        manager.inject(LinkEvent::Text(r#"{"type":"error","data":"Room is full"}"#.to_string()));
        drain(&mut manager, &mut recorder).await;

        assert_eq!(recorder.events.len(), 2);
        assert!(matches!(
            &recorder.events[0],
            Event::Message { message: ServerMessage::GameStarted, .. }
        ));
        assert_eq!(
            recorder.events[1],
            Event::Error {
                message: "Room is full".to_string()
            }
        );
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_heartbeat_pings_then_forces_reconnect() {
        let config = ConnectionConfig::default();
        let start = Instant::now();
        let mut manager = recording_manager(config.clone());
        let mut recorder = Recorder::default();
        let mut commands = manager.attach_test_link(start);

        assert_eq!(manager.next_deadline(), Some(start + config.ping_interval));
        manager.on_timer(start + config.ping_interval, &mut recorder);
        match commands.try_recv() {
            Ok(LinkCommand::Send(text)) => assert_eq!(text, r#"{"type":"ping"}"#),
            other => panic!("expected ping, got {other:?}"),
        }

        manager.on_timer(start + config.pong_timeout, &mut recorder);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(
            recorder.events.last(),
            Some(&Event::Disconnected {
                code: Some(ABNORMAL_CLOSE),
                reason: "Heartbeat timeout".to_string(),
                will_reconnect: true,
            })
        );
        let (attempt, at) = manager.pending_attempt().unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(at, start + config.pong_timeout + config.reconnect_base_delay);
    }

    #[tokio::test]
    async fn test_pong_resets_heartbeat() {
        let config = ConnectionConfig::default();
        // Opened 20 s ago so the pong, stamped with the real clock, lands mid-window.
        let start = Instant::now().checked_sub(Duration::from_secs(20)).unwrap();
        let mut manager = recording_manager(config.clone());
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(start);

        manager.on_timer(start + config.ping_interval, &mut recorder);
        manager.inject(LinkEvent::Text(r#"{"type":"pong"}"#.to_string()));
        drain(&mut manager, &mut recorder).await;

        manager.on_timer(start + config.pong_timeout, &mut recorder);
        assert!(manager.is_connected());
        assert!(recorder.events.is_empty());
    }

    #[tokio::test]
    async fn test_normal_close_from_server_is_not_retried() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(Instant::now());

        manager.inject(LinkEvent::Closed {
            code: Some(NORMAL_CLOSE),
            reason: "bye".to_string(),
        });
        drain(&mut manager, &mut recorder).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.pending_attempt().is_none());
        assert!(matches!(
            recorder.events.last(),
            Some(Event::Disconnected { will_reconnect: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_reconnect_attempts_back_off_until_exhausted() {
        let config = ConnectionConfig {
            server_url: "ws://127.0.0.1:9/ws".to_string(),
            max_reconnect_attempts: 2,
            ..ConnectionConfig::default()
        };
        let start = Instant::now();
        let mut manager = recording_manager(config);
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(start);

        manager.inject(LinkEvent::Closed {
            code: Some(ABNORMAL_CLOSE),
            reason: "reset".to_string(),
        });
        drain(&mut manager, &mut recorder).await;
        let (attempt, due) = manager.pending_attempt().unwrap();
        assert_eq!(attempt, 1);

        manager.on_timer(due, &mut recorder);
        assert_eq!(manager.reconnect_attempt(), 1);
        assert_eq!(recorder.events.last(), Some(&Event::Reconnecting { attempt: 1 }));

        // The spawned link fails; simulate its report directly.
        manager.inject(LinkEvent::Failed(ConnectError::Refused("refused".into())));
        drain(&mut manager, &mut recorder).await;
        let (attempt, due2) = manager.pending_attempt().unwrap();
        assert_eq!(attempt, 2);
        assert!(due2 > due);

        manager.on_timer(due2, &mut recorder);
        manager.inject(LinkEvent::Failed(ConnectError::Refused("refused".into())));
        drain(&mut manager, &mut recorder).await;

        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.pending_attempt().is_none());
        assert!(matches!(
            recorder.events.last(),
            Some(Event::Disconnected { will_reconnect: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut recorder = Recorder::default();
        let mut commands = manager.attach_test_link(Instant::now());

        manager.disconnect();
        manager.disconnect();
        drain(&mut manager, &mut recorder).await;

        assert!(matches!(
            commands.try_recv(),
            Ok(LinkCommand::Close { code: NORMAL_CLOSE, .. })
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.events.len(), 1);
        assert!(manager.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_stale_link_signals_are_ignored() {
        let mut manager = recording_manager(ConnectionConfig::default());
        let mut recorder = Recorder::default();
        let _commands = manager.attach_test_link(Instant::now());
        let stale = manager.generation;
        let _replacement = manager.attach_test_link(Instant::now());

        manager.handle_signal(
            Signal::Link {
                generation: stale,
                event: LinkEvent::Closed {
                    code: Some(ABNORMAL_CLOSE),
                    reason: "old".to_string(),
                },
            },
            &mut recorder,
        );
        assert!(manager.is_connected());
        assert!(recorder.events.is_empty());
    }
}
