//! Socket task for one WebSocket link
//!
//! Each connection attempt spawns a task that performs the handshake, then
//! pumps frames both ways. The task never touches client state: it reports
//! through the manager's signal channel, tagged with the generation it was
//! spawned for so the manager can ignore links it has already replaced.

use crate::error::ConnectError;
use crate::events::Event;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Abnormal closure, reported locally when a link dies without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;
pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened,
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Failed(ConnectError),
}

#[derive(Debug)]
pub(crate) enum LinkCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Everything that flows back into the manager's event loop.
#[derive(Debug)]
pub enum Signal {
    Link { generation: u64, event: LinkEvent },
    /// An event queued by the manager itself, delivered on the next loop turn.
    Emit(Event),
}

pub(crate) type Outcome = Option<Result<(), ConnectError>>;

pub(crate) struct LinkHandle {
    pub generation: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    outcome: watch::Receiver<Outcome>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn send(&self, text: String) -> bool {
        self.commands.send(LinkCommand::Send(text)).is_ok()
    }

    /// Asks the task to send a close frame and finish.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.commands.send(LinkCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Drops the socket immediately without a closing handshake.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn outcome(&self) -> watch::Receiver<Outcome> {
        self.outcome.clone()
    }

    #[cfg(test)]
    pub fn detached(
        generation: u64,
        opened: bool,
    ) -> (Self, mpsc::UnboundedReceiver<LinkCommand>, watch::Sender<Outcome>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome) = watch::channel(if opened { Some(Ok(())) } else { None });
        let handle = Self {
            generation,
            commands,
            outcome,
            task: None,
        };
        (handle, command_rx, outcome_tx)
    }
}

pub(crate) fn spawn_link(
    url: Url,
    generation: u64,
    open_timeout: Duration,
    signals: mpsc::UnboundedSender<Signal>,
) -> LinkHandle {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome) = watch::channel(None);

    let task = tokio::spawn(run_link(
        url,
        generation,
        open_timeout,
        signals,
        command_rx,
        outcome_tx,
    ));

    LinkHandle {
        generation,
        commands,
        outcome,
        task: Some(task),
    }
}

async fn run_link(
    url: Url,
    generation: u64,
    open_timeout: Duration,
    signals: mpsc::UnboundedSender<Signal>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    outcome: watch::Sender<Outcome>,
) {
    let report = |event: LinkEvent| {
        if signals.send(Signal::Link { generation, event }).is_err() {
            debug!("Link {} outlived its manager", generation);
        }
    };

    let handshake = tokio::time::timeout(open_timeout, tokio_tungstenite::connect_async(url.as_str()));
    let stream = match handshake.await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let err = ConnectError::Refused(e.to_string());
            outcome.send_replace(Some(Err(err.clone())));
            report(LinkEvent::Failed(err));
            return;
        }
        Err(_) => {
            let err = ConnectError::Timeout(open_timeout);
            outcome.send_replace(Some(Err(err.clone())));
            report(LinkEvent::Failed(err));
            return;
        }
    };

    outcome.send_replace(Some(Ok(())));
    report(LinkEvent::Opened);

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => report(LinkEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, "closed without status".to_string()),
                    };
                    report(LinkEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    warn!("Dropping {} byte binary frame", bytes.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Link {} read error: {}", generation, e);
                    report(LinkEvent::Closed { code: Some(ABNORMAL_CLOSE), reason: e.to_string() });
                    break;
                }
                None => {
                    report(LinkEvent::Closed { code: Some(ABNORMAL_CLOSE), reason: "stream ended".to_string() });
                    break;
                }
            },

            command = commands.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        error!("Link {} write error: {}", generation, e);
                        report(LinkEvent::Closed { code: Some(ABNORMAL_CLOSE), reason: e.to_string() });
                        break;
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!("Link {} close frame not sent: {}", generation, e);
                    }
                    let _ = write.close().await;
                    break;
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    debug!("Link {} task finished", generation);
}
