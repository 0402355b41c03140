//! Integration tests for the client against live sockets
//!
//! These tests run the session against an in-process WebSocket server and the
//! lobby client against a minimal HTTP responder.

use client::error::{ConnectError, LobbyError};
use client::lobby::LobbyClient;
use client::network::{ConnectionConfig, ConnectionState};
use client::session::{Command, Session};
use client::simulation::LoopConfig;
use client::state::{RoomPhase, StateKey, StateSlice};
use client::ticker::{ScriptedTicks, Tick, TickSource};
use futures_util::{SinkExt, StreamExt};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

const WELCOME: &str = r#"{"type":"welcome","data":{"playerId":"p1","roomId":"room_1"}}"#;

type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts WebSocket clients forever, handing each to `handler` with its index.
async fn mock_server<F, Fut>(handler: F) -> (String, JoinHandle<()>)
where
    F: Fn(usize, ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler(index, ws));
                index += 1;
            }
        }
    });
    (format!("ws://{addr}/ws"), task)
}

async fn send_text(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// Reads until the client goes away.
async fn hold(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn config_for(url: &str) -> ConnectionConfig {
    ConnectionConfig {
        server_url: url.to_string(),
        open_timeout: Duration::from_millis(500),
        reconnect_base_delay: Duration::from_millis(50),
        ..ConnectionConfig::default()
    }
}

fn session_for(url: &str) -> Session<ScriptedTicks> {
    Session::new(config_for(url), LoopConfig::default(), ScriptedTicks::default())
}

async fn step_until<T, F>(session: &mut Session<T>, limit: Duration, done: F)
where
    T: TickSource,
    F: Fn(&Session<T>) -> bool,
{
    let reached = tokio::time::timeout(limit, async {
        while !done(&*session) {
            session.step().await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within {limit:?}");
}

/// Records every connection state the store passes through.
fn record_connection<T: TickSource>(session: &mut Session<T>) -> Rc<RefCell<Vec<ConnectionState>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session
        .store_mut()
        .subscribe(StateKey::Connection, move |new, _old| {
            if let StateSlice::Connection(state) = new {
                sink.borrow_mut().push(*state);
            }
        });
    seen
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn welcome_moves_session_into_lobby() {
        let (url, _server) = mock_server(|_, mut ws| async move {
            send_text(&mut ws, WELCOME).await;
            hold(ws).await;
        })
        .await;

        let mut session = session_for(&url);
        session.connect("alice", "room_1").await.unwrap();
        assert_eq!(session.store().state().connection, ConnectionState::Connected);

        step_until(&mut session, Duration::from_secs(1), |s| {
            s.store().state().phase == RoomPhase::Lobby
        })
        .await;

        let state = session.store().state();
        assert_eq!(state.local_player_id.as_deref(), Some("p1"));
        assert_eq!(state.local_player_name, "alice");
        assert_eq!(state.room.as_ref().map(|r| r.id.as_str()), Some("room_1"));
    }

    #[tokio::test]
    async fn abnormal_drop_reconnects_and_keeps_room() {
        let (url, _server) = mock_server(|index, mut ws| async move {
            if index == 0 {
                send_text(&mut ws, WELCOME).await;
                // Dropped without a closing handshake.
                drop(ws);
            } else {
                hold(ws).await;
            }
        })
        .await;

        let mut session = session_for(&url);
        let seen = record_connection(&mut session);
        session.connect("alice", "room_1").await.unwrap();

        let history = Rc::clone(&seen);
        step_until(&mut session, Duration::from_secs(3), move |s| {
            history.borrow().contains(&ConnectionState::Reconnecting)
                && s.store().state().connection == ConnectionState::Connected
        })
        .await;

        assert_eq!(session.store().state().phase, RoomPhase::Lobby);
        assert_eq!(session.connection().reconnect_attempt(), 0);
        assert!(session.connection().is_connected());
    }

    #[tokio::test]
    async fn empty_room_joins_assigned_room_and_rejoins_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let requested = Arc::new(Mutex::new(Vec::<String>::new()));
        let log = Arc::clone(&requested);

        let _server = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                let record = move |request: &Request,
                                   response: Response|
                      -> Result<Response, ErrorResponse> {
                    log.lock().unwrap().push(request.uri().to_string());
                    Ok(response)
                };
                let Ok(mut ws) = accept_hdr_async(stream, record).await else {
                    continue;
                };
                if index == 0 {
                    send_text(
                        &mut ws,
                        r#"{"type":"welcome","data":{"playerId":"p1","roomId":"room_7"}}"#,
                    )
                    .await;
                    drop(ws);
                } else {
                    tokio::spawn(hold(ws));
                }
                index += 1;
            }
        });

        let mut session = session_for(&url);
        session.connect("alice", "").await.unwrap();

        step_until(&mut session, Duration::from_secs(3), |s| {
            s.connection().reconnect_attempt() == 0
                && s.connection().is_connected()
                && s.store().state().phase == RoomPhase::Lobby
                && requested.lock().unwrap().len() == 2
        })
        .await;

        let state = session.store().state();
        assert_eq!(state.room.as_ref().map(|r| r.id.as_str()), Some("room_7"));
        let uris = requested.lock().unwrap().clone();
        assert_eq!(uris[0], "/ws?name=alice&room=");
        assert_eq!(uris[1], "/ws?name=alice&room=room_7");
    }

    #[tokio::test]
    async fn normal_close_returns_to_menu_without_retry() {
        let (url, _server) = mock_server(|_, mut ws| async move {
            send_text(&mut ws, WELCOME).await;
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "room closed".into(),
                }))
                .await;
        })
        .await;

        let mut session = session_for(&url);
        let seen = record_connection(&mut session);
        session.connect("alice", "room_1").await.unwrap();

        step_until(&mut session, Duration::from_secs(1), |s| {
            s.store().state().connection == ConnectionState::Disconnected
        })
        .await;

        let state = session.store().state();
        assert_eq!(state.phase, RoomPhase::Menu);
        assert!(state.room.is_none());
        assert!(!seen.borrow().contains(&ConnectionState::Reconnecting));
        assert!(session.connection().next_deadline().is_none());
    }

    #[tokio::test]
    async fn game_start_sends_predicted_input_to_server() {
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let inbox = Arc::clone(&received);

        let (url, _server) = mock_server(move |_, mut ws| {
            let inbox = Arc::clone(&inbox);
            async move {
                send_text(&mut ws, WELCOME).await;
                send_text(
                    &mut ws,
                    r#"{"type":"gameState","data":{
                        "players":{"p1":{"id":"p1","name":"alice","x":1,"y":1,"lives":3}},
                        "map":[[1,1,1,1],[1,0,0,1],[1,1,1,1]]
                    }}"#,
                )
                .await;
                send_text(&mut ws, r#"{"type":"gameStarted"}"#).await;
                while let Some(Ok(frame)) = ws.next().await {
                    if let Message::Text(text) = frame {
                        inbox.lock().unwrap().push(text.as_str().to_owned());
                        // Wakes the client loop so it re-checks the inbox.
                        send_text(&mut ws, r#"{"type":"pong"}"#).await;
                    }
                }
            }
        })
        .await;

        let ticks = ScriptedTicks::evenly(Tick::now(), Duration::from_millis(16), 30);
        let mut session = Session::new(config_for(&url), LoopConfig::default(), ticks);
        session.connect("alice", "room_1").await.unwrap();
        session
            .commands()
            .send(Command::Input(client::input::InputEvent::KeyDown(
                client::input::Key::Right,
            )))
            .unwrap();

        let inbox = Arc::clone(&received);
        step_until(&mut session, Duration::from_secs(2), move |_| {
            inbox
                .lock()
                .unwrap()
                .iter()
                .any(|frame| frame.contains("\"playerInput\""))
        })
        .await;

        let state = session.store().state();
        assert_eq!(state.phase, RoomPhase::Playing);
        assert_eq!(state.local_player().unwrap().x, 2.0);
        assert_eq!(state.predictions.last_sequence(), Some(1));
    }
}

/// CONNECTION FAILURE TESTS
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = session_for(&format!("ws://{addr}/ws"));
        let result = session.connect("alice", "room_1").await;

        assert!(matches!(result, Err(ConnectError::Refused(_))));
        assert_eq!(session.store().state().connection, ConnectionState::Failed);
        assert!(session.connection().next_deadline().is_none());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = ConnectionConfig {
            server_url: format!("ws://{addr}/ws"),
            open_timeout: Duration::from_millis(200),
            ..ConnectionConfig::default()
        };
        let mut session = Session::new(config, LoopConfig::default(), ScriptedTicks::default());
        let result = session.connect("alice", "room_1").await;

        assert_eq!(result, Err(ConnectError::Timeout(Duration::from_millis(200))));
    }

    #[tokio::test]
    async fn non_websocket_url_is_rejected() {
        let mut session = session_for("http://localhost:8080/ws");
        let result = session.connect("alice", "room_1").await;
        assert!(matches!(result, Err(ConnectError::InvalidUrl(_))));
    }
}

/// LOBBY HTTP TESTS
mod lobby_tests {
    use super::*;

    /// Serves one HTTP response and hands back the raw request it answered.
    async fn http_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (format!("http://{addr}"), task)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn list_rooms_parses_summaries() {
        let (base, server) = http_once(
            "200 OK",
            r#"[{"id":"room_1","playerCount":1,"maxPlayers":4,"state":"waiting","players":{"p1":"alice"},"createdAt":"2024-01-01T00:00:00Z"}]"#,
        )
        .await;

        let lobby = LobbyClient::new(&base).unwrap();
        let rooms = lobby.list_rooms().await.unwrap();

        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "room_1");
        assert_eq!(rooms[0].player_count, 1);
        assert_eq!(rooms[0].players.get("p1").map(String::as_str), Some("alice"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /rooms "));
    }

    #[tokio::test]
    async fn create_room_surfaces_upstream_errors() {
        let (base, server) = http_once("400 Bad Request", "Room name is required\n").await;

        let lobby = LobbyClient::new(&base).unwrap();
        let result = lobby.create_room("", 4).await;

        match result {
            Err(LobbyError::Upstream { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Room name is required");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /rooms "));
        assert!(request.contains(r#""maxPlayers":4"#));
    }
}
