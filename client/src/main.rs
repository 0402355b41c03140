use clap::Parser;
use client::input::{InputEvent, Key};
use client::lobby::LobbyClient;
use client::network::ConnectionConfig;
use client::session::{Command, Session};
use client::simulation::LoopConfig;
use client::ticker::FrameTicker;
use log::{info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the game server
    #[arg(short = 's', long, default_value = "ws://localhost:8080/ws")]
    server: String,

    /// Base URL of the HTTP lobby
    #[arg(long, default_value = "http://localhost:8080")]
    lobby: String,

    /// Display name
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Room to join
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// List open rooms and exit unless a room is given
    #[arg(long)]
    list_rooms: bool,

    /// Create a room with this name and join it
    #[arg(long)]
    create_room: Option<String>,

    /// Seats in a created room
    #[arg(long, default_value = "4")]
    max_players: u32,

    /// Simulation frames per second
    #[arg(long, default_value = "60")]
    tick_rate: u32,

    /// Minimum spacing between input sends, in milliseconds
    #[arg(long, default_value = "16")]
    input_throttle: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let lobby = LobbyClient::new(&args.lobby)?;
    if args.list_rooms {
        for room in lobby.list_rooms().await? {
            println!(
                "{}  {}/{} players  [{}]",
                room.id, room.player_count, room.max_players, room.state
            );
        }
    }

    let room = match (&args.create_room, &args.room) {
        (Some(name), _) => Some(lobby.create_room(name, args.max_players).await?.id),
        (None, room) => room.clone(),
    };
    let Some(room) = room else {
        if !args.list_rooms {
            eprintln!("Nothing to do: pass --room, --create-room or --list-rooms");
        }
        return Ok(());
    };

    let connection_config = ConnectionConfig {
        server_url: args.server.clone(),
        ..ConnectionConfig::default()
    };
    let loop_config = LoopConfig {
        tick_rate: args.tick_rate,
        input_throttle: Duration::from_millis(args.input_throttle),
        ..LoopConfig::default()
    };
    let ticker = FrameTicker::new(loop_config.tick_rate);
    let mut session = Session::new(connection_config, loop_config, ticker);

    info!("Joining room {} as {}", room, args.name);
    info!("Controls: +w/-w (a, s, d) to press/release, 'bomb', 'say <text>', 'quit'");
    session.connect(&args.name, &room).await?;

    tokio::spawn(read_commands(session.commands()));
    session.run().await;

    Ok(())
}

async fn read_commands(commands: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let parsed = parse_command(&line);
        if parsed.is_empty() && !line.trim().is_empty() {
            warn!("Unrecognized command '{}'", line.trim());
        }
        for command in parsed {
            if commands.send(command).is_err() {
                return;
            }
        }
    }
    let _ = commands.send(Command::Shutdown);
}

fn parse_command(line: &str) -> Vec<Command> {
    let line = line.trim();
    if let Some(text) = line.strip_prefix("say ") {
        return vec![Command::Chat(text.to_string())];
    }

    let key_event = |name: &str, pressed: bool| {
        Key::from_name(name).map(|key| {
            Command::Input(if pressed {
                InputEvent::KeyDown(key)
            } else {
                InputEvent::KeyUp(key)
            })
        })
    };

    match line {
        "bomb" => vec![
            Command::Input(InputEvent::KeyDown(Key::Bomb)),
            Command::Input(InputEvent::KeyUp(Key::Bomb)),
        ],
        "blur" => vec![Command::Input(InputEvent::Blur)],
        "focus" => vec![Command::Input(InputEvent::Focus)],
        "chat" => vec![Command::ToggleChat],
        "leave" => vec![Command::Disconnect],
        "quit" | "exit" => vec![Command::Shutdown],
        _ => {
            if let Some(name) = line.strip_prefix('+') {
                key_event(name, true).into_iter().collect()
            } else if let Some(name) = line.strip_prefix('-') {
                key_event(name, false).into_iter().collect()
            } else {
                Vec::new()
            }
        }
    }
}
