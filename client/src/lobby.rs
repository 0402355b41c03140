//! HTTP lobby: room discovery and creation ahead of the WebSocket join

use crate::error::LobbyError;
use log::{debug, info};
use reqwest::{Client, Response};
use serde::Serialize;
use shared::{RoomSummary, MAX_PLAYERS_PER_ROOM};
use url::Url;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest<'a> {
    name: &'a str,
    max_players: u32,
}

/// Thin wrapper around reqwest for the lobby endpoints.
#[derive(Clone)]
pub struct LobbyClient {
    http: Client,
    base_url: Url,
}

impl LobbyClient {
    pub fn new(base_url: &str) -> Result<Self, LobbyError> {
        let base_url = Url::parse(base_url).map_err(|e| LobbyError::InvalidUrl(e.to_string()))?;
        match base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(LobbyError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn rooms_url(&self) -> String {
        format!("{}/rooms", self.base_url.as_str().trim_end_matches('/'))
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, LobbyError> {
        let url = self.rooms_url();
        debug!("GET {}", url);
        let res = self.http.get(url).send().await?;
        let res = check_status(res).await?;
        let rooms: Vec<RoomSummary> = res.json().await?;
        debug!("Lobby lists {} rooms", rooms.len());
        Ok(rooms)
    }

    /// Creates a room. The server clamps `max_players` into its own range.
    pub async fn create_room(&self, name: &str, max_players: u32) -> Result<RoomSummary, LobbyError> {
        let url = self.rooms_url();
        let body = CreateRoomRequest {
            name,
            max_players: max_players.min(MAX_PLAYERS_PER_ROOM),
        };
        debug!("POST {}", url);
        let res = self.http.post(url).json(&body).send().await?;
        let res = check_status(res).await?;
        let room: RoomSummary = res.json().await?;
        info!("Created room {} ({} players max)", room.id, room.max_players);
        Ok(room)
    }
}

// Keep upstream status and body text so callers can report why the lobby refused.
async fn check_status(res: Response) -> Result<Response, LobbyError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let message = res.text().await.unwrap_or_default().trim().to_string();
    Err(LobbyError::Upstream {
        status: status.as_u16(),
        message,
    })
}
