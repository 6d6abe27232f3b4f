//! Wire protocol
//!
//! Every frame carries one JSON envelope `{"event": <name>, "data": <payload>}`.
//! Inbound envelopes are decoded by event name into a typed [`ClientMessage`];
//! payload validation happens here so handlers only ever see well-formed intents.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::game::state::{PlayerId, PlayerPosition, PlayerSummary};
use crate::lobby::room::RoomInfo;
use crate::util::vec3::Vec3;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinGame { pseudo: String },
    PlayerReady,
    PlayerMove(PlayerPosition),
    GetPlayersList,
    SendChatMessage { message: String, room: Option<String> },
    /// Heartbeat
    Ping { timestamp: u64 },
    CreateRoom { room: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    GetRooms,
}

impl ClientMessage {
    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            ClientMessage::JoinGame { .. } => "joinGame",
            ClientMessage::PlayerReady => "playerReady",
            ClientMessage::PlayerMove(_) => "playerMove",
            ClientMessage::GetPlayersList => "getPlayersList",
            ClientMessage::SendChatMessage { .. } => "sendChatMessage",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::CreateRoom { .. } => "createRoom",
            ClientMessage::JoinRoom { .. } => "joinRoom",
            ClientMessage::LeaveRoom { .. } => "leaveRoom",
            ClientMessage::GetRooms => "getRooms",
        }
    }
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    GameJoined { room: String, id: PlayerId },
    PlayersList { players: Vec<PlayerSummary> },
    SpawnPlayer { id: PlayerId, pseudo: String },
    UpdatePlayer {
        id: PlayerId,
        x: f32,
        y: f32,
        is_running: bool,
        is_idle: bool,
    },
    RemovePlayer { id: PlayerId },
    ChatMessage {
        id: PlayerId,
        pseudo: String,
        message: String,
        time: u64,
    },
    /// Raw map JSON, exactly as stored
    LoadMap(String),
    /// Sent to one connection only
    RespawnPlayer(Vec3),
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
    RoomJoined { room: String, members: Vec<PlayerId> },
    RoomLeft { room: String },
    RoomsList { rooms: Vec<RoomInfo> },
    Error { reason: String },
}

impl ServerMessage {
    pub fn update_player(id: PlayerId, position: PlayerPosition) -> Self {
        ServerMessage::UpdatePlayer {
            id,
            x: position.x,
            y: position.y,
            is_running: position.is_running,
            is_idle: position.is_idle,
        }
    }
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("Unknown event '{0}'")]
    UnknownEvent(String),
    #[error("Invalid '{event}' payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Non-finite coordinates in playerMove")]
    NonFiniteCoordinates,
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct JoinGamePayload {
    pseudo: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovePayload {
    x: f32,
    y: f32,
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    is_idle: bool,
}

#[derive(Deserialize)]
struct ChatPayload {
    message: String,
    #[serde(default)]
    room: Option<String>,
}

#[derive(Deserialize)]
struct PingPayload {
    #[serde(default)]
    timestamp: u64,
}

#[derive(Deserialize)]
struct RoomPayload {
    room: String,
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Decode one inbound frame
pub fn decode(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let Envelope { event, data } =
        serde_json::from_slice(data).map_err(ProtocolError::Envelope)?;

    let message = match event.as_str() {
        "joinGame" => {
            let p: JoinGamePayload = payload(&event, data)?;
            ClientMessage::JoinGame { pseudo: p.pseudo }
        }
        "playerReady" => ClientMessage::PlayerReady,
        "playerMove" => {
            let p: MovePayload = payload(&event, data)?;
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(ProtocolError::NonFiniteCoordinates);
            }
            ClientMessage::PlayerMove(PlayerPosition::new(p.x, p.y, p.is_running, p.is_idle))
        }
        "getPlayersList" => ClientMessage::GetPlayersList,
        "sendChatMessage" => {
            let p: ChatPayload = payload(&event, data)?;
            ClientMessage::SendChatMessage {
                message: p.message,
                room: p.room,
            }
        }
        "ping" => {
            let p: PingPayload = if data.is_null() {
                PingPayload { timestamp: 0 }
            } else {
                payload(&event, data)?
            };
            ClientMessage::Ping { timestamp: p.timestamp }
        }
        "createRoom" => ClientMessage::CreateRoom {
            room: payload::<RoomPayload>(&event, data)?.room,
        },
        "joinRoom" => ClientMessage::JoinRoom {
            room: payload::<RoomPayload>(&event, data)?.room,
        },
        "leaveRoom" => ClientMessage::LeaveRoom {
            room: payload::<RoomPayload>(&event, data)?.room,
        },
        "getRooms" => ClientMessage::GetRooms,
        _ => return Err(ProtocolError::UnknownEvent(event)),
    };

    Ok(message)
}

/// Encode an outbound message
pub fn encode(message: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Encode)
}
