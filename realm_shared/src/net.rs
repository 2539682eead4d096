//! Wire protocol.
//!
//! Every frame is a UTF-8 JSON object `{"code": <tag>, "data": <payload>}`.
//!
//! Inbound frames are decoded in two steps: the envelope first, then the
//! payload through a tag-to-decoder table. That keeps "unknown code" and
//! "known code, bad payload" distinguishable for logging while both remain
//! protocol errors. Outbound messages use serde's adjacent tagging directly.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::world::Tilemap;

/// Interface id of the character selection screen.
pub const CHARACTER_SELECT_INTERFACE: i32 = 2;

/// `DoneLoading.what` sent once the client is ready to enter the world.
pub const DONE_LOADING_PLAY: &str = "play";

/// WebSocket close code used when the server is full.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Inbound message tags.
pub mod codes {
    pub const PLAYER_LOGIN: &str = "PlayerLogin";
    pub const CHARACTER_MOVE: &str = "CharacterMove";
    pub const PLAYER_MOVE: &str = "PlayerMove";
    pub const INTERFACE_BUTTON_CLICK: &str = "InterfaceButtonClick";
    pub const DONE_LOADING: &str = "DoneLoading";
}

/// Machine-readable reason attached to `PlayerDisconnect`.
///
/// Values follow HTTP status semantics so the browser client can show them
/// next to the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum DisconnectCode {
    BadRequest,
    Unauthorized,
    MethodNotAllowed,
    RequestTimeout,
    Conflict,
    ClientClosed,
    InternalError,
    ShuttingDown,
}

impl DisconnectCode {
    pub fn as_u16(self) -> u16 {
        match self {
            DisconnectCode::BadRequest => 400,
            DisconnectCode::Unauthorized => 401,
            DisconnectCode::MethodNotAllowed => 405,
            DisconnectCode::RequestTimeout => 408,
            DisconnectCode::Conflict => 409,
            DisconnectCode::ClientClosed => 499,
            DisconnectCode::InternalError => 500,
            DisconnectCode::ShuttingDown => 503,
        }
    }

    /// WebSocket close code sent after the `PlayerDisconnect` message.
    pub fn close_code(self) -> u16 {
        match self {
            DisconnectCode::BadRequest | DisconnectCode::MethodNotAllowed => 1002,
            DisconnectCode::Unauthorized
            | DisconnectCode::Conflict
            | DisconnectCode::RequestTimeout => 1008,
            DisconnectCode::ClientClosed => 1000,
            DisconnectCode::InternalError => 1011,
            DisconnectCode::ShuttingDown => 1001,
        }
    }
}

impl From<DisconnectCode> for u16 {
    fn from(code: DisconnectCode) -> u16 {
        code.as_u16()
    }
}

impl TryFrom<u16> for DisconnectCode {
    type Error = String;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            400 => Ok(DisconnectCode::BadRequest),
            401 => Ok(DisconnectCode::Unauthorized),
            405 => Ok(DisconnectCode::MethodNotAllowed),
            408 => Ok(DisconnectCode::RequestTimeout),
            409 => Ok(DisconnectCode::Conflict),
            499 => Ok(DisconnectCode::ClientClosed),
            500 => Ok(DisconnectCode::InternalError),
            503 => Ok(DisconnectCode::ShuttingDown),
            other => Err(format!("unknown disconnect code {other}")),
        }
    }
}

/// Errors that terminate a session's inbound loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown packet code {0:?}")]
    UnknownCode(String),
    #[error("decode {code}: {source}")]
    Decode {
        code: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// Rejects frames above `limit` bytes before any parsing.
pub fn check_frame_size(frame: &str, limit: usize) -> Result<(), ProtocolError> {
    if frame.len() > limit {
        return Err(ProtocolError::TooLarge {
            size: frame.len(),
            limit,
        });
    }
    Ok(())
}

/// Undecoded inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPacket {
    pub code: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Screen size declared by the client at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLogin {
    pub access_token: String,
    pub screen: Screen,
}

/// Directional input. Missing directions are not pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCommand {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceButtonClick {
    pub interface_id: i32,
    pub button_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneLoading {
    pub what: String,
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "data")]
pub enum ClientMessage {
    PlayerLogin(PlayerLogin),
    CharacterMove(MoveCommand),
    PlayerMove(MoveCommand),
    InterfaceButtonClick(InterfaceButtonClick),
    DoneLoading(DoneLoading),
}

impl ClientMessage {
    pub fn code(&self) -> &'static str {
        match self {
            ClientMessage::PlayerLogin(_) => codes::PLAYER_LOGIN,
            ClientMessage::CharacterMove(_) => codes::CHARACTER_MOVE,
            ClientMessage::PlayerMove(_) => codes::PLAYER_MOVE,
            ClientMessage::InterfaceButtonClick(_) => codes::INTERFACE_BUTTON_CLICK,
            ClientMessage::DoneLoading(_) => codes::DONE_LOADING,
        }
    }
}

type Decoder = fn(serde_json::Value) -> serde_json::Result<ClientMessage>;

fn decode_player_login(v: serde_json::Value) -> serde_json::Result<ClientMessage> {
    serde_json::from_value(v).map(ClientMessage::PlayerLogin)
}

fn decode_character_move(v: serde_json::Value) -> serde_json::Result<ClientMessage> {
    serde_json::from_value(v).map(ClientMessage::CharacterMove)
}

fn decode_player_move(v: serde_json::Value) -> serde_json::Result<ClientMessage> {
    serde_json::from_value(v).map(ClientMessage::PlayerMove)
}

fn decode_button_click(v: serde_json::Value) -> serde_json::Result<ClientMessage> {
    serde_json::from_value(v).map(ClientMessage::InterfaceButtonClick)
}

fn decode_done_loading(v: serde_json::Value) -> serde_json::Result<ClientMessage> {
    serde_json::from_value(v).map(ClientMessage::DoneLoading)
}

const DECODERS: &[(&str, Decoder)] = &[
    (codes::PLAYER_LOGIN, decode_player_login),
    (codes::CHARACTER_MOVE, decode_character_move),
    (codes::PLAYER_MOVE, decode_player_move),
    (codes::INTERFACE_BUTTON_CLICK, decode_button_click),
    (codes::DONE_LOADING, decode_done_loading),
];

/// Decodes the envelope only.
pub fn decode_raw_packet(frame: &str) -> Result<RawPacket, ProtocolError> {
    serde_json::from_str(frame).map_err(ProtocolError::Malformed)
}

/// Decodes a raw envelope into a typed message.
pub fn decode_packet(raw: RawPacket) -> Result<ClientMessage, ProtocolError> {
    let decoder = DECODERS
        .iter()
        .find(|(code, _)| *code == raw.code)
        .map(|(_, decoder)| *decoder)
        .ok_or_else(|| ProtocolError::UnknownCode(raw.code.clone()))?;
    decoder(raw.data).map_err(|source| ProtocolError::Decode {
        code: raw.code,
        source,
    })
}

/// Decodes one inbound text frame.
pub fn decode_client_message(frame: &str) -> Result<ClientMessage, ProtocolError> {
    decode_packet(decode_raw_packet(frame)?)
}

pub fn encode_client_message(msg: &ClientMessage) -> anyhow::Result<String> {
    serde_json::to_string(msg).with_context(|| format!("serialize {}", msg.code()))
}

/// One entry of the character selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSummary {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStateLocation {
    pub world: String,
    pub x: i32,
    pub y: i32,
}

/// A character visible to the receiving player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterState {
    pub id: u32,
    pub player_id: u32,
    pub location: CharacterStateLocation,
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "data")]
pub enum ServerMessage {
    PlayerInfo {
        player_id: u32,
    },
    /// One entry per slot; empty slots are `null`.
    PlayerCharacters {
        characters: Vec<Option<CharacterSummary>>,
    },
    CharacterLoading {
        character_id: u32,
    },
    WorldData {
        name: String,
        tilemap: Tilemap,
    },
    LocalCharacterState {
        characters: Vec<CharacterState>,
    },
    /// Terminal: nothing is sent after it.
    PlayerDisconnect {
        code: DisconnectCode,
        message: String,
    },
    Ping {},
}

impl ServerMessage {
    pub fn code(&self) -> &'static str {
        match self {
            ServerMessage::PlayerInfo { .. } => "PlayerInfo",
            ServerMessage::PlayerCharacters { .. } => "PlayerCharacters",
            ServerMessage::CharacterLoading { .. } => "CharacterLoading",
            ServerMessage::WorldData { .. } => "WorldData",
            ServerMessage::LocalCharacterState { .. } => "LocalCharacterState",
            ServerMessage::PlayerDisconnect { .. } => "PlayerDisconnect",
            ServerMessage::Ping {} => "Ping",
        }
    }

    /// Returns the disconnect code if this message ends the session.
    pub fn terminal_code(&self) -> Option<DisconnectCode> {
        match self {
            ServerMessage::PlayerDisconnect { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub fn encode_server_message(msg: &ServerMessage) -> anyhow::Result<String> {
    serde_json::to_string(msg).with_context(|| format!("serialize {}", msg.code()))
}

pub fn decode_server_message(frame: &str) -> anyhow::Result<ServerMessage> {
    serde_json::from_str(frame).context("deserialize server message")
}
