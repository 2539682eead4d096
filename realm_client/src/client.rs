//! Client implementation.
//!
//! The client maintains:
//! - One WebSocket carrying JSON packets both ways
//! - The login / character selection / world loading flow
//! - The latest set of visible characters
//! - The terminal disconnect reason, if the server sent one

use std::time::Duration;

use anyhow::Context;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use realm_shared::net::{
    decode_server_message, encode_client_message, CharacterState, CharacterSummary, ClientMessage,
    DisconnectCode, DoneLoading, InterfaceButtonClick, PlayerLogin, Screen, ServerMessage,
    CHARACTER_SELECT_INTERFACE, DONE_LOADING_PLAY,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use crate::input::{build_command, InputState};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Socket open, login not yet acknowledged.
    Connecting,
    /// Player info received; waiting for or choosing a character.
    SelectingCharacter,
    /// Character chosen; waiting for world data.
    LoadingCharacter,
    /// World data received, character is in the world.
    InWorld,
    Disconnected,
}

/// High-level realm client.
pub struct GameClient {
    pub state: ClientState,
    pub player_id: Option<u32>,
    pub characters: Vec<Option<CharacterSummary>>,
    /// Name of the world the character is in.
    pub world: Option<String>,
    /// Characters from the latest state update.
    pub visible: Vec<CharacterState>,
    /// Reason sent with the server's final message.
    pub disconnect: Option<(DisconnectCode, String)>,

    sink: SplitSink<Ws, Message>,
    stream: SplitStream<Ws>,
}

impl GameClient {
    /// Opens a WebSocket to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let url = format!("ws://{addr}/");
        info!(%url, "Connecting to realm");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("connect {url}"))?;
        let (sink, stream) = ws.split();
        Ok(Self {
            state: ClientState::Connecting,
            player_id: None,
            characters: Vec::new(),
            world: None,
            visible: Vec::new(),
            disconnect: None,
            sink,
            stream,
        })
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        let text = encode_client_message(msg)?;
        self.sink
            .send(Message::Text(text))
            .await
            .with_context(|| format!("send {}", msg.code()))
    }

    /// Sends the login packet. Must be the first packet on the connection.
    pub async fn login(&mut self, access_token: &str, screen: Screen) -> anyhow::Result<()> {
        self.send(&ClientMessage::PlayerLogin(PlayerLogin {
            access_token: access_token.to_string(),
            screen,
        }))
        .await
    }

    /// Clicks a slot on the character selection screen.
    pub async fn select_character(&mut self, slot: i32) -> anyhow::Result<()> {
        self.send(&ClientMessage::InterfaceButtonClick(InterfaceButtonClick {
            interface_id: CHARACTER_SELECT_INTERFACE,
            button_id: slot,
        }))
        .await?;
        self.state = ClientState::LoadingCharacter;
        Ok(())
    }

    /// Tells the server the client is ready to enter the world.
    pub async fn done_loading(&mut self) -> anyhow::Result<()> {
        self.send(&ClientMessage::DoneLoading(DoneLoading {
            what: DONE_LOADING_PLAY.to_string(),
        }))
        .await
    }

    pub async fn send_move(&mut self, input: InputState) -> anyhow::Result<()> {
        self.send(&build_command(input)).await
    }

    /// Next server message, or `None` once the connection is closed.
    /// Transport pings are answered by the WebSocket layer.
    pub async fn recv(&mut self) -> anyhow::Result<Option<ServerMessage>> {
        loop {
            let frame = match self.stream.next().await {
                None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.state = ClientState::Disconnected;
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e).context("read frame"),
                Some(Ok(frame)) => frame,
            };
            match frame {
                Message::Text(text) => {
                    let msg = decode_server_message(&text)?;
                    self.apply(&msg);
                    return Ok(Some(msg));
                }
                Message::Close(frame) => {
                    debug!(?frame, "Server closed the connection");
                    self.state = ClientState::Disconnected;
                    return Ok(None);
                }
                _ => continue,
            }
        }
    }

    /// Like [`recv`](Self::recv), but gives up after `within`.
    pub async fn recv_timeout(
        &mut self,
        within: Duration,
    ) -> anyhow::Result<Option<ServerMessage>> {
        tokio::time::timeout(within, self.recv())
            .await
            .context("timed out waiting for server")?
    }

    /// Reads until a message matches `pred`.
    pub async fn wait_for(
        &mut self,
        within: Duration,
        mut pred: impl FnMut(&ServerMessage) -> bool,
    ) -> anyhow::Result<ServerMessage> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(left).await? {
                Some(msg) if pred(&msg) => return Ok(msg),
                Some(_) => {}
                None => anyhow::bail!(
                    "connection closed while waiting (disconnect: {:?})",
                    self.disconnect
                ),
            }
        }
    }

    fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::PlayerInfo { player_id } => {
                info!(player_id, "Logged in");
                self.player_id = Some(*player_id);
                self.state = ClientState::SelectingCharacter;
            }
            ServerMessage::PlayerCharacters { characters } => {
                self.characters = characters.clone();
            }
            ServerMessage::CharacterLoading { character_id } => {
                debug!(character_id, "Character loading");
                self.state = ClientState::LoadingCharacter;
            }
            ServerMessage::WorldData { name, tilemap } => {
                info!(
                    world = %name,
                    width = tilemap.width,
                    height = tilemap.height,
                    "Entered world"
                );
                self.world = Some(name.clone());
                self.state = ClientState::InWorld;
            }
            ServerMessage::LocalCharacterState { characters } => {
                self.visible = characters.clone();
            }
            ServerMessage::PlayerDisconnect { code, message } => {
                info!(code = code.as_u16(), %message, "Disconnected by server");
                self.disconnect = Some((*code, message.clone()));
                self.state = ClientState::Disconnected;
            }
            ServerMessage::Ping {} => {}
        }
    }

    /// Our own character in the latest state update.
    pub fn own_character(&self) -> Option<&CharacterState> {
        let player_id = self.player_id?;
        self.visible.iter().find(|c| c.player_id == player_id)
    }

    /// First occupied character slot.
    pub fn first_character_slot(&self) -> Option<i32> {
        self.characters
            .iter()
            .position(Option::is_some)
            .and_then(|i| i32::try_from(i).ok())
    }

    /// Sends a normal close frame.
    pub async fn close(mut self) -> anyhow::Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e).context("close"),
        }
    }
}
