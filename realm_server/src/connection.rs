//! Per-session inbound task.
//!
//! Flow:
//! 1. Wait (bounded) for the login frame, verify the token, claim the username.
//! 2. Send player info and the character list.
//! 3. Read and dispatch frames until the peer leaves, misbehaves or goes quiet.
//!
//! Every exit path ends in [`Session::disconnect`]; the flush tick delivers
//! the terminal message and releases the slot.

use std::sync::Arc;

use realm_shared::net::{
    check_frame_size, codes, decode_client_message, decode_packet, decode_raw_packet,
    ClientMessage, DisconnectCode, PlayerLogin, ProtocolError,
};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{
    dispatch::dispatch,
    realm::Realm,
    session::Session,
    transport::{FrameStream, InboundFrame, TransportError},
};

pub const MSG_NO_LOGIN: &str = "Did not receive login info";
pub const MSG_BAD_LOGIN: &str = "Received invalid login packet";
pub const MSG_ALREADY_LOGGED_IN: &str =
    "Already logged into this realm, please wait 60 seconds and try again";
pub const MSG_LIST_FAILED: &str = "Error loading characters";
pub const MSG_CLIENT_CLOSED: &str = "Client disconnected";
pub const MSG_TIMED_OUT: &str = "Connection timed out";
pub const MSG_INVALID_PACKET: &str = "Invalid packet sent by client";

/// Why a login was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejection {
    code: DisconnectCode,
    message: String,
}

impl Rejection {
    fn new(code: DisconnectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub async fn run_connection(
    realm: Arc<Realm>,
    session: Arc<Session>,
    mut stream: Box<dyn FrameStream>,
) {
    debug!("Client starting");
    if let Err(rejection) = login(&realm, &session, stream.as_mut()).await {
        session.disconnect(rejection.code, rejection.message);
        return;
    }
    read_loop(&realm, &session, stream.as_mut()).await;
    debug!("Inbound processing stopped");
}

async fn login(
    realm: &Realm,
    session: &Session,
    stream: &mut dyn FrameStream,
) -> Result<(), Rejection> {
    let deadline = Instant::now() + realm.config.login_timeout();
    let frame = loop {
        match timeout_at(deadline, stream.recv_frame()).await {
            Ok(Ok(InboundFrame::Text(text))) => break text,
            // Pings and pongs do not count as the login.
            Ok(Ok(InboundFrame::Liveness)) => continue,
            Ok(Ok(InboundFrame::Closed)) => {
                warn!("Connection closed before login");
                return Err(Rejection::new(DisconnectCode::RequestTimeout, MSG_NO_LOGIN));
            }
            Ok(Err(e @ TransportError::TooLarge { .. })) => {
                warn!(error = %e, "Invalid login packet");
                return Err(Rejection::new(DisconnectCode::BadRequest, MSG_BAD_LOGIN));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error reading login info");
                return Err(Rejection::new(DisconnectCode::RequestTimeout, MSG_NO_LOGIN));
            }
            Err(_) => {
                warn!(timeout_ms = realm.config.login_timeout_ms, "Login timed out");
                return Err(Rejection::new(DisconnectCode::RequestTimeout, MSG_NO_LOGIN));
            }
        }
    };

    let login = decode_login(&frame, realm.config.max_frame_bytes)?;

    let claims = realm.verifier.verify(&login.access_token).map_err(|e| {
        warn!(error = %e, "Rejected access token");
        Rejection::new(DisconnectCode::Unauthorized, e.player_message())
    })?;
    let username = claims.sub;

    realm
        .sessions
        .claim_username(session, &username)
        .map_err(|e| {
            warn!(%username, error = %e, "Duplicate login");
            Rejection::new(DisconnectCode::Conflict, MSG_ALREADY_LOGGED_IN)
        })?;

    if !session.authenticate(login.screen) {
        // Disconnected (kick, shutdown) while logging in.
        return Err(Rejection::new(DisconnectCode::ClientClosed, MSG_CLIENT_CLOSED));
    }
    info!(%username, "Client logged in");

    let mut characters = realm
        .characters
        .list_characters(&username)
        .await
        .map_err(|e| {
            warn!(%username, error = %e, "Listing characters failed");
            Rejection::new(DisconnectCode::InternalError, MSG_LIST_FAILED)
        })?;
    characters.resize(realm.config.character_slots, None);
    session.offer_characters(characters);
    debug!(%username, "Character selection offered");
    Ok(())
}

fn decode_login(frame: &str, max_frame_bytes: usize) -> Result<PlayerLogin, Rejection> {
    let bad_login = |e: ProtocolError| {
        warn!(error = %e, "Invalid login packet");
        Rejection::new(DisconnectCode::BadRequest, MSG_BAD_LOGIN)
    };
    check_frame_size(frame, max_frame_bytes).map_err(bad_login)?;
    let raw = decode_raw_packet(frame).map_err(bad_login)?;
    if raw.code != codes::PLAYER_LOGIN {
        warn!(code = %raw.code, "First packet was not a login");
        return Err(Rejection::new(DisconnectCode::MethodNotAllowed, MSG_BAD_LOGIN));
    }
    match decode_packet(raw) {
        Ok(ClientMessage::PlayerLogin(login)) => Ok(login),
        Ok(other) => {
            warn!(code = other.code(), "First packet was not a login");
            Err(Rejection::new(DisconnectCode::MethodNotAllowed, MSG_BAD_LOGIN))
        }
        Err(e) => Err(bad_login(e)),
    }
}

async fn read_loop(realm: &Arc<Realm>, session: &Arc<Session>, stream: &mut dyn FrameStream) {
    let liveness = realm.config.liveness_timeout();
    loop {
        if session.is_disconnecting() {
            return;
        }
        let frame = match timeout(liveness, stream.recv_frame()).await {
            Ok(Ok(InboundFrame::Text(text))) => text,
            Ok(Ok(InboundFrame::Liveness)) => continue,
            Ok(Ok(InboundFrame::Closed)) => {
                info!("Client closed the connection");
                session.disconnect(DisconnectCode::ClientClosed, MSG_CLIENT_CLOSED);
                return;
            }
            Ok(Err(e @ TransportError::TooLarge { .. })) => {
                if !session.is_disconnecting() {
                    warn!(error = %e, "Error processing packet, disconnecting");
                    session.disconnect(DisconnectCode::BadRequest, MSG_INVALID_PACKET);
                }
                return;
            }
            Ok(Err(e)) => {
                if !session.is_disconnecting() {
                    warn!(error = %e, "Transport read failed");
                }
                session.disconnect(DisconnectCode::ClientClosed, MSG_CLIENT_CLOSED);
                return;
            }
            Err(_) => {
                warn!(timeout_ms = realm.config.liveness_timeout_ms, "Client went quiet");
                session.disconnect(DisconnectCode::RequestTimeout, MSG_TIMED_OUT);
                return;
            }
        };

        let msg = match check_frame_size(&frame, realm.config.max_frame_bytes)
            .and_then(|()| decode_client_message(&frame))
        {
            Ok(msg) => msg,
            Err(e) => {
                if session.is_disconnecting() {
                    debug!(error = %e, "Ignoring bad frame while draining");
                    return;
                }
                warn!(error = %e, "Error processing packet, disconnecting");
                session.disconnect(DisconnectCode::BadRequest, MSG_INVALID_PACKET);
                return;
            }
        };

        if session.is_disconnecting() {
            return;
        }
        let code = msg.code();
        if let Err(e) = dispatch(realm, session, msg) {
            warn!(code, error = %e, "Packet handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use realm_shared::{
        auth::issue_token,
        net::{InterfaceButtonClick, MoveCommand, Screen, ServerMessage},
    };

    use super::*;
    use crate::{
        session::ConnectionState,
        test_support::{self, SECRET},
    };

    fn login_msg(token: String) -> ClientMessage {
        ClientMessage::PlayerLogin(PlayerLogin {
            access_token: token,
            screen: Screen {
                width: 800,
                height: 600,
            },
        })
    }

    fn terminal(session: &Session) -> Option<(DisconnectCode, String)> {
        std::iter::from_fn(|| session.outbox().pop()).find_map(|m| match m {
            ServerMessage::PlayerDisconnect { code, message } => Some((code, message)),
            _ => None,
        })
    }

    #[tokio::test]
    async fn login_offers_characters() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        peer.hang_up();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;

        assert_eq!(session.username(), Some("alice"));
        let sent: Vec<_> = std::iter::from_fn(|| session.outbox().pop()).collect();
        assert_eq!(sent[0], ServerMessage::PlayerInfo { player_id: 0 });
        match &sent[1] {
            ServerMessage::PlayerCharacters { characters } => {
                assert_eq!(characters.len(), 9);
                assert!(characters[0].is_some());
            }
            other => panic!("expected characters, got {other:?}"),
        }
        assert_eq!(
            sent.last(),
            Some(&ServerMessage::PlayerDisconnect {
                code: DisconnectCode::ClientClosed,
                message: MSG_CLIENT_CLOSED.into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_login_times_out() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        let task = tokio::spawn(run_connection(
            Arc::clone(&realm),
            Arc::clone(&session),
            Box::new(stream),
        ));
        tokio::time::sleep(Duration::from_secs(6)).await;
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        task.await.unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnecting);
        assert_eq!(session.username(), None);
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::RequestTimeout, MSG_NO_LOGIN.into()))
        );
    }

    #[tokio::test]
    async fn pings_before_login_are_skipped() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_pong();
        peer.send_pong();
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        peer.hang_up();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;

        assert_eq!(session.username(), Some("alice"));
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::ClientClosed, MSG_CLIENT_CLOSED.into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pings_do_not_extend_the_login_deadline() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        let task = tokio::spawn(run_connection(
            Arc::clone(&realm),
            Arc::clone(&session),
            Box::new(stream),
        ));
        for _ in 0..6 {
            peer.send_pong();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        task.await.unwrap();

        assert_eq!(session.username(), None);
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::RequestTimeout, MSG_NO_LOGIN.into()))
        );
    }

    #[tokio::test]
    async fn first_packet_must_be_login() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&ClientMessage::CharacterMove(MoveCommand::default()))
            .unwrap();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::MethodNotAllowed, MSG_BAD_LOGIN.into()))
        );
    }

    #[tokio::test]
    async fn garbage_login_is_bad_request() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_text("{not json");
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::BadRequest, MSG_BAD_LOGIN.into()))
        );
    }

    #[tokio::test]
    async fn forged_token_is_unauthorized() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        let forged = issue_token(
            "wrong-secret",
            &realm.config.token_issuer,
            "alice",
            chrono::Duration::minutes(5),
        )
        .unwrap();
        peer.send_message(&login_msg(forged)).unwrap();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::Unauthorized, "Error parsing token".into()))
        );
        assert_eq!(session.username(), None);
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        let expired = issue_token(
            SECRET,
            &realm.config.token_issuer,
            "alice",
            chrono::Duration::minutes(-10),
        )
        .unwrap();
        peer.send_message(&login_msg(expired)).unwrap();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::Unauthorized, "Login session expired".into()))
        );
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let realm = test_support::realm();
        let first = test_support::session(&realm);
        realm.sessions.claim_username(&first, "alice").unwrap();

        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::Conflict, MSG_ALREADY_LOGGED_IN.into()))
        );
        assert_eq!(first.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn unknown_code_is_bad_request() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        peer.send_text(r#"{"code":"Teleport","data":{}}"#);
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::BadRequest, MSG_INVALID_PACKET.into()))
        );
    }

    #[tokio::test]
    async fn handler_errors_keep_the_session() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        peer.send_message(&ClientMessage::InterfaceButtonClick(InterfaceButtonClick {
            interface_id: 2,
            button_id: 42,
        }))
        .unwrap();
        peer.send_message(&ClientMessage::InterfaceButtonClick(InterfaceButtonClick {
            interface_id: 2,
            button_id: 0,
        }))
        .unwrap();
        peer.hang_up();
        run_connection(Arc::clone(&realm), Arc::clone(&session), Box::new(stream)).await;
        assert!(std::iter::from_fn(|| session.outbox().pop())
            .any(|m| m == ServerMessage::CharacterLoading { character_id: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let realm = test_support::realm();
        let (session, stream, peer) = test_support::connect(&realm);
        peer.send_message(&login_msg(test_support::token(&realm, "alice")))
            .unwrap();
        let task = tokio::spawn(run_connection(
            Arc::clone(&realm),
            Arc::clone(&session),
            Box::new(stream),
        ));
        // Pongs keep the session alive past one deadline.
        tokio::time::sleep(Duration::from_secs(4)).await;
        peer.send_pong();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!session.is_disconnecting());
        task.await.unwrap();
        assert_eq!(
            terminal(&session),
            Some((DisconnectCode::RequestTimeout, MSG_TIMED_OUT.into()))
        );
    }
}
