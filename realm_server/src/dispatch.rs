//! Inbound packet handlers.
//!
//! Decoding already turned the frame into a [`ClientMessage`]; this is the
//! closed match from message kind to handler. Handler errors are reported to
//! the caller and never end the session on their own.

use std::sync::Arc;

use realm_shared::{
    movement::MovementIntent,
    net::{
        ClientMessage, DoneLoading, InterfaceButtonClick, MoveCommand, CHARACTER_SELECT_INTERFACE,
        DONE_LOADING_PLAY,
    },
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    realm::Realm,
    session::{BeginLoad, IntentOutcome, SelectOutcome, Session},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("login sent on an authenticated session")]
    RepeatedLogin,
    #[error("unknown interface {0}")]
    UnknownInterface(i32),
    #[error("button {button} is outside the {slots} character slots")]
    ButtonOutOfRange { button: i32, slots: usize },
    #[error("character slot {0} is empty")]
    EmptySlot(i32),
    #[error("character selection is not open")]
    SelectionClosed,
    #[error("unknown loading stage {0:?}")]
    UnknownLoadStage(String),
    #[error("no character selected to load")]
    NothingToLoad,
}

pub fn dispatch(
    realm: &Arc<Realm>,
    session: &Arc<Session>,
    msg: ClientMessage,
) -> Result<(), HandlerError> {
    match msg {
        ClientMessage::PlayerLogin(_) => Err(HandlerError::RepeatedLogin),
        ClientMessage::CharacterMove(cmd) | ClientMessage::PlayerMove(cmd) => {
            handle_move(session, cmd);
            Ok(())
        }
        ClientMessage::InterfaceButtonClick(click) => handle_button_click(session, click),
        ClientMessage::DoneLoading(done) => handle_done_loading(realm, session, done),
    }
}

fn handle_move(session: &Session, cmd: MoveCommand) {
    let intent = MovementIntent::from_flags(cmd.up, cmd.down, cmd.left, cmd.right);
    if intent.is_empty() {
        return;
    }
    match session.submit_intent(intent) {
        IntentOutcome::Accepted => {}
        // Back-pressure: one step per tick.
        IntentOutcome::Pending => debug!(?intent, "Intent dropped, previous one still pending"),
        IntentOutcome::NotActive => debug!(?intent, "Intent ignored, no active character"),
    }
}

fn handle_button_click(session: &Session, click: InterfaceButtonClick) -> Result<(), HandlerError> {
    if click.interface_id != CHARACTER_SELECT_INTERFACE {
        return Err(HandlerError::UnknownInterface(click.interface_id));
    }
    match session.select_character(click.button_id) {
        SelectOutcome::Selected(record) => {
            info!(character_id = record.id, name = %record.name, "Character selected");
            Ok(())
        }
        SelectOutcome::AlreadyChosen => Ok(()),
        SelectOutcome::EmptySlot => Err(HandlerError::EmptySlot(click.button_id)),
        SelectOutcome::OutOfRange { slots } => Err(HandlerError::ButtonOutOfRange {
            button: click.button_id,
            slots,
        }),
        SelectOutcome::NotReady => Err(HandlerError::SelectionClosed),
    }
}

fn handle_done_loading(
    realm: &Arc<Realm>,
    session: &Arc<Session>,
    done: DoneLoading,
) -> Result<(), HandlerError> {
    if done.what != DONE_LOADING_PLAY {
        return Err(HandlerError::UnknownLoadStage(done.what));
    }
    let username = session.username().unwrap_or_default().to_string();
    let store = Arc::clone(&realm.characters);
    let started = session.begin_load(|record| {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = store.load(&username, &record).await;
            let _ = tx.send(result);
        });
        rx
    });
    match started {
        BeginLoad::Started => {
            info!("Loading character");
            Ok(())
        }
        BeginLoad::AlreadyStarted => Ok(()),
        BeginLoad::NothingSelected => Err(HandlerError::NothingToLoad),
    }
}
