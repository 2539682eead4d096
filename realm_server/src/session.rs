//! Per-connection session state.
//!
//! A [`Session`] is shared between three parties:
//! - its inbound task (login, dispatch),
//! - the scheduler drivers (simulation, flush, broadcast),
//! - the operator console.
//!
//! State is split into small locks so none of them is held across an await:
//! - `state`: the connection state machine.
//! - `data`: viewport, character slots, selection, pending load, active character.
//! - `intent`: the one-slot movement mailbox.
//! - `outbox`: the bounded outbound queue.
//!
//! The transport write half sits behind an async mutex that only the flush
//! tick claims, so at most one write per session is ever in flight.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use parking_lot::Mutex;
use realm_shared::{
    camera::Viewport,
    location::Location,
    movement::{IntentMailbox, MovementIntent},
    net::{CharacterSummary, DisconnectCode, Screen, ServerMessage},
    world::WorldRegistry,
};
use thiserror::Error;
use tokio::{
    sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::debug;

use crate::{
    character::{CharacterRecord, CharacterSave, LoadedCharacter},
    transport::FrameSink,
};

/// Slot index in the session registry. Stable for the connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    LoadingCharacter,
    Active,
    /// Terminal message queued; waiting for the outbox to drain.
    Disconnecting,
    /// Transport closed; the slot is released on the next flush tick.
    Closed,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        !matches!(
            self,
            ConnectionState::Disconnecting | ConnectionState::Closed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OutboxError {
    #[error("outbound queue is full")]
    Full,
    #[error("session is disconnecting")]
    Sealed,
}

#[derive(Default)]
struct OutboxInner {
    queue: VecDeque<ServerMessage>,
    sealed: bool,
}

/// Bounded FIFO of outbound messages. Once sealed with a terminal message
/// nothing else is accepted, so the terminal message is always the last one.
pub struct Outbox {
    inner: Mutex<OutboxInner>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(OutboxInner::default()),
            capacity,
        }
    }

    /// Never blocks; a full queue rejects.
    pub fn push(&self, msg: ServerMessage) -> Result<(), OutboxError> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(OutboxError::Sealed);
        }
        if inner.queue.len() >= self.capacity {
            return Err(OutboxError::Full);
        }
        inner.queue.push_back(msg);
        Ok(())
    }

    /// Appends `terminal` regardless of capacity and seals the queue.
    /// Returns false if the queue was already sealed.
    pub fn seal_with(&self, terminal: ServerMessage) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        inner.queue.push_back(terminal);
        inner.sealed = true;
        true
    }

    /// Drops everything queued and seals. Used once the transport is gone.
    pub fn discard(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.sealed = true;
    }

    pub fn pop(&self) -> Option<ServerMessage> {
        self.inner.lock().queue.pop_front()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The character a session controls once Active.
#[derive(Debug, Clone)]
pub struct ActiveCharacter {
    pub record: CharacterRecord,
    pub location: Location,
}

pub type PendingLoad = oneshot::Receiver<anyhow::Result<LoadedCharacter>>;
pub type SinkGuard = OwnedMutexGuard<Box<dyn FrameSink>>;

#[derive(Default)]
struct SessionData {
    viewport: Option<Viewport>,
    characters: Vec<Option<CharacterRecord>>,
    selected: Option<CharacterRecord>,
    pending_load: Option<PendingLoad>,
    character: Option<ActiveCharacter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected(CharacterRecord),
    /// A character is already loading or active; the click is ignored.
    AlreadyChosen,
    EmptySlot,
    OutOfRange { slots: usize },
    /// Not at the selection screen (still logging in, or disconnecting).
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginLoad {
    Started,
    AlreadyStarted,
    NothingSelected,
}

#[derive(Debug)]
pub enum LoadPoll {
    Idle,
    Pending,
    Loaded(Location),
    Failed(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Accepted,
    /// An earlier intent has not been consumed yet; this one is dropped.
    Pending,
    NotActive,
}

pub struct Session {
    id: SessionId,
    state: Mutex<ConnectionState>,
    username: OnceLock<String>,
    data: Mutex<SessionData>,
    intent: IntentMailbox,
    outbox: Outbox,
    sink: Arc<AsyncMutex<Box<dyn FrameSink>>>,
    last_write: Mutex<Instant>,
}

impl Session {
    pub fn new(id: SessionId, sink: Box<dyn FrameSink>, outbound_capacity: usize) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Connecting),
            username: OnceLock::new(),
            data: Mutex::new(SessionData::default()),
            intent: IntentMailbox::new(),
            outbox: Outbox::new(outbound_capacity),
            sink: Arc::new(AsyncMutex::new(sink)),
            last_write: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Binds the username once. Only the registry calls this, under its
    /// write lock, so the uniqueness check and the bind are atomic.
    pub(crate) fn bind_username(&self, username: &str) -> bool {
        self.username.set(username.to_string()).is_ok()
    }

    pub fn is_disconnecting(&self) -> bool {
        !self.state().is_live()
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Queues a message for the flush tick.
    pub fn send(&self, msg: ServerMessage) -> Result<(), OutboxError> {
        self.outbox.push(msg)
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Queues a handshake reply. A refusal is logged; the session carries on
    /// and the terminal message, if any, still goes out.
    fn send_reply(&self, msg: ServerMessage) {
        let code = msg.code();
        if let Err(e) = self.send(msg) {
            debug!(session_id = %self.id, code, error = %e, "Handshake reply dropped");
        }
    }

    /// Connecting -> Authenticated. Records the declared screen and tells the
    /// client its player id.
    pub fn authenticate(&self, screen: Screen) -> bool {
        if !self.transition(ConnectionState::Connecting, ConnectionState::Authenticated) {
            return false;
        }
        self.data.lock().viewport = Some(Viewport::new(screen.width, screen.height));
        self.send_reply(ServerMessage::PlayerInfo {
            player_id: self.id.0,
        });
        true
    }

    /// Stores the selectable slots and advertises them.
    pub fn offer_characters(&self, characters: Vec<Option<CharacterRecord>>) {
        let summaries = characters
            .iter()
            .map(|slot| slot.as_ref().map(CharacterSummary::from))
            .collect();
        self.data.lock().characters = characters;
        self.send_reply(ServerMessage::PlayerCharacters {
            characters: summaries,
        });
    }

    /// Picks a character slot. Authenticated -> LoadingCharacter.
    pub fn select_character(&self, slot: i32) -> SelectOutcome {
        match self.state() {
            ConnectionState::Authenticated => {}
            ConnectionState::LoadingCharacter | ConnectionState::Active => {
                return SelectOutcome::AlreadyChosen
            }
            _ => return SelectOutcome::NotReady,
        }

        let record = {
            let mut data = self.data.lock();
            let slots = data.characters.len();
            let Some(entry) = usize::try_from(slot)
                .ok()
                .and_then(|i| data.characters.get(i))
            else {
                return SelectOutcome::OutOfRange { slots };
            };
            let Some(record) = entry.clone() else {
                return SelectOutcome::EmptySlot;
            };
            data.selected = Some(record.clone());
            record
        };

        // A concurrent double click lost the race.
        if !self.transition(
            ConnectionState::Authenticated,
            ConnectionState::LoadingCharacter,
        ) {
            return SelectOutcome::AlreadyChosen;
        }
        self.send_reply(ServerMessage::CharacterLoading {
            character_id: record.id,
        });
        SelectOutcome::Selected(record)
    }

    /// Starts the asynchronous load of the selected character. `spawn` gets
    /// the selection and returns the receiver the simulation tick will poll.
    pub fn begin_load<F>(&self, spawn: F) -> BeginLoad
    where
        F: FnOnce(CharacterRecord) -> PendingLoad,
    {
        if self.state() != ConnectionState::LoadingCharacter {
            return if self.state() == ConnectionState::Active {
                BeginLoad::AlreadyStarted
            } else {
                BeginLoad::NothingSelected
            };
        }
        let mut data = self.data.lock();
        if data.pending_load.is_some() {
            return BeginLoad::AlreadyStarted;
        }
        let Some(record) = data.selected.clone() else {
            return BeginLoad::NothingSelected;
        };
        data.pending_load = Some(spawn(record));
        BeginLoad::Started
    }

    /// Checks the pending load without blocking. On success the character is
    /// placed (clamped into the world), the world is sent to the client and
    /// the session becomes Active.
    pub fn poll_load(&self, worlds: &WorldRegistry) -> LoadPoll {
        if self.state() != ConnectionState::LoadingCharacter {
            return LoadPoll::Idle;
        }
        let mut data = self.data.lock();
        let Some(rx) = data.pending_load.as_mut() else {
            return LoadPoll::Idle;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return LoadPoll::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(anyhow!("character load ended without a result"))
            }
        };
        data.pending_load = None;

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => return LoadPoll::Failed(e),
        };
        let Some(world) = worlds.get(&loaded.world) else {
            return LoadPoll::Failed(anyhow!("character is in unknown world {:?}", loaded.world));
        };
        let Some(record) = data.selected.clone() else {
            return LoadPoll::Failed(anyhow!("no character selected"));
        };

        let world_data = ServerMessage::WorldData {
            name: world.name().to_string(),
            tilemap: world.tilemap().clone(),
        };
        let location = Location::clamped(world, loaded.x, loaded.y);
        if let Some(viewport) = data.viewport.as_mut() {
            viewport.update(location.clone());
        }
        data.character = Some(ActiveCharacter {
            record,
            location: location.clone(),
        });
        drop(data);

        match self.send(world_data) {
            Ok(()) => {}
            Err(OutboxError::Sealed) => return LoadPoll::Idle,
            Err(e) => return LoadPoll::Failed(anyhow!("queue world data: {e}")),
        }
        if !self.transition(ConnectionState::LoadingCharacter, ConnectionState::Active) {
            return LoadPoll::Idle;
        }
        LoadPoll::Loaded(location)
    }

    /// Offers a movement intent to the one-slot mailbox.
    pub fn submit_intent(&self, intent: MovementIntent) -> IntentOutcome {
        if self.state() != ConnectionState::Active {
            return IntentOutcome::NotActive;
        }
        if self.intent.try_set(intent) {
            IntentOutcome::Accepted
        } else {
            IntentOutcome::Pending
        }
    }

    pub fn pending_intent(&self) -> Option<MovementIntent> {
        self.intent.peek()
    }

    /// Consumes the pending intent and moves the character one step.
    pub fn apply_pending_movement(&self) -> Option<Location> {
        let intent = self.intent.take()?;
        if self.state() != ConnectionState::Active {
            return None;
        }
        let mut guard = self.data.lock();
        let data = &mut *guard;
        let character = data.character.as_mut()?;
        let next = character.location.stepped(intent);
        character.location = next.clone();
        if let Some(viewport) = data.viewport.as_mut() {
            viewport.update(next.clone());
        }
        Some(next)
    }

    pub fn location(&self) -> Option<Location> {
        self.data
            .lock()
            .character
            .as_ref()
            .map(|c| c.location.clone())
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.data.lock().viewport.clone()
    }

    /// The controlled character, only while Active.
    pub fn active_character(&self) -> Option<ActiveCharacter> {
        if self.state() != ConnectionState::Active {
            return None;
        }
        self.data.lock().character.clone()
    }

    /// What to persist when the session ends, if a character was placed.
    pub fn save_snapshot(&self) -> Option<CharacterSave> {
        let data = self.data.lock();
        let character = data.character.as_ref()?;
        Some(CharacterSave {
            record: character.record.clone(),
            world: character.location.world().name().to_string(),
            x: character.location.x(),
            y: character.location.y(),
        })
    }

    /// Moves to Disconnecting and queues the terminal `PlayerDisconnect`.
    /// Only the first call has an effect.
    pub fn disconnect(&self, code: DisconnectCode, message: impl Into<String>) -> bool {
        {
            let mut state = self.state.lock();
            if !state.is_live() {
                return false;
            }
            *state = ConnectionState::Disconnecting;
        }
        self.intent.take();
        let message = message.into();
        debug!(session_id = %self.id, code = code.as_u16(), %message, "Session disconnecting");
        self.outbox
            .seal_with(ServerMessage::PlayerDisconnect { code, message })
    }

    /// The transport is broken: nothing more can be delivered.
    pub fn abort(&self) {
        {
            let mut state = self.state.lock();
            if state.is_live() {
                *state = ConnectionState::Disconnecting;
            }
        }
        self.intent.take();
        self.outbox.discard();
    }

    pub fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    /// Claims the write half unless a write is already in flight.
    pub fn try_claim_sink(&self) -> Option<SinkGuard> {
        Arc::clone(&self.sink).try_lock_owned().ok()
    }

    /// Next message to write: the queue head, or a keepalive when nothing was
    /// written for `keepalive` and the session is not draining.
    pub fn next_outbound(&self, keepalive: Duration) -> Option<ServerMessage> {
        if let Some(msg) = self.outbox.pop() {
            return Some(msg);
        }
        if self.outbox.is_sealed() {
            return None;
        }
        let mut last_write = self.last_write.lock();
        if last_write.elapsed() < keepalive {
            return None;
        }
        *last_write = Instant::now();
        Some(ServerMessage::Ping {})
    }

    pub fn mark_written(&self) {
        *self.last_write.lock() = Instant::now();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use realm_shared::world::World;

    use super::*;
    use crate::transport::memory;

    fn session(capacity: usize) -> Session {
        let (sink, _stream, _peer) = memory::pair();
        Session::new(SessionId(0), Box::new(sink), capacity)
    }

    fn worlds() -> WorldRegistry {
        WorldRegistry::from_worlds([World::new("untitled", 32, 32, 25, 19).unwrap()]).unwrap()
    }

    fn record() -> CharacterRecord {
        CharacterRecord {
            id: 0,
            name: "alice".into(),
        }
    }

    fn ready_to_load(s: &Session) {
        assert!(s.authenticate(Screen {
            width: 800,
            height: 600,
        }));
        s.offer_characters(vec![Some(record()), None]);
        assert_eq!(s.select_character(0), SelectOutcome::Selected(record()));
    }

    fn load(s: &Session, loaded: anyhow::Result<LoadedCharacter>) -> LoadPoll {
        let started = s.begin_load(|_| {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(loaded);
            rx
        });
        assert_eq!(started, BeginLoad::Started);
        s.poll_load(&worlds())
    }

    fn drain(s: &Session) -> Vec<ServerMessage> {
        std::iter::from_fn(|| s.outbox().pop()).collect()
    }

    #[test]
    fn outbox_rejects_when_full_but_always_takes_terminal() {
        let outbox = Outbox::new(1);
        outbox.push(ServerMessage::Ping {}).unwrap();
        assert_eq!(outbox.push(ServerMessage::Ping {}), Err(OutboxError::Full));
        assert!(outbox.seal_with(ServerMessage::PlayerDisconnect {
            code: DisconnectCode::BadRequest,
            message: "bye".into(),
        }));
        assert_eq!(outbox.push(ServerMessage::Ping {}), Err(OutboxError::Sealed));
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pop(), Some(ServerMessage::Ping {}));
        assert!(matches!(
            outbox.pop(),
            Some(ServerMessage::PlayerDisconnect { .. })
        ));
    }

    #[test]
    fn login_and_selection_queue_acknowledgements() {
        let s = session(8);
        ready_to_load(&s);
        assert_eq!(s.state(), ConnectionState::LoadingCharacter);
        let sent = drain(&s);
        assert_eq!(sent[0], ServerMessage::PlayerInfo { player_id: 0 });
        assert!(matches!(&sent[1], ServerMessage::PlayerCharacters { characters } if characters.len() == 2));
        assert_eq!(sent[2], ServerMessage::CharacterLoading { character_id: 0 });
    }

    #[test]
    fn second_selection_is_a_no_op() {
        let s = session(8);
        ready_to_load(&s);
        drain(&s);
        assert_eq!(s.select_character(0), SelectOutcome::AlreadyChosen);
        assert_eq!(s.select_character(1), SelectOutcome::AlreadyChosen);
        assert!(s.outbox().is_empty());
    }

    #[test]
    fn selection_validates_slot() {
        let s = session(8);
        s.authenticate(Screen {
            width: 1,
            height: 1,
        });
        s.offer_characters(vec![Some(record()), None]);
        assert_eq!(s.select_character(1), SelectOutcome::EmptySlot);
        assert_eq!(
            s.select_character(2),
            SelectOutcome::OutOfRange { slots: 2 }
        );
        assert_eq!(
            s.select_character(-1),
            SelectOutcome::OutOfRange { slots: 2 }
        );
        assert_eq!(s.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn successful_load_activates_and_clamps() {
        let s = session(8);
        ready_to_load(&s);
        let poll = load(
            &s,
            Ok(LoadedCharacter {
                world: "untitled".into(),
                x: 5_000,
                y: -3,
            }),
        );
        let LoadPoll::Loaded(location) = poll else {
            panic!("expected load, got {poll:?}");
        };
        assert_eq!((location.x(), location.y()), (800, 0));
        assert_eq!(s.state(), ConnectionState::Active);
        assert!(drain(&s)
            .iter()
            .any(|m| matches!(m, ServerMessage::WorldData { name, .. } if name == "untitled")));
        assert_eq!(s.begin_load(|_| oneshot::channel().1), BeginLoad::AlreadyStarted);
    }

    #[test]
    fn failed_load_is_reported() {
        let s = session(8);
        ready_to_load(&s);
        assert!(matches!(
            load(&s, Err(anyhow!("db down"))),
            LoadPoll::Failed(_)
        ));
        assert_eq!(s.state(), ConnectionState::LoadingCharacter);
    }

    #[test]
    fn unknown_world_fails_the_load() {
        let s = session(8);
        ready_to_load(&s);
        let poll = load(
            &s,
            Ok(LoadedCharacter {
                world: "nowhere".into(),
                x: 0,
                y: 0,
            }),
        );
        assert!(matches!(poll, LoadPoll::Failed(_)));
    }

    #[test]
    fn pending_load_polls_as_pending() {
        let s = session(8);
        ready_to_load(&s);
        let (tx, rx) = oneshot::channel();
        assert_eq!(s.begin_load(|_| rx), BeginLoad::Started);
        assert_eq!(s.begin_load(|_| oneshot::channel().1), BeginLoad::AlreadyStarted);
        assert!(matches!(s.poll_load(&worlds()), LoadPoll::Pending));
        drop(tx);
        assert!(matches!(s.poll_load(&worlds()), LoadPoll::Failed(_)));
    }

    #[test]
    fn first_pending_intent_wins() {
        let s = session(8);
        ready_to_load(&s);
        assert_eq!(s.submit_intent(MovementIntent::UP), IntentOutcome::NotActive);
        load(
            &s,
            Ok(LoadedCharacter {
                world: "untitled".into(),
                x: 400,
                y: 400,
            }),
        );

        assert_eq!(s.submit_intent(MovementIntent::RIGHT), IntentOutcome::Accepted);
        assert_eq!(s.submit_intent(MovementIntent::LEFT), IntentOutcome::Pending);
        assert_eq!(s.pending_intent(), Some(MovementIntent::RIGHT));

        let moved = s.apply_pending_movement().unwrap();
        assert_eq!((moved.x(), moved.y()), (401, 400));
        assert_eq!(s.pending_intent(), None);
        assert!(s.apply_pending_movement().is_none());
        let anchored = s.viewport().unwrap();
        assert_eq!(anchored.location().map(|l| l.x()), Some(401));
    }

    #[test]
    fn movement_at_origin_is_clamped() {
        let s = session(8);
        ready_to_load(&s);
        load(
            &s,
            Ok(LoadedCharacter {
                world: "untitled".into(),
                x: 0,
                y: 0,
            }),
        );
        s.submit_intent(MovementIntent::UP | MovementIntent::LEFT);
        let moved = s.apply_pending_movement().unwrap();
        assert_eq!((moved.x(), moved.y()), (0, 0));
    }

    #[test]
    fn handshake_replies_are_dropped_quietly_when_the_outbox_is_full() {
        let s = session(1);
        assert!(s.authenticate(Screen {
            width: 800,
            height: 600,
        }));
        s.offer_characters(vec![Some(record())]);
        assert!(matches!(s.select_character(0), SelectOutcome::Selected(_)));

        assert_eq!(s.state(), ConnectionState::LoadingCharacter);
        assert!(s.disconnect(DisconnectCode::ClientClosed, "Client disconnected"));
        assert_eq!(
            drain(&s),
            vec![
                ServerMessage::PlayerInfo { player_id: 0 },
                ServerMessage::PlayerDisconnect {
                    code: DisconnectCode::ClientClosed,
                    message: "Client disconnected".into(),
                },
            ]
        );
    }

    #[test]
    fn disconnect_is_terminal_and_idempotent() {
        let s = session(8);
        assert!(s.disconnect(DisconnectCode::BadRequest, "Invalid packet sent by client"));
        assert!(!s.disconnect(DisconnectCode::ClientClosed, "Client disconnected"));
        assert!(s.is_disconnecting());
        assert_eq!(
            s.send(ServerMessage::Ping {}),
            Err(OutboxError::Sealed)
        );
        assert_eq!(
            drain(&s),
            vec![ServerMessage::PlayerDisconnect {
                code: DisconnectCode::BadRequest,
                message: "Invalid packet sent by client".into(),
            }]
        );
        assert_eq!(s.next_outbound(Duration::ZERO), None);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_only_after_idle_period() {
        let s = session(8);
        assert_eq!(s.next_outbound(Duration::from_secs(1)), None);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            s.next_outbound(Duration::from_secs(1)),
            Some(ServerMessage::Ping {})
        );
        assert_eq!(s.next_outbound(Duration::from_secs(1)), None);
    }

    #[tokio::test]
    async fn only_one_sink_claim_at_a_time() {
        let s = session(8);
        let guard = s.try_claim_sink();
        assert!(guard.is_some());
        assert!(s.try_claim_sink().is_none());
        drop(guard);
        assert!(s.try_claim_sink().is_some());
    }

    #[test]
    fn save_snapshot_tracks_location() {
        let s = session(8);
        assert!(s.save_snapshot().is_none());
        ready_to_load(&s);
        load(
            &s,
            Ok(LoadedCharacter {
                world: "untitled".into(),
                x: 10,
                y: 20,
            }),
        );
        s.submit_intent(MovementIntent::DOWN);
        s.apply_pending_movement();
        let save = s.save_snapshot().unwrap();
        assert_eq!((save.world.as_str(), save.x, save.y), ("untitled", 10, 21));
    }
}
