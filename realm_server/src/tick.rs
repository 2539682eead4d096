//! Fixed-rate drivers.
//!
//! Three independent periodic tasks walk the session table:
//! - simulation: finishes character loads, applies at most one movement step.
//! - flush: writes at most one outbound message per session, or a keepalive.
//! - broadcast: queues each Active player's area-of-interest snapshot.
//!
//! Ticks never block on a session. Writes run in their own task, and a
//! session with a write still in flight is skipped until it completes.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use realm_shared::net::{encode_server_message, DisconnectCode, ServerMessage};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn, Instrument};

use crate::{
    aoi::{visible_entities, VisibleEntity},
    realm::Realm,
    session::{ConnectionState, LoadPoll, Session, SinkGuard},
    transport::TransportError,
};

pub const MSG_LOAD_FAILED: &str = "Error loading character";

pub fn simulation_tick(realm: &Realm) {
    for session in realm.sessions.sessions() {
        match session.poll_load(&realm.worlds) {
            LoadPoll::Idle | LoadPoll::Pending => {}
            LoadPoll::Loaded(location) => {
                info!(session_id = %session.id(), ?location, "Character entered world");
            }
            LoadPoll::Failed(e) => {
                warn!(session_id = %session.id(), error = %e, "Character load failed");
                session.disconnect(DisconnectCode::InternalError, MSG_LOAD_FAILED);
                continue;
            }
        }
        if let Some(location) = session.apply_pending_movement() {
            trace!(session_id = %session.id(), ?location, "Moved");
        }
    }
    realm.count_simulation_tick();
}

pub fn flush_tick(realm: &Arc<Realm>) {
    let keepalive = realm.config.keepalive_interval();
    for session in realm.sessions.sessions() {
        if session.state() == ConnectionState::Closed {
            if realm.sessions.release_if(&session) {
                info!(
                    session_id = %session.id(),
                    username = session.username(),
                    "Session released"
                );
            }
            continue;
        }
        let Some(sink) = session.try_claim_sink() else {
            continue;
        };
        let Some(msg) = session.next_outbound(keepalive) else {
            continue;
        };
        tokio::spawn(write_outbound(Arc::clone(realm), session, sink, msg));
    }
}

pub fn broadcast_tick(realm: &Realm) {
    let sessions = realm.sessions.sessions();
    let entities: Vec<VisibleEntity> = sessions
        .iter()
        .filter_map(|s| {
            let character = s.active_character()?;
            Some(VisibleEntity {
                player_id: s.id(),
                character_id: character.record.id,
                location: character.location,
            })
        })
        .collect();

    for observer in &sessions {
        if observer.state() != ConnectionState::Active {
            continue;
        }
        let Some(viewport) = observer.viewport() else {
            continue;
        };
        let characters = visible_entities(&viewport, realm.config.aoi_buffer_tiles, &entities);
        if let Err(e) = observer.send(ServerMessage::LocalCharacterState { characters }) {
            trace!(session_id = %observer.id(), error = %e, "State update dropped");
        }
    }
}

async fn write_outbound(
    realm: Arc<Realm>,
    session: Arc<Session>,
    mut sink: SinkGuard,
    msg: ServerMessage,
) {
    let write_timeout = realm.config.write_timeout();
    let keepalive = matches!(msg, ServerMessage::Ping {});

    let written = match encode_server_message(&msg) {
        Ok(text) => {
            let write = async {
                sink.send_text(text).await?;
                if keepalive {
                    sink.send_ping().await?;
                }
                Ok::<_, TransportError>(())
            };
            match timeout(write_timeout, write).await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow!("write timed out after {write_timeout:?}")),
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if session.state() != ConnectionState::Disconnecting {
            warn!(session_id = %session.id(), error = %e, "Outbound write failed, dropping session");
        } else {
            debug!(session_id = %session.id(), error = %e, "Terminal write failed");
        }
        session.abort();
        finish(&realm, &session).await;
        return;
    }
    session.mark_written();

    if let ServerMessage::PlayerDisconnect { code, message } = msg {
        match timeout(write_timeout, sink.close(code.close_code(), message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %session.id(), error = %e, "Close handshake failed"),
            Err(_) => debug!(session_id = %session.id(), "Close handshake timed out"),
        }
        finish(&realm, &session).await;
    }
}

/// Persists the character and marks the session Closed. The slot is freed
/// on the next flush tick.
async fn finish(realm: &Realm, session: &Session) {
    if let (Some(username), Some(save)) = (session.username(), session.save_snapshot()) {
        match realm.characters.save(username, &save).await {
            Ok(()) => info!(
                session_id = %session.id(),
                username,
                world = %save.world,
                x = save.x,
                y = save.y,
                "Character saved"
            ),
            Err(e) => warn!(
                session_id = %session.id(),
                username,
                error = %e,
                "Character save failed"
            ),
        }
    }
    session.mark_closed();
}

/// Runs the three drivers until shut down.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn start(realm: Arc<Realm>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let cfg = &realm.config;

        let r = Arc::clone(&realm);
        let period = cfg.simulation_period();
        spawn_driver(&mut tasks, "simulation", period, rx.clone(), move || {
            simulation_tick(&r)
        });
        let r = Arc::clone(&realm);
        let period = cfg.flush_period();
        spawn_driver(&mut tasks, "flush", period, rx.clone(), move || flush_tick(&r));
        let r = Arc::clone(&realm);
        let period = cfg.broadcast_period();
        spawn_driver(&mut tasks, "broadcast", period, rx, move || broadcast_tick(&r));

        Self { shutdown, tasks }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Tick driver panicked");
            }
        }
    }
}

fn spawn_driver(
    tasks: &mut JoinSet<()>,
    name: &'static str,
    period: Duration,
    shutdown: watch::Receiver<bool>,
    mut tick: impl FnMut() + Send + 'static,
) {
    let driver = async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        run_until_shutdown(shutdown, async move {
            loop {
                ticker.tick().await;
                tick();
            }
        })
        .await;
        debug!("Driver stopped");
    };
    tasks.spawn(driver.instrument(tracing::info_span!("tick", driver = name)));
}

async fn run_until_shutdown(mut shutdown: watch::Receiver<bool>, work: impl Future<Output = ()>) {
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => {}
        _ = work => {}
    }
}
