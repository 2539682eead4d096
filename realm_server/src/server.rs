//! Realm server.
//!
//! Accepts WebSocket connections, admits them into the session registry and
//! runs the tick scheduler. It supports:
//! - Capacity refusal (close code 1013) before any session exists
//! - One inbound task per session, instrumented with a `session` span
//! - Operator console (status, kick, quit)
//! - Graceful shutdown that delivers a terminal message to every player
//!
//! Shutdown notes:
//! - Stop accepting first, then disconnect everyone with `ShuttingDown`.
//! - Keep the flush tick running until sessions drain or the grace period ends.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use realm_shared::net::{DisconnectCode, CLOSE_TRY_AGAIN_LATER};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    connection::run_connection,
    realm::Realm,
    registry::RegistryFull,
    session::Session,
    tick::Scheduler,
    transport::{websocket, FrameSink, FrameStream},
};

pub const MSG_SHUTTING_DOWN: &str = "Realm is shutting down";
pub const MSG_KICKED: &str = "Disconnected by an operator";
pub const MSG_REALM_FULL: &str = "Realm is full, try again later";

/// How long shutdown waits for terminal messages to drain.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct RealmServer {
    realm: Arc<Realm>,
    listener: TcpListener,
}

impl RealmServer {
    /// Binds the configured listen address.
    pub async fn bind(realm: Arc<Realm>) -> anyhow::Result<Self> {
        let addr: SocketAddr = realm
            .config
            .server_addr
            .parse()
            .context("parse server_addr")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        Ok(Self { realm, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("local_addr")
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// Accepts one TCP connection and hands it to a handshake task.
    pub async fn accept_one(&self) -> anyhow::Result<()> {
        let (tcp, peer) = self.listener.accept().await.context("accept")?;
        tokio::spawn(handle_socket(Arc::clone(&self.realm), tcp, peer));
        Ok(())
    }

    /// Serves until `shutdown` resolves, then drains sessions and stops the
    /// scheduler.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        let scheduler = Scheduler::start(Arc::clone(&self.realm));
        info!(%addr, max_clients = self.realm.sessions.capacity(), "Realm listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.accept_one() => {
                    if let Err(e) = accepted {
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
        }

        drop(self.listener);
        let notified = disconnect_all(&self.realm, DisconnectCode::ShuttingDown, MSG_SHUTTING_DOWN);
        info!(sessions = notified, "Realm shutting down");
        drain(&self.realm, SHUTDOWN_GRACE).await;
        scheduler.shutdown().await;
        info!("Realm stopped");
        Ok(())
    }
}

async fn handle_socket(realm: Arc<Realm>, tcp: TcpStream, peer: SocketAddr) {
    let handshake = websocket::accept(tcp, realm.config.max_frame_bytes);
    match tokio::time::timeout(realm.config.login_timeout(), handshake).await {
        Ok(Ok((sink, stream))) => {
            if let Some(session) = admit(&realm, Box::new(sink), Box::new(stream)).await {
                debug!(session_id = %session.id(), %peer, "Client connected");
            }
        }
        Ok(Err(e)) => debug!(%peer, error = %e, "WebSocket handshake failed"),
        Err(_) => debug!(%peer, "WebSocket handshake timed out"),
    }
}

/// Registers a connection and starts its inbound task. A full realm refuses
/// the connection with a retry-later close and creates no session.
pub async fn admit(
    realm: &Arc<Realm>,
    sink: Box<dyn FrameSink>,
    stream: Box<dyn FrameStream>,
) -> Option<Arc<Session>> {
    match realm.sessions.acquire_slot(sink) {
        Ok(session) => {
            let span = info_span!("session", session_id = session.id().0);
            tokio::spawn(
                run_connection(Arc::clone(realm), Arc::clone(&session), stream).instrument(span),
            );
            Some(session)
        }
        Err(RegistryFull { capacity, mut sink }) => {
            warn!(capacity, "Realm full, refusing connection");
            if let Err(e) = sink
                .close(CLOSE_TRY_AGAIN_LATER, MSG_REALM_FULL.to_string())
                .await
            {
                debug!(error = %e, "Refusal close failed");
            }
            None
        }
    }
}

/// Starts disconnecting every live session. Returns how many were affected.
pub fn disconnect_all(realm: &Realm, code: DisconnectCode, message: &str) -> usize {
    realm
        .sessions
        .sessions()
        .iter()
        .filter(|s| s.disconnect(code, message))
        .count()
}

/// Waits until the registry is empty or `grace` elapses.
pub async fn drain(realm: &Realm, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    while !realm.sessions.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if !realm.sessions.is_empty() {
        warn!(remaining = realm.sessions.len(), "Sessions still open after shutdown grace");
    }
}

/// Result of one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutput {
    Lines(Vec<String>),
    Quit,
}

/// Executes an operator console command.
pub fn exec_console(realm: &Realm, line: &str) -> ConsoleOutput {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = tokens.first() else {
        return ConsoleOutput::Lines(Vec::new());
    };

    match command {
        "status" => {
            let mut out = vec![
                format!("Worlds: {}", realm.worlds.names().collect::<Vec<_>>().join(", ")),
                format!("Tick: {}", realm.simulation_ticks()),
                format!(
                    "Sessions: {}/{}",
                    realm.sessions.len(),
                    realm.sessions.capacity()
                ),
            ];
            for session in realm.sessions.sessions() {
                let location = session
                    .location()
                    .map(|l| format!("{} ({}, {})", l.world().name(), l.x(), l.y()))
                    .unwrap_or_else(|| "-".to_string());
                out.push(format!(
                    "  #{} {:<16} {:?} {}",
                    session.id(),
                    session.username().unwrap_or("-"),
                    session.state(),
                    location
                ));
            }
            ConsoleOutput::Lines(out)
        }
        "kick" => {
            let Some(username) = tokens.get(1) else {
                return ConsoleOutput::Lines(vec!["Usage: kick <username>".to_string()]);
            };
            match realm.sessions.lookup_by_username(username) {
                Some(session) if session.disconnect(DisconnectCode::ClientClosed, MSG_KICKED) => {
                    info!(username, session_id = %session.id(), "Kicked by operator");
                    ConsoleOutput::Lines(vec![format!("Kicked {username}")])
                }
                Some(_) => ConsoleOutput::Lines(vec![format!("{username} is already leaving")]),
                None => ConsoleOutput::Lines(vec![format!("No player named {username}")]),
            }
        }
        "quit" | "exit" => ConsoleOutput::Quit,
        other => ConsoleOutput::Lines(vec![format!("Unknown command: {other}")]),
    }
}

/// Helper for tests: binds to an ephemeral localhost port.
pub async fn bind_ephemeral(realm: Arc<Realm>) -> anyhow::Result<(RealmServer, SocketAddr)> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let listener = TcpListener::bind(addr).await.context("bind ephemeral")?;
    let local = listener.local_addr()?;
    Ok((RealmServer { realm, listener }, local))
}
