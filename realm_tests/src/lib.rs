//! Harness for socket-level realm tests.
//!
//! Starts a real [`RealmServer`] on an ephemeral localhost port with the
//! repository's `maps/` directory, and drives it with [`GameClient`]s.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use realm_client::GameClient;
use realm_server::{character::MemoryCharacterStore, server::bind_ephemeral, Realm};
use realm_shared::{
    auth::issue_token,
    config::RealmConfig,
    net::{Screen, ServerMessage},
    world::WorldRegistry,
};
use tokio::{sync::oneshot, task::JoinHandle};

pub const SECRET: &str = "integration-secret";

/// Upper bound for any single wait on the server.
pub const WAIT: Duration = Duration::from_secs(5);

pub const SCREEN: Screen = Screen {
    width: 800,
    height: 600,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub fn maps_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../maps")
}

pub fn test_config() -> RealmConfig {
    RealmConfig {
        hmac_secret: Some(SECRET.to_string()),
        maps_dir: maps_dir().display().to_string(),
        ..Default::default()
    }
}

/// A running realm plus the handle needed to stop it.
pub struct TestRealm {
    pub realm: Arc<Realm>,
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestRealm {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: RealmConfig) -> anyhow::Result<Self> {
        init_tracing();
        let worlds = WorldRegistry::load_dir(&maps_dir()).context("load maps")?;
        let store = Arc::new(MemoryCharacterStore::from_config(&config));
        let realm = Arc::new(Realm::new(config, worlds, store)?);

        let (server, addr) = bind_ephemeral(Arc::clone(&realm)).await?;
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));
        Ok(Self {
            realm,
            addr,
            stop,
            handle,
        })
    }

    pub fn token(&self, username: &str) -> anyhow::Result<String> {
        issue_token(
            SECRET,
            &self.realm.config.token_issuer,
            username,
            chrono::Duration::minutes(5),
        )
    }

    pub async fn connect(&self) -> anyhow::Result<GameClient> {
        GameClient::connect(&self.addr.to_string()).await
    }

    /// Connects and logs in, returning once the character list arrived.
    pub async fn login(&self, username: &str) -> anyhow::Result<GameClient> {
        let mut client = self.connect().await?;
        client.login(&self.token(username)?, SCREEN).await?;
        client
            .wait_for(WAIT, |m| matches!(m, ServerMessage::PlayerCharacters { .. }))
            .await?;
        Ok(client)
    }

    /// Logs in, picks the first character and waits for its first state update.
    pub async fn enter_world(&self, username: &str) -> anyhow::Result<GameClient> {
        let mut client = self.login(username).await?;
        let slot = client
            .first_character_slot()
            .context("no character to select")?;
        client.select_character(slot).await?;
        client.done_loading().await?;
        client
            .wait_for(WAIT, |m| matches!(m, ServerMessage::WorldData { .. }))
            .await?;
        client
            .wait_for(WAIT, |m| {
                matches!(m, ServerMessage::LocalCharacterState { characters } if !characters.is_empty())
            })
            .await?;
        Ok(client)
    }

    /// Signals shutdown and waits for the server to finish draining.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.handle.await.context("server task")?
    }
}
