//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::Duration;
use realm_shared::{
    auth::issue_token,
    config::RealmConfig,
    world::{World, WorldRegistry},
};

use crate::{
    character::{CharacterRecord, MemoryCharacterStore},
    realm::Realm,
    session::Session,
    transport::memory::{self, MemoryPeer, MemoryStream},
};

pub const SECRET: &str = "test-secret";

pub fn config() -> RealmConfig {
    RealmConfig {
        hmac_secret: Some(SECRET.to_string()),
        ..Default::default()
    }
}

pub fn realm_with(config: RealmConfig) -> Arc<Realm> {
    let worlds =
        WorldRegistry::from_worlds([World::new("untitled", 32, 32, 25, 19).unwrap()]).unwrap();
    let store = Arc::new(MemoryCharacterStore::from_config(&config));
    Arc::new(Realm::new(config, worlds, store).unwrap())
}

pub fn realm() -> Arc<Realm> {
    realm_with(config())
}

pub fn token(realm: &Realm, username: &str) -> String {
    issue_token(
        SECRET,
        &realm.config.token_issuer,
        username,
        Duration::minutes(5),
    )
    .unwrap()
}

/// A registered session whose remote end is already gone.
pub fn session(realm: &Realm) -> Arc<Session> {
    let (sink, _stream, _peer) = memory::pair();
    realm.sessions.acquire_slot(Box::new(sink)).unwrap()
}

/// A registered session plus its inbound half and the remote peer.
pub fn connect(realm: &Realm) -> (Arc<Session>, MemoryStream, MemoryPeer) {
    let (sink, stream, peer) = memory::pair();
    let session = realm.sessions.acquire_slot(Box::new(sink)).unwrap();
    (session, stream, peer)
}

pub fn character() -> CharacterRecord {
    CharacterRecord {
        id: 0,
        name: "alice".into(),
    }
}
