//! Full socket-based integration tests for client ↔ server communication.

use realm_client::input::InputState;
use realm_shared::net::{ClientMessage, DisconnectCode, MoveCommand, PlayerLogin, ServerMessage};
use realm_tests::{test_config, TestRealm, SCREEN, WAIT};

fn disconnect_code(msg: &ServerMessage) -> Option<DisconnectCode> {
    match msg {
        ServerMessage::PlayerDisconnect { code, .. } => Some(*code),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_lists_characters() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let client = realm.login("alice").await?;

    assert!(client.player_id.is_some());
    assert_eq!(client.characters.len(), realm.realm.config.character_slots);
    let first = client.characters[0].as_ref().expect("slot 0 is filled");
    assert_eq!(first.name, "alice");
    assert_eq!(client.first_character_slot(), Some(0));

    client.close().await?;
    realm.stop().await
}

/// Full integration: log in, load a character and walk one step.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn character_enters_world_and_moves() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut client = realm.enter_world("alice").await?;
    assert_eq!(client.world.as_deref(), Some("untitled"));

    let me = client.player_id.expect("logged in");
    let start = client.own_character().expect("own character visible").location.clone();
    assert_eq!((start.x, start.y), (400, 400));

    client
        .send_move(InputState {
            right: true,
            down: true,
            ..Default::default()
        })
        .await?;
    client
        .wait_for(WAIT, |m| {
            matches!(m, ServerMessage::LocalCharacterState { characters }
                if characters.iter().any(|c| c.player_id == me && c.location.x == 401 && c.location.y == 401))
        })
        .await?;

    client.close().await?;
    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nearby_players_see_each_other() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut alice = realm.enter_world("alice").await?;
    let mut bob = realm.enter_world("bob").await?;
    let bob_id = bob.player_id.expect("bob logged in");
    let alice_id = alice.player_id.expect("alice logged in");

    alice
        .wait_for(WAIT, |m| {
            matches!(m, ServerMessage::LocalCharacterState { characters }
                if characters.iter().any(|c| c.player_id == bob_id))
        })
        .await?;
    bob.wait_for(WAIT, |m| {
        matches!(m, ServerMessage::LocalCharacterState { characters }
            if characters.iter().any(|c| c.player_id == alice_id))
    })
    .await?;

    alice.close().await?;
    bob.close().await?;
    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_login_with_same_username_conflicts() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let first = realm.login("alice").await?;

    let mut second = realm.connect().await?;
    second.login(&realm.token("alice")?, SCREEN).await?;
    let msg = second
        .wait_for(WAIT, |m| disconnect_code(m).is_some())
        .await?;
    assert_eq!(disconnect_code(&msg), Some(DisconnectCode::Conflict));
    assert!(second.recv_timeout(WAIT).await?.is_none());

    first.close().await?;
    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_token_is_unauthorized() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut client = realm.connect().await?;
    client.login("not-a-token", SCREEN).await?;

    let msg = client
        .wait_for(WAIT, |m| disconnect_code(m).is_some())
        .await?;
    assert_eq!(disconnect_code(&msg), Some(DisconnectCode::Unauthorized));
    assert!(client.player_id.is_none());

    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn moving_before_login_is_not_allowed() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut client = realm.connect().await?;
    client
        .send(&ClientMessage::CharacterMove(MoveCommand {
            up: true,
            ..Default::default()
        }))
        .await?;

    let msg = client
        .wait_for(WAIT, |m| disconnect_code(m).is_some())
        .await?;
    assert_eq!(disconnect_code(&msg), Some(DisconnectCode::MethodNotAllowed));

    realm.stop().await
}

/// A login packet padded past the realm's frame limit.
fn oversized_login(max_frame_bytes: usize) -> ClientMessage {
    ClientMessage::PlayerLogin(PlayerLogin {
        access_token: "x".repeat(max_frame_bytes * 2),
        screen: SCREEN,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_first_frame_is_bad_request() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut client = realm.connect().await?;
    client
        .send(&oversized_login(realm.realm.config.max_frame_bytes))
        .await?;

    let msg = client
        .wait_for(WAIT, |m| disconnect_code(m).is_some())
        .await?;
    assert_eq!(disconnect_code(&msg), Some(DisconnectCode::BadRequest));
    assert!(client.player_id.is_none());

    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_frame_after_login_is_bad_request() -> anyhow::Result<()> {
    let realm = TestRealm::start().await?;
    let mut client = realm.login("alice").await?;
    client
        .send(&oversized_login(realm.realm.config.max_frame_bytes))
        .await?;

    let msg = client
        .wait_for(WAIT, |m| disconnect_code(m).is_some())
        .await?;
    assert_eq!(disconnect_code(&msg), Some(DisconnectCode::BadRequest));

    realm.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_realm_closes_new_sockets() -> anyhow::Result<()> {
    let realm = TestRealm::start_with(realm_shared::config::RealmConfig {
        max_clients: 1,
        ..test_config()
    })
    .await?;
    let first = realm.login("alice").await?;

    let mut refused = realm.connect().await?;
    assert!(refused.recv_timeout(WAIT).await?.is_none());
    assert!(refused.disconnect.is_none());
    assert_eq!(realm.realm.sessions.len(), 1);

    first.close().await?;
    realm.stop().await
}
