//! Standalone bot client.
//!
//! Usage:
//!   cargo run -p realm_client -- [--addr 127.0.0.1:8080] [--name Player]
//!                                [--hmac-secret <secret>] [--token <jwt>]
//!                                [--moves 600]
//!
//! Without `--token` the bot mints its own access token from the shared secret
//! (or `REALM_HMAC_SECRET`). It logs in, picks the first character, enters the
//! world and random-walks, one move per simulation tick.

use std::{env, time::Duration};

use anyhow::Context;
use realm_client::{client::ClientState, input::InputState, GameClient};
use realm_shared::{auth::issue_token, config::RealmConfig, net::Screen};
use tracing::info;

struct BotArgs {
    cfg: RealmConfig,
    token: Option<String>,
    moves: u32,
}

fn parse_args() -> BotArgs {
    let mut cfg = RealmConfig::default();
    let mut token = None;
    let mut moves = 600;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--hmac-secret" if i + 1 < args.len() => {
                cfg.hmac_secret = Some(args[i + 1].clone());
                i += 2;
            }
            "--token" if i + 1 < args.len() => {
                token = Some(args[i + 1].clone());
                i += 2;
            }
            "--moves" if i + 1 < args.len() => {
                moves = args[i + 1].parse().unwrap_or(600);
                i += 2;
            }
            _ => i += 1,
        }
    }
    if let Ok(secret) = env::var("REALM_HMAC_SECRET") {
        cfg.hmac_secret.get_or_insert(secret);
    }
    BotArgs { cfg, token, moves }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let BotArgs { cfg, token, moves } = parse_args();
    let token = match token {
        Some(token) => token,
        None => {
            let secret = cfg
                .hmac_secret
                .as_deref()
                .context("pass --token, --hmac-secret or set REALM_HMAC_SECRET")?;
            issue_token(
                secret,
                &cfg.token_issuer,
                &cfg.player_name,
                chrono::Duration::hours(1),
            )?
        }
    };
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting bot");

    let mut client = GameClient::connect(&cfg.server_addr).await?;
    client
        .login(
            &token,
            Screen {
                width: 800,
                height: 600,
            },
        )
        .await?;

    let timeout = Duration::from_secs(10);
    client
        .wait_for(timeout, |m| {
            matches!(m, realm_shared::net::ServerMessage::PlayerCharacters { .. })
        })
        .await
        .context("character list")?;
    let slot = client
        .first_character_slot()
        .context("account has no characters")?;
    client.select_character(slot).await?;
    client.done_loading().await?;
    while client.state != ClientState::InWorld {
        client
            .recv_timeout(timeout)
            .await?
            .context("server closed before the world loaded")?;
    }

    let step = cfg.simulation_period();
    let mut rng = rand::thread_rng();
    let mut input = InputState::random(&mut rng);
    for n in 0..moves {
        // Change direction now and then.
        if n % 60 == 0 {
            input = InputState::random(&mut rng);
        }
        client.send_move(input).await?;

        // Read whatever arrives until the next step is due.
        let next_step = tokio::time::Instant::now() + step;
        loop {
            let left = next_step.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() || client.state == ClientState::Disconnected {
                break;
            }
            if client.recv_timeout(left).await.is_err() {
                break;
            }
        }
        if client.state == ClientState::Disconnected {
            println!("Disconnected: {:?}", client.disconnect);
            return Ok(());
        }
        if n % 60 == 0 {
            if let Some(me) = client.own_character() {
                info!(
                    x = me.location.x,
                    y = me.location.y,
                    visible = client.visible.len(),
                    "Position"
                );
            }
        }
    }

    client.close().await?;
    Ok(())
}
