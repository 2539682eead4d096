//! Standalone realm server binary.
//!
//! Usage:
//!   cargo run -p realm_server -- [--config realm.json] [--addr 127.0.0.1:8080]
//!                                [--maps-dir maps] [--hmac-secret <secret>]
//!
//! The secret may also come from `REALM_HMAC_SECRET`. The server loads every
//! Tiled map in the maps directory, then accepts WebSocket clients until
//! Ctrl-C or `quit`.
//!
//! Console commands:
//!   status           - Show realm status
//!   kick <username>  - Disconnect a player
//!   quit             - Shutdown server

use std::{
    env,
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use realm_server::{
    character::MemoryCharacterStore,
    server::{exec_console, ConsoleOutput},
    Realm, RealmServer,
};
use realm_shared::{config::RealmConfig, world::WorldRegistry};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

const SECRET_ENV: &str = "REALM_HMAC_SECRET";

fn parse_args() -> anyhow::Result<RealmConfig> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base layer; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            RealmConfig::from_json_file(Path::new(path))?
        }
        None => RealmConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 2,
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--maps-dir" if i + 1 < args.len() => {
                cfg.maps_dir = args[i + 1].clone();
                i += 2;
            }
            "--hmac-secret" if i + 1 < args.len() => {
                cfg.hmac_secret = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }

    if let Ok(secret) = env::var(SECRET_ENV) {
        if !secret.is_empty() {
            cfg.hmac_secret = Some(secret);
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    cfg.validate()
        .with_context(|| format!("invalid configuration (set --hmac-secret or {SECRET_ENV})"))?;
    info!(
        addr = %cfg.server_addr,
        maps_dir = %cfg.maps_dir,
        max_clients = cfg.max_clients,
        "Starting realm"
    );

    let worlds = WorldRegistry::load_dir(&PathBuf::from(&cfg.maps_dir)).context("load worlds")?;
    anyhow::ensure!(
        worlds.get(&cfg.spawn_world).is_some(),
        "spawn world {:?} not found in {}",
        cfg.spawn_world,
        cfg.maps_dir
    );

    let store = Arc::new(MemoryCharacterStore::from_config(&cfg));
    let realm = Arc::new(Realm::new(cfg, worlds, store).context("create realm")?);
    let server = RealmServer::bind(Arc::clone(&realm)).await?;

    // Console lines from stdin.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let (quit_tx, quit_rx) = oneshot::channel::<()>();
    let console_realm = Arc::clone(&realm);
    tokio::spawn(async move {
        let mut quit_tx = Some(quit_tx);
        while let Some(line) = console_rx.recv().await {
            match exec_console(&console_realm, &line) {
                ConsoleOutput::Lines(lines) => {
                    for line in lines {
                        println!("{line}");
                    }
                }
                ConsoleOutput::Quit => {
                    if let Some(tx) = quit_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    });

    println!(
        "Realm ready. Type 'status' for info, 'kick <username>' to disconnect a player, 'quit' to exit."
    );
    println!();

    server
        .run(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!(error = %e, "Ctrl-C handler failed");
                    }
                }
                Ok(()) = quit_rx => {}
            }
        })
        .await
}
