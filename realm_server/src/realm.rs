//! Process-wide realm context shared by every task.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use realm_shared::{
    auth::TokenVerifier,
    config::{ConfigError, RealmConfig},
    world::WorldRegistry,
};

use crate::{character::CharacterStore, registry::SessionRegistry};

pub struct Realm {
    pub config: RealmConfig,
    pub worlds: WorldRegistry,
    pub sessions: SessionRegistry,
    pub verifier: TokenVerifier,
    pub characters: Arc<dyn CharacterStore>,
    simulation_ticks: AtomicU64,
}

impl Realm {
    /// Validates `config` and wires the realm together.
    pub fn new(
        config: RealmConfig,
        worlds: WorldRegistry,
        characters: Arc<dyn CharacterStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let secret = config
            .hmac_secret
            .as_deref()
            .ok_or(ConfigError::MissingSecret)?;
        let verifier = TokenVerifier::new(secret, &config.token_issuer);
        let sessions = SessionRegistry::new(config.max_clients, config.outbound_queue_capacity);
        Ok(Self {
            config,
            worlds,
            sessions,
            verifier,
            characters,
            simulation_ticks: AtomicU64::new(0),
        })
    }

    pub fn simulation_ticks(&self) -> u64 {
        self.simulation_ticks.load(Ordering::Relaxed)
    }

    pub(crate) fn count_simulation_tick(&self) {
        self.simulation_ticks.fetch_add(1, Ordering::Relaxed);
    }
}
