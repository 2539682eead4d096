//! Character persistence seam.
//!
//! The realm does not own player data. A [`CharacterStore`] lists a player's
//! slots, loads the selected character's saved position and persists it again
//! when the session ends. [`MemoryCharacterStore`] is the built-in store: one
//! character per account, spawned at the configured point, with saves kept in
//! memory for the life of the process.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use realm_shared::{config::RealmConfig, net::CharacterSummary};
use tracing::debug;

/// A character as listed on the selection screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRecord {
    pub id: u32,
    pub name: String,
}

impl From<&CharacterRecord> for CharacterSummary {
    fn from(record: &CharacterRecord) -> Self {
        CharacterSummary {
            id: record.id,
            name: record.name.clone(),
        }
    }
}

/// Saved position returned by a load. The world is still a name here; the
/// simulation tick resolves it against the world registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCharacter {
    pub world: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSave {
    pub record: CharacterRecord,
    pub world: String,
    pub x: i32,
    pub y: i32,
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    /// One entry per slot, `None` for empty slots.
    async fn list_characters(&self, username: &str)
        -> anyhow::Result<Vec<Option<CharacterRecord>>>;

    async fn load(
        &self,
        username: &str,
        character: &CharacterRecord,
    ) -> anyhow::Result<LoadedCharacter>;

    async fn save(&self, username: &str, character: &CharacterSave) -> anyhow::Result<()>;
}

pub struct MemoryCharacterStore {
    slots: usize,
    spawn: LoadedCharacter,
    saves: Mutex<HashMap<(String, u32), CharacterSave>>,
}

impl MemoryCharacterStore {
    pub fn new(slots: usize, spawn_world: impl Into<String>, spawn_x: i32, spawn_y: i32) -> Self {
        Self {
            slots,
            spawn: LoadedCharacter {
                world: spawn_world.into(),
                x: spawn_x,
                y: spawn_y,
            },
            saves: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RealmConfig) -> Self {
        Self::new(
            cfg.character_slots,
            cfg.spawn_world.clone(),
            cfg.spawn_x,
            cfg.spawn_y,
        )
    }

    /// Last saved state for `username`'s character `id`.
    pub fn saved(&self, username: &str, id: u32) -> Option<CharacterSave> {
        self.saves.lock().get(&(username.to_string(), id)).cloned()
    }
}

#[async_trait]
impl CharacterStore for MemoryCharacterStore {
    async fn list_characters(
        &self,
        username: &str,
    ) -> anyhow::Result<Vec<Option<CharacterRecord>>> {
        let mut slots = vec![None; self.slots];
        if let Some(first) = slots.first_mut() {
            *first = Some(CharacterRecord {
                id: 0,
                name: username.to_string(),
            });
        }
        Ok(slots)
    }

    async fn load(
        &self,
        username: &str,
        character: &CharacterRecord,
    ) -> anyhow::Result<LoadedCharacter> {
        let loaded = match self.saved(username, character.id) {
            Some(save) => LoadedCharacter {
                world: save.world,
                x: save.x,
                y: save.y,
            },
            None => self.spawn.clone(),
        };
        debug!(username, character_id = character.id, world = %loaded.world, "Character loaded");
        Ok(loaded)
    }

    async fn save(&self, username: &str, character: &CharacterSave) -> anyhow::Result<()> {
        self.saves.lock().insert(
            (username.to_string(), character.record.id),
            character.clone(),
        );
        Ok(())
    }
}
