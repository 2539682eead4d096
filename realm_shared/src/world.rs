//! World geometry and the world registry.
//!
//! Worlds are built once at startup from Tiled JSON maps and never mutated
//! afterwards. Everything else holds them through `Arc<World>`.
//!
//! Map files must declare their world name with a map-level property:
//!
//! ```json
//! { "properties": [{ "name": "name", "type": "string", "value": "untitled" }] }
//! ```

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Map property that carries the world name.
pub const WORLD_NAME_PROPERTY: &str = "name";

/// Errors raised while building the world registry.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("read tilemap {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse tilemap {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("tilemap {0} does not declare a `name` property")]
    MissingName(String),
    #[error("world {name} has invalid dimensions {tile_width}x{tile_height} tiles of {tile_count_x}x{tile_count_y}")]
    InvalidDimensions {
        name: String,
        tile_width: i32,
        tile_height: i32,
        tile_count_x: i32,
        tile_count_y: i32,
    },
    #[error("world {name} is declared by more than one tilemap")]
    DuplicateName { name: String },
}

/// A Tiled map property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilemapProperty {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A tile layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilemapLayer {
    #[serde(default)]
    pub data: Vec<u32>,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub width: i32,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A tileset reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    #[serde(default)]
    pub columns: i32,
    #[serde(rename = "firstgid", default)]
    pub first_gid: u32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub name: String,
}

/// The subset of a Tiled JSON map the server cares about.
///
/// Sent verbatim to clients in `WorldData` once their character is loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tilemap {
    /// Number of tile rows.
    pub height: i32,
    /// Number of tile columns.
    pub width: i32,
    #[serde(rename = "tileheight")]
    pub tile_height: i32,
    #[serde(rename = "tilewidth")]
    pub tile_width: i32,
    #[serde(default)]
    pub properties: Vec<TilemapProperty>,
    #[serde(default)]
    pub layers: Vec<TilemapLayer>,
    #[serde(default)]
    pub tilesets: Vec<Tileset>,
}

impl Tilemap {
    /// Returns a string map property by name.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_str())
    }
}

/// Immutable world geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    name: String,
    tile_width: i32,
    tile_height: i32,
    tile_count_x: i32,
    tile_count_y: i32,
    pixel_width: i32,
    pixel_height: i32,
    tilemap: Tilemap,
}

impl World {
    /// Creates a world without tile data.
    pub fn new(
        name: impl Into<String>,
        tile_width: i32,
        tile_height: i32,
        tile_count_x: i32,
        tile_count_y: i32,
    ) -> Result<Self, WorldError> {
        let name = name.into();
        let tilemap = Tilemap {
            height: tile_count_y,
            width: tile_count_x,
            tile_height,
            tile_width,
            properties: vec![TilemapProperty {
                name: WORLD_NAME_PROPERTY.to_string(),
                kind: "string".to_string(),
                value: serde_json::Value::String(name.clone()),
            }],
            ..Default::default()
        };
        Self::from_tilemap_named(name, tilemap)
    }

    /// Builds a world from a parsed tilemap, reading its name property.
    pub fn from_tilemap(tilemap: Tilemap, source: &str) -> Result<Self, WorldError> {
        let name = tilemap
            .property_str(WORLD_NAME_PROPERTY)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| WorldError::MissingName(source.to_string()))?
            .to_string();
        Self::from_tilemap_named(name, tilemap)
    }

    fn from_tilemap_named(name: String, tilemap: Tilemap) -> Result<Self, WorldError> {
        let positive = tilemap.tile_width > 0
            && tilemap.tile_height > 0
            && tilemap.width > 0
            && tilemap.height > 0;
        let extent = tilemap
            .width
            .checked_mul(tilemap.tile_width)
            .zip(tilemap.height.checked_mul(tilemap.tile_height));
        let Some((pixel_width, pixel_height)) = extent.filter(|_| positive) else {
            return Err(WorldError::InvalidDimensions {
                name,
                tile_width: tilemap.tile_width,
                tile_height: tilemap.tile_height,
                tile_count_x: tilemap.width,
                tile_count_y: tilemap.height,
            });
        };
        Ok(Self {
            name,
            tile_width: tilemap.tile_width,
            tile_height: tilemap.tile_height,
            tile_count_x: tilemap.width,
            tile_count_y: tilemap.height,
            pixel_width,
            pixel_height,
            tilemap,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tile_width(&self) -> i32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> i32 {
        self.tile_height
    }

    pub fn tile_count_x(&self) -> i32 {
        self.tile_count_x
    }

    pub fn tile_count_y(&self) -> i32 {
        self.tile_count_y
    }

    /// Width of the world in pixels.
    pub fn pixel_width(&self) -> i32 {
        self.pixel_width
    }

    /// Height of the world in pixels.
    pub fn pixel_height(&self) -> i32 {
        self.pixel_height
    }

    pub fn tilemap(&self) -> &Tilemap {
        &self.tilemap
    }
}

/// Read-only mapping from world name to world.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    worlds: HashMap<String, Arc<World>>,
}

impl WorldRegistry {
    /// Builds a registry, rejecting duplicate names.
    pub fn from_worlds(worlds: impl IntoIterator<Item = World>) -> Result<Self, WorldError> {
        let mut map = HashMap::new();
        for world in worlds {
            let name = world.name().to_string();
            if map.contains_key(&name) {
                return Err(WorldError::DuplicateName { name });
            }
            map.insert(name, Arc::new(world));
        }
        Ok(Self { worlds: map })
    }

    /// Loads every `*.json` tilemap in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, WorldError> {
        let entries = fs::read_dir(dir).map_err(|source| WorldError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| WorldError::Read {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        // Stable order so duplicate errors name the same file every run.
        paths.sort();

        let mut worlds = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = fs::read_to_string(&path).map_err(|source| WorldError::Read {
                path: path.clone(),
                source,
            })?;
            let tilemap: Tilemap =
                serde_json::from_str(&raw).map_err(|source| WorldError::Parse {
                    path: path.clone(),
                    source,
                })?;
            let world = World::from_tilemap(tilemap, &path.display().to_string())?;
            debug!(world = %world.name(), path = %path.display(), "Parsed tilemap");
            worlds.push(world);
        }

        let registry = Self::from_worlds(worlds)?;
        info!(count = registry.len(), dir = %dir.display(), "Worlds loaded");
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.worlds.keys().map(String::as_str)
    }
}
