//! Area-of-interest filtering.
//!
//! An observer sees every Active character in the same world whose location
//! lies inside its camera rectangle extended by the AOI buffer. The observer's
//! own character is included.

use realm_shared::{
    camera::{AoiBuffer, Viewport},
    location::Location,
    net::{CharacterState, CharacterStateLocation},
};

use crate::session::SessionId;

/// An Active character as seen by the broadcast tick.
#[derive(Debug, Clone)]
pub struct VisibleEntity {
    pub player_id: SessionId,
    pub character_id: u32,
    pub location: Location,
}

impl VisibleEntity {
    fn to_state(&self) -> CharacterState {
        CharacterState {
            id: self.character_id,
            player_id: self.player_id.0,
            location: CharacterStateLocation {
                world: self.location.world().name().to_string(),
                x: self.location.x(),
                y: self.location.y(),
            },
        }
    }
}

/// Entities visible from `viewport`, in candidate order. Empty until the
/// viewport is anchored.
pub fn visible_entities(
    viewport: &Viewport,
    buffer_tiles: i32,
    candidates: &[VisibleEntity],
) -> Vec<CharacterState> {
    let Some(anchor) = viewport.location() else {
        return Vec::new();
    };
    let buffer = AoiBuffer::for_world(anchor.world(), buffer_tiles);
    let Some(bounds) = viewport.aoi_bounds(buffer) else {
        return Vec::new();
    };
    candidates
        .iter()
        .filter(|e| e.location.same_world(anchor))
        .filter(|e| bounds.contains(e.location.x(), e.location.y()))
        .map(VisibleEntity::to_state)
        .collect()
}
