//! Per-session camera and area-of-interest bounds.
//!
//! The camera is anchored at the owning character's location and spans the
//! screen size the client declared at login. It only feeds AOI bounds; it
//! never influences movement.

use crate::{location::Location, world::World};

/// Extra margin around the viewport, in pixels per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AoiBuffer {
    pub horizontal: i32,
    pub vertical: i32,
}

impl AoiBuffer {
    /// `tiles` tiles of the world's tile width horizontally and tile height
    /// vertically.
    pub fn for_world(world: &World, tiles: i32) -> Self {
        Self {
            horizontal: tiles.saturating_mul(world.tile_width()),
            vertical: tiles.saturating_mul(world.tile_height()),
        }
    }
}

/// Inclusive axis-aligned rectangle in world pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AoiBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl AoiBounds {
    /// Points on the edge are inside.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Screen-sized window onto the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    screen_width: i32,
    screen_height: i32,
    location: Option<Location>,
}

impl Viewport {
    pub fn new(screen_width: i32, screen_height: i32) -> Self {
        Self {
            screen_width: screen_width.max(0),
            screen_height: screen_height.max(0),
            location: None,
        }
    }

    pub fn screen_width(&self) -> i32 {
        self.screen_width
    }

    pub fn screen_height(&self) -> i32 {
        self.screen_height
    }

    /// Location the camera is anchored at, once a character is placed.
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Re-anchors the camera after the owner moved.
    pub fn update(&mut self, location: Location) {
        self.location = Some(location);
    }

    /// Visible rectangle extended by `buffer` on every side. Edges saturate at
    /// the `i32` range.
    pub fn aoi_bounds(&self, buffer: AoiBuffer) -> Option<AoiBounds> {
        let loc = self.location.as_ref()?;
        Some(AoiBounds {
            min_x: loc.x().saturating_sub(buffer.horizontal),
            min_y: loc.y().saturating_sub(buffer.vertical),
            max_x: loc
                .x()
                .saturating_add(self.screen_width)
                .saturating_add(buffer.horizontal),
            max_y: loc
                .y()
                .saturating_add(self.screen_height)
                .saturating_add(buffer.vertical),
        })
    }
}
