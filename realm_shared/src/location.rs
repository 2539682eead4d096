//! Locations inside a world.
//!
//! A `Location` is an immutable value. Moving produces a new `Location`; the
//! old one is never mutated in place.

use std::{fmt, sync::Arc};

use crate::{movement::MovementIntent, world::World};

/// A pixel position inside a world.
#[derive(Clone, PartialEq)]
pub struct Location {
    world: Arc<World>,
    x: i32,
    y: i32,
}

impl Location {
    pub fn new(world: Arc<World>, x: i32, y: i32) -> Self {
        Self { world, x, y }
    }

    /// Creates a location clamped into the world bounds.
    pub fn clamped(world: Arc<World>, x: i32, y: i32) -> Self {
        let x = x.clamp(0, world.pixel_width());
        let y = y.clamp(0, world.pixel_height());
        Self { world, x, y }
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    /// Returns true if both locations are in the same world.
    pub fn same_world(&self, other: &Location) -> bool {
        self.world.name() == other.world.name()
    }

    /// Applies one step of movement and clamps into the world.
    ///
    /// Up is negative y. Opposing flags cancel out, diagonals add.
    pub fn stepped(&self, intent: MovementIntent) -> Location {
        let (dx, dy) = intent.displacement();
        Self::clamped(
            Arc::clone(&self.world),
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
        )
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({}, {})", self.world.name(), self.x, self.y)
    }
}
