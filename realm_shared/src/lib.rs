//! `realm_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Worlds and locations are immutable values shared by reference.
//! - The wire protocol is a closed set of typed messages.
//! - No global state; everything is constructed and passed in.
//! - No `unsafe`.

pub mod auth;
pub mod camera;
pub mod config;
pub mod location;
pub mod movement;
pub mod net;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::camera::*;
    pub use crate::config::*;
    pub use crate::location::*;
    pub use crate::movement::*;
    pub use crate::net::*;
    pub use crate::world::*;
}
