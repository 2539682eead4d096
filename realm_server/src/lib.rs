//! `realm_server`
//!
//! Server-side systems:
//! - Session registry with a hard connection cap
//! - Per-session inbound task (login, packet dispatch)
//! - Fixed-rate simulation, flush and broadcast drivers
//! - Area-of-interest filtered state updates
//!
//! Networking model:
//! - WebSocket text frames carrying JSON `{code, data}` packets
//! - All writes go through the flush tick, one message per session per tick

pub mod aoi;
pub mod character;
pub mod connection;
pub mod dispatch;
pub mod realm;
pub mod registry;
pub mod server;
pub mod session;
pub mod tick;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use realm::Realm;
pub use server::RealmServer;
