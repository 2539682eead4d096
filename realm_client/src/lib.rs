//! `realm_client`
//!
//! Headless client systems:
//! - WebSocket connection and login
//! - Character selection and world loading
//! - Input sampling and movement commands
//! - Tracking of the visible characters reported by the server

pub mod client;
pub mod input;

pub use client::GameClient;
