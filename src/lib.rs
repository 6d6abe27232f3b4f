//! Cat Arena Session Server Library
//!
//! A multiplayer session server over WebTransport: players join a shared
//! room, exchange movement and chat, and respawn on every map rotation.
//!
//! # Features
//!
//! - `lobby` - Named side rooms that players can create, join and chat in (enabled by default)

pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod storage;
pub mod util;
