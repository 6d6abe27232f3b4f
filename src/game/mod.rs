pub mod chat;
pub mod constants;
pub mod handler;
pub mod map;
pub mod rotation;
pub mod state;
