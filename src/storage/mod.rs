//! Persistent storage

pub mod maps;

pub use maps::{MapRepository, RepositoryError};
