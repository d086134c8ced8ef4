//! Database layer for Grimoire

mod character_repository;
mod connection;
mod migrations;
mod queue_repository;

pub use character_repository::{CharacterRepository, SqliteCharacterRepository};
pub use connection::Database;
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
