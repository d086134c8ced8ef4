//! grimoire-core - Core library for Grimoire
//!
//! This crate contains the character model, the durable local store, and the
//! offline sync engine (mutation queue, merge, connectivity) shared by every
//! Grimoire front end.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod session;
pub mod sync;
pub mod util;

pub use engine::Engine;
pub use error::{Error, Result};
pub use models::{Character, CharacterId, OwnerId, SyncStatus};
