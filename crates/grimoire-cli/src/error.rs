use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] grimoire_core::Error),
    #[error(transparent)]
    Remote(#[from] grimoire_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No owner given. Pass --owner or set GRIMOIRE_OWNER.")]
    OwnerRequired,
    #[error("Character ID cannot be empty")]
    EmptyCharacterId,
    #[error("Character not found for id/prefix: {0}")]
    CharacterNotFound(String),
    #[error("{0}")]
    AmbiguousCharacterId(String),
    #[error("Nothing to update; pass at least one field")]
    NothingToUpdate,
    #[error("{name} is immune to {condition}")]
    ConditionBlocked { name: String, condition: String },
    #[error("Sync is not configured. Set GRIMOIRE_REMOTE_URL (and GRIMOIRE_REMOTE_TOKEN).")]
    SyncNotConfigured,
    #[error("Cannot sync while --offline is set")]
    Offline,
}
