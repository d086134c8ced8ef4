use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use grimoire_core::config::RemoteConfig;
use grimoire_core::remote::{DisconnectedRemoteStore, HttpRemoteStore, RemoteStore};
use grimoire_core::services::LocalStore;
use grimoire_core::sync::DrainReport;
use grimoire_core::{Character, Engine, OwnerId};
use serde::Serialize;

use crate::cli::GlobalArgs;
use crate::config::{default_db_path, CliConfig};
use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const FLUSH_ATTEMPTS: usize = 20;
const FLUSH_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a command needs: the engine and who it acts for
pub struct CliContext {
    pub engine: Engine,
    pub owner: OwnerId,
    pub db_path: Option<PathBuf>,
    pub remote_configured: bool,
    pub offline: bool,
}

impl CliContext {
    pub fn new(engine: Engine, owner: OwnerId, remote_configured: bool, offline: bool) -> Self {
        engine.sign_in(owner.clone());
        Self {
            db_path: engine.store().path().cloned(),
            engine,
            owner,
            remote_configured,
            offline,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CharacterListItem {
    pub id: String,
    pub name: String,
    pub class: String,
    pub level: u8,
    pub sync_status: String,
    pub updated_at: i64,
    pub relative_time: String,
}

/// Open the local store, pick a remote and sign the owner in
pub fn open_context(args: &GlobalArgs, config: &CliConfig) -> Result<CliContext, CliError> {
    let owner = resolve_owner(args.owner.clone(), config)?;
    let db_path = resolve_db_path(args.db_path.clone(), config);
    let engine_config = config.engine.clone().apply_env_overrides()?;

    let mut remote_config = RemoteConfig::from_env();
    if !remote_config.is_configured() {
        remote_config.base_url.clone_from(&config.remote_url);
    }

    let remote: Arc<dyn RemoteStore> = if remote_config.is_configured() {
        Arc::new(HttpRemoteStore::from_config(&remote_config)?)
    } else {
        tracing::debug!("No remote configured, changes stay queued locally");
        Arc::new(DisconnectedRemoteStore)
    };
    let online = remote_config.is_configured() && !args.offline;

    let store = LocalStore::open_path(&db_path)?;
    let engine = Engine::new(store, remote, engine_config, online);
    Ok(CliContext::new(
        engine,
        owner,
        remote_config.is_configured(),
        args.offline,
    ))
}

pub fn resolve_owner(cli_owner: Option<String>, config: &CliConfig) -> Result<OwnerId, CliError> {
    cli_owner
        .or_else(|| env::var("GRIMOIRE_OWNER").ok())
        .or_else(|| config.owner.clone())
        .and_then(|owner| grimoire_core::util::normalize_text_option(Some(owner)))
        .map(OwnerId::new)
        .ok_or(CliError::OwnerRequired)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &CliConfig) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("GRIMOIRE_DB_PATH").map(PathBuf::from))
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn normalize_character_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyCharacterId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a character by full id or unique id prefix and select it
pub async fn resolve_character(ctx: &CliContext, query: &str) -> Result<Character, CliError> {
    let query = normalize_character_identifier(query)?;
    let characters = ctx.engine.characters().fetch_all(&ctx.owner).await?;

    if let Some(character) = characters.iter().find(|c| c.id.as_str() == query) {
        return Ok(ctx.engine.characters().select(&character.id)?);
    }

    let matching = characters
        .iter()
        .filter(|c| c.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::CharacterNotFound(query)),
        [character] => Ok(ctx.engine.characters().select(&character.id)?),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|c| short_id(c))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousCharacterId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Push queued changes once before the process exits.
///
/// A drain started in the background by the change itself makes the first
/// attempt skip, so retry until a pass of our own runs. Entries rewritten
/// while that background drain was committing need one more pass.
pub async fn flush_queue(ctx: &CliContext) -> Result<Option<DrainReport>, CliError> {
    if !ctx.engine.is_online() {
        return Ok(None);
    }
    for _ in 0..FLUSH_ATTEMPTS {
        let report = ctx.engine.sync_now().await?;
        if report.skipped {
            tokio::time::sleep(FLUSH_BACKOFF).await;
        } else if report.superseded == 0 {
            return Ok(Some(report));
        }
    }
    tracing::warn!("Queue is still draining; remaining changes sync on the next run");
    Ok(None)
}

pub fn short_id(character: &Character) -> String {
    character.id.as_str().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_character_lines(characters: &[Character]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    characters
        .iter()
        .map(|character| {
            let short_id = short_id(character);
            let name = &character.name;
            let summary = class_summary(character);
            let relative_time = format_relative_time(character.updated_at, now_ms);
            let status = character.sync_status.as_str();
            format!("{short_id:<13}  {name:<24}  {summary:<20}  {status:<7}  {relative_time}")
        })
        .collect()
}

pub fn character_to_list_item(character: &Character) -> CharacterListItem {
    let now_ms = Utc::now().timestamp_millis();
    CharacterListItem {
        id: character.id.to_string(),
        name: character.name.clone(),
        class: character.class_name.clone(),
        level: character.level,
        sync_status: character.sync_status.to_string(),
        updated_at: character.updated_at,
        relative_time: format_relative_time(character.updated_at, now_ms),
    }
}

pub fn class_summary(character: &Character) -> String {
    if character.class_name.is_empty() {
        format!("level {}", character.level)
    } else {
        format!("{} {}", character.class_name, character.level)
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |time| time.to_rfc3339())
}
