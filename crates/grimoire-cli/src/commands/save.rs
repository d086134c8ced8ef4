use grimoire_core::SyncStatus;

use crate::commands::common::{resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_save(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    let character = resolve_character(ctx, id).await?;
    let saved = ctx.engine.characters().force_sync(&character.id).await?;

    if saved.sync_status == SyncStatus::Synced {
        println!("Saved {}", saved.name);
    } else {
        println!("Queued {} for the next sync", saved.name);
    }
    Ok(())
}
