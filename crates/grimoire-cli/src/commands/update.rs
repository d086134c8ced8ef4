use grimoire_core::models::CharacterPatch;

use crate::commands::common::{flush_queue, resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_update(ctx: &CliContext, id: &str, patch: &CharacterPatch) -> Result<(), CliError> {
    if patch.is_empty() {
        return Err(CliError::NothingToUpdate);
    }

    let character = resolve_character(ctx, id).await?;
    let updated = ctx.engine.characters().update(&character.id, patch)?;
    flush_queue(ctx).await?;
    println!("{}", updated.id);
    Ok(())
}
