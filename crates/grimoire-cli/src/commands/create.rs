use grimoire_core::models::CharacterPatch;

use crate::commands::common::{flush_queue, CliContext};
use crate::error::CliError;

pub fn build_create_patch(
    name: Option<String>,
    class_name: Option<String>,
    level: Option<u8>,
) -> CharacterPatch {
    CharacterPatch {
        name,
        class_name,
        level,
        ..CharacterPatch::default()
    }
}

pub async fn run_create(ctx: &CliContext, patch: CharacterPatch) -> Result<(), CliError> {
    let character = ctx.engine.characters().create(patch).await?;
    flush_queue(ctx).await?;
    println!("{}", character.id);
    Ok(())
}
