use crate::commands::common::{flush_queue, resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_delete(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    let character = resolve_character(ctx, id).await?;

    ctx.engine.characters().delete(&character.id).await?;
    flush_queue(ctx).await?;
    println!("{}", character.id);
    Ok(())
}
