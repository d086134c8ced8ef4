use grimoire_core::models::Ability;

use crate::commands::common::{flush_queue, resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_ability(
    ctx: &CliContext,
    id: &str,
    ability: &str,
    score: i32,
) -> Result<(), CliError> {
    let ability = ability.parse::<Ability>()?;
    let character = resolve_character(ctx, id).await?;

    ctx.engine
        .characters()
        .update_ability_score(ability, score)?;
    flush_queue(ctx).await?;
    println!("{} {ability} = {score}", character.name);
    Ok(())
}
