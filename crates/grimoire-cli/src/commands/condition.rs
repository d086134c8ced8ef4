use grimoire_core::models::{ActiveCondition, Condition};

use crate::cli::ConditionAction;
use crate::commands::common::{flush_queue, resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_condition(
    ctx: &CliContext,
    id: &str,
    action: ConditionAction,
    condition: &str,
    duration: Option<u32>,
) -> Result<(), CliError> {
    let condition = condition.parse::<Condition>()?;
    let character = resolve_character(ctx, id).await?;
    let characters = ctx.engine.characters();

    match action {
        ConditionAction::Add => {
            let applied = characters.add_active_condition(ActiveCondition {
                condition,
                duration,
            })?;
            if !applied {
                return Err(CliError::ConditionBlocked {
                    name: character.name,
                    condition: condition.to_string(),
                });
            }
            println!("{} is {condition}", character.name);
        }
        ConditionAction::Remove => {
            if characters.remove_active_condition(condition)?.is_some() {
                println!("{} is no longer {condition}", character.name);
            } else {
                println!("{} was not {condition}", character.name);
            }
        }
    }

    flush_queue(ctx).await?;
    Ok(())
}
