use grimoire_core::models::HitPointField;

use crate::commands::common::{flush_queue, resolve_character, CliContext};
use crate::error::CliError;

/// Requested hit point changes in a fixed order
pub fn hit_point_changes(
    current: Option<i32>,
    maximum: Option<i32>,
    temporary: Option<i32>,
) -> Vec<(HitPointField, i32)> {
    [
        (HitPointField::Maximum, maximum),
        (HitPointField::Current, current),
        (HitPointField::Temporary, temporary),
    ]
    .into_iter()
    .filter_map(|(field, value)| value.map(|value| (field, value)))
    .collect()
}

pub async fn run_hp(
    ctx: &CliContext,
    id: &str,
    changes: &[(HitPointField, i32)],
) -> Result<(), CliError> {
    if changes.is_empty() {
        return Err(CliError::NothingToUpdate);
    }

    let mut character = resolve_character(ctx, id).await?;
    for (field, value) in changes {
        if let Some(updated) = ctx.engine.characters().update_hit_points(*field, *value)? {
            character = updated;
        }
    }
    flush_queue(ctx).await?;

    let hit_points = character.hit_points;
    println!(
        "{}: {}/{} (+{} temp)",
        character.name, hit_points.current, hit_points.maximum, hit_points.temporary
    );
    Ok(())
}
